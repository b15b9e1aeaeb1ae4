//! Command-line interface for the Keystone server.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Options given here override the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Run the scripted sandbox traffic after boot, then exit
    pub simulate: bool,
}

impl CliArgs {
    pub fn command() -> Command {
        Command::new("Keystone Server")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Game server framework sandbox: boots registered modules over an in-process platform")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("keystone.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("simulate")
                    .long("simulate")
                    .help("Drive scripted player traffic after boot and exit")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("keystone.toml")),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            simulate: matches.get_flag("simulate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let matches = CliArgs::command()
            .try_get_matches_from(args)
            .expect("arguments should parse");
        CliArgs::from_matches(&matches)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["keystone"]);
        assert_eq!(args.config_path, PathBuf::from("keystone.toml"));
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert!(!args.simulate);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&["keystone", "-c", "realm.toml", "--log-level", "debug", "--json-logs", "--simulate"]);
        assert_eq!(args.config_path, PathBuf::from("realm.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.simulate);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(CliArgs::command()
            .try_get_matches_from(["keystone", "--bind", "0.0.0.0:80"])
            .is_err());
    }
}
