//! Configuration management for the Keystone server.
//!
//! Loads the TOML configuration file, creating one with defaults when it is
//! missing, and validates the result before anything else starts.

use anyhow::Result;
use keystone_loader::BootConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log levels accepted in `[logging] level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn default_tick_interval() -> u64 {
    1000
}

/// Result of [`AppConfig::load_from_file`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// Whether the file was missing and has just been written with defaults
    pub created: bool,
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerSettings,
    /// Boot queue tuning
    #[serde(default)]
    pub boot: BootConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Display name used in logs and the ready announcement
    pub name: String,
    /// Heartbeat period in milliseconds (0 to disable)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                name: "Keystone Sandbox".to_string(),
                tick_interval_ms: default_tick_interval(),
            },
            boot: BootConfig::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it with `created` set. Runs before logging is installed, so
    /// reporting the creation is left to the caller.
    pub async fn load_from_file(path: &Path) -> Result<LoadedConfig> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(LoadedConfig {
                config,
                created: false,
            })
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            Ok(LoadedConfig {
                config: default_config,
                created: true,
            })
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.boot.max_readiness_polls == 0 {
            return Err("boot.max_readiness_polls must be at least 1".to_string());
        }

        if self.boot.default_poll_interval_ms == Some(0) {
            return Err("boot.default_poll_interval_ms must be positive".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, VALID_LOG_LEVELS
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.tick_interval_ms, 1000);
        assert_eq!(config.boot.max_readiness_polls, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keystone.toml");

        let loaded = AppConfig::load_from_file(&path).await.unwrap();
        assert!(loaded.created);
        assert_eq!(loaded.config.server.name, "Keystone Sandbox");
        assert!(path.exists());

        // The written file loads back to the same settings
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert!(!reloaded.created);
        assert_eq!(reloaded.config.server.name, loaded.config.server.name);
        assert_eq!(reloaded.config.boot, loaded.config.boot);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
name = "Test Realm"
tick_interval_ms = 250

[boot]
max_readiness_polls = 20
default_poll_interval_ms = 100

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let loaded = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert!(!loaded.created);
        let config = loaded.config;
        assert_eq!(config.server.name, "Test Realm");
        assert_eq!(config.server.tick_interval_ms, 250);
        assert_eq!(config.boot.max_readiness_polls, 20);
        assert_eq!(config.boot.default_poll_interval_ms, Some(100));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_serde_deserialization_with_defaults() {
        let toml_content = r#"
[server]
name = "Minimal"

[logging]
level = "warn"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.tick_interval_ms, 1000);
        assert_eq!(config.boot, BootConfig::default());
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        let mut config = AppConfig::default();
        config.boot.max_readiness_polls = 0;
        assert!(config.validate().unwrap_err().contains("max_readiness_polls"));

        let mut config = AppConfig::default();
        config.boot.default_poll_interval_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }
    }

    #[test]
    fn test_zero_tick_interval_is_allowed() {
        let mut config = AppConfig::default();
        config.server.tick_interval_ms = 0;
        assert!(config.validate().is_ok());
    }
}
