//! Keystone server entry point.
//!
//! Loads configuration, boots the sandbox modules over the in-process
//! platform and runs until a shutdown signal arrives (or, with `--simulate`,
//! until the scripted traffic has been replayed).

mod cli;
mod config;
mod logging;
mod sandbox;
mod signals;

use anyhow::{anyhow, Result};
use cli::CliArgs;
use config::AppConfig;
use keystone_event_system::LocalPlatform;
use keystone_loader::App;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Wires configuration, logging and the booted application together.
struct Application {
    config: AppConfig,
    platform: Arc<LocalPlatform>,
    app: App,
    simulate: bool,
}

impl Application {
    async fn new(args: CliArgs) -> Result<Self> {
        let loaded = AppConfig::load_from_file(&args.config_path).await?;
        let mut config = loaded.config;

        if let Some(level) = args.log_level {
            config.logging.level = level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        display_banner(&config);
        if loaded.created {
            info!(
                "📝 Created default configuration file: {}",
                args.config_path.display()
            );
        }

        let platform = Arc::new(LocalPlatform::new());
        let app = sandbox::build_app(platform.clone(), &config);
        info!(
            "📂 Config: {} | Modules: {}",
            args.config_path.display(),
            app.modules().join(", ")
        );

        Ok(Self {
            config,
            platform,
            app,
            simulate: args.simulate,
        })
    }

    async fn run(self) -> Result<()> {
        info!("🌟 Booting {}", self.config.server.name);

        let report = self
            .app
            .boot()
            .await
            .ok_or_else(|| anyhow!("application was already booted"))?;

        for bucket in &report.buckets {
            info!(
                "  🧩 {}: {} run, {} failed, {} skipped, {} timed out",
                bucket.bucket, bucket.run, bucket.failed, bucket.skipped, bucket.timed_out
            );
        }
        if report.is_clean() {
            info!(
                "✅ Boot complete in {:?} with {} subscriptions",
                report.elapsed, report.subscriptions
            );
        } else {
            warn!("⚠️ Boot finished with problems in {:?}", report.elapsed);
        }

        if self.simulate {
            let summary = sandbox::simulate(&self.app, &self.platform).await?;
            info!(
                "🎬 Simulation replayed {} events, {} messages sent",
                summary.events_dispatched,
                summary.outbound.len()
            );
        } else {
            info!("✅ {} is now running", self.config.server.name);
            info!("🛑 Press Ctrl+C to gracefully shutdown");
            let received = signals::wait_for_shutdown().await?;
            info!("🛑 {} received, initiating graceful shutdown...", received);
        }

        let stats = self.app.dispatcher().stats().await;
        self.app.shutdown();

        info!("📊 Final Statistics:");
        info!("  - Events dispatched: {}", stats.events_dispatched);
        info!("  - Handlers invoked: {}", stats.handlers_invoked);
        info!("  - Handler failures: {}", stats.handler_failures);
        info!("  - Unresolved owners: {}", stats.resolution_failures);
        info!("👋 {} stopped", self.config.server.name);
        Ok(())
    }
}

fn display_banner(config: &AppConfig) {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║            🗝️  KEYSTONE SERVER            ║");
    info!("║                  v{:<10}             ║", version);
    info!("║                                          ║");
    info!("║  Decorator-free event wiring             ║");
    info!("║  Ordered boot buckets                    ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
    info!("  ⏱️ Heartbeat: {}ms", config.server.tick_interval_ms);
    info!("  🔁 Readiness polls: {}", config.boot.max_readiness_polls);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(application) => {
            if let Err(e) = application.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
