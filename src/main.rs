// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use dnfdaemon::daemon::{self, BusKind, DaemonConfig};
use dnfdaemon::engine::memory::MemoryProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "dnfdaemon")]
#[command(author, version, about = "D-Bus package management service", long_about = None)]
struct Cli {
    /// Serve the per-user session bus instead of the system bus
    #[arg(long)]
    session: bool,

    /// Configuration file (default: /etc/dnfdaemon/dnfdaemon.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Package catalog backing the engine
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Keep running when idle
    #[arg(long)]
    notimeout: bool,

    /// Log at info level
    #[arg(short, long)]
    verbose: bool,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn bus(&self) -> BusKind {
        if self.session {
            BusKind::Session
        } else {
            BusKind::System
        }
    }

    fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level())),
        )
        .init();

    let bus = cli.bus();
    let mut config = DaemonConfig::discover(cli.config.as_deref(), bus)
        .context("Failed to load configuration")?;
    if let Some(catalog) = &cli.catalog {
        config = config.with_catalog(catalog.clone());
    }
    if cli.notimeout {
        config = config.with_watchdog(false);
    }

    info!("Loading catalog from {}", config.engine.catalog.display());
    let provider = MemoryProvider::from_path(&config.engine.catalog).with_context(|| {
        format!("Failed to load catalog {}", config.engine.catalog.display())
    })?;

    daemon::run_daemon(config, bus, Arc::new(provider))
        .await
        .context("Daemon failed")?;
    Ok(())
}
