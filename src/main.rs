//! vhost-web
//!
//! Loads a TOML configuration, starts the web subsystem it describes and
//! runs until SIGTERM or SIGINT.
//!
//! ```text
//! signal ─▶ Stopping ─▶ suspend (503s, bounded) ─▶ shutdown guard
//!        ─▶ listeners ─▶ hosts ─▶ servers ─▶ Stopped
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use vhost_web::config::load_config;
use vhost_web::lifecycle::signals::wait_for_signal;
use vhost_web::lifecycle::Bootstrap;
use vhost_web::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser, Debug)]
#[command(name = "vhost-web", version, about = "Virtual-host HTTP server")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "vhost-web.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.logging);
    tracing::info!(config = %cli.config.display(), "vhost-web v{} starting", env!("CARGO_PKG_VERSION"));

    if cli.check {
        tracing::info!(servers = config.servers.len(), "Configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr: SocketAddr = config.metrics.address.parse()?;
        init_metrics(addr)?;
    }

    let boot = Bootstrap::start(&config).await?;
    boot.mark_running();

    let signal = wait_for_signal().await;
    tracing::info!(signal, "Shutdown signal received");
    boot.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
