//! # Switchboard Server
//!
//! Realtime coordination between operator dashboards and outbound-calling
//! devices.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! switchboard
//!
//! # Run with custom config
//! switchboard --config /path/to/switchboard.toml
//!
//! # Run with environment variables
//! SWITCHBOARD_PORT=8080 SWITCHBOARD_HOST=0.0.0.0 switchboard
//! ```

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "switchboard=debug";

/// switchboard: dialer coordination server
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about = "Dialer coordination server")]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overriding the config file and environment
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!("Starting Switchboard server on {}", config.bind_addr());

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn test_default_log_filter_targets_switchboard_only() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        assert_eq!(filter.to_string(), "switchboard=debug");
    }

    #[test]
    fn test_cli_port_override() {
        let cli = Cli::parse_from(["switchboard", "--port", "7000"]);
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.config, None);
    }
}
