//! catalog-relay server entry point.
//!
//! Loads configuration, initialises tracing, and serves the relay until
//! Ctrl+C.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use catalog_relay::config::{LogFormat, RelayConfig};
use catalog_relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so a `.env` file can also set RUST_LOG
    let config = RelayConfig::from_env().context("loading relay configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    tracing::info!(addr = %config.listen_addr, "starting catalog-relay");

    let addr = config.listen_addr;
    server::run(config)
        .await
        .with_context(|| format!("serving relay on {addr}"))?;

    tracing::info!("relay stopped");
    Ok(())
}
