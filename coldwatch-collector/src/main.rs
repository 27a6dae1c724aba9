//! Coldwatch collector
//!
//! Run with: cargo run -p coldwatch-collector
//!
//! Configuration comes from `COLDWATCH_*` environment variables (see
//! [`CollectorConfig::from_env`]); log level from RUST_LOG (default:
//! coldwatch=info).

use anyhow::Context;
use coldwatch_collector::{CollectorConfig, CollectorService};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coldwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CollectorConfig::from_env().context("invalid collector configuration")?;
    info!(
        instance_id = %config.instance_id(),
        lease_key = %config.lease.lease_key,
        ttl_ms = config.lease.ttl.as_millis() as u64,
        durable = config.data_dir.is_some(),
        replica = config.replica_dir.is_some(),
        "Collector configuration loaded"
    );

    let service = CollectorService::from_config(config)
        .await
        .context("failed to initialise collector")?;
    service.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    service.stop().await;
    Ok(())
}
