//! Outbox relay process: drains committed ledger events to the message bus
//! until interrupted.

use std::sync::Arc;

use anyhow::Context;

use ledgerflow_events::MessageBus;
use ledgerflow_infra::event_bus::LogMessageBus;
use ledgerflow_infra::{OutboxRelay, PgDatabase, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    ledgerflow_observability::init(settings.log_format);

    let db = PgDatabase::connect(&settings.database_url, settings.max_connections)
        .await
        .context("failed to connect to the database")?;
    db.ensure_schema()
        .await
        .context("failed to create ledger tables")?;

    let bus = build_bus(&settings)?;
    let handle = OutboxRelay::spawn(db, bus, settings.relay_config());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; finishing current batch");
    handle.shutdown().await;

    Ok(())
}

fn build_bus(settings: &Settings) -> anyhow::Result<Arc<dyn MessageBus>> {
    match settings.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let bus = ledgerflow_infra::event_bus::RedisStreamsMessageBus::new(url)
                .context("invalid REDIS_URL")?;
            tracing::info!(topic = %settings.relay_topic, "publishing to redis streams");
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL is set but redis support is not compiled in; logging messages instead");
            Ok(Arc::new(LogMessageBus))
        }
        None => {
            tracing::info!("no broker configured; logging messages instead");
            Ok(Arc::new(LogMessageBus))
        }
    }
}
