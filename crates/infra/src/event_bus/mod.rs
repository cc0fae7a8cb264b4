//! Infrastructure message bus implementations.
//!
//! The `MessageBus` abstraction lives in `ledgerflow-events` as pure mechanics.
//! This module provides the transports the relay binary can publish to.

use async_trait::async_trait;
use tracing::info;

use ledgerflow_events::{BusError, MessageBus};

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsMessageBus;

/// Bus that writes every message to the log and always succeeds.
///
/// Used when no broker is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessageBus;

#[async_trait]
impl MessageBus for LogMessageBus {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        info!(
            topic,
            key,
            payload = %String::from_utf8_lossy(payload),
            "published message"
        );
        Ok(())
    }
}
