//! Redis Streams-backed message bus.
//!
//! Each publish is one `XADD <topic> * key <key> payload <bytes>`: the topic is
//! the stream key, the partition key and the opaque payload are stream fields.
//! Consumer groups, acknowledgement and trimming belong to consumers.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use ledgerflow_events::{BusError, MessageBus};

#[derive(Clone)]
pub struct RedisStreamsMessageBus {
    client: Arc<redis::Client>,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl core::fmt::Debug for RedisStreamsMessageBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsMessageBus").finish_non_exhaustive()
    }
}

impl RedisStreamsMessageBus {
    /// Create a bus for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Only validates the URL; the connection is opened on first publish.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            connection: Arc::new(Mutex::new(None)),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BusError> {
        let mut cached = self.connection.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection so the next publish reconnects.
    async fn reset_connection(&self) {
        self.connection.lock().await.take();
    }
}

#[async_trait]
impl MessageBus for RedisStreamsMessageBus {
    #[instrument(skip(self, payload), fields(stream = %topic, key = %key), err)]
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        let mut conn = self.connection().await?;

        let result: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                warn!(error = %e, "redis connection lost; reconnecting on next publish");
                self.reset_connection().await;
                Err(BusError::Unavailable(format!("XADD failed: {}", e)))
            }
            Err(e) => Err(BusError::Rejected(format!("XADD failed: {}", e))),
        }
    }
}
