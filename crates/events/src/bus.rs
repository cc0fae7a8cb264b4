//! Message-bus publishing abstraction (mechanics only).
//!
//! The bus is the **transport** for outbox events after they have been
//! committed to the database. It is deliberately narrow:
//!
//! - **Publish succeeds or fails**: there is no delivery acknowledgement beyond
//!   the returned `Result`.
//! - **At-least-once**: the outbox relay may publish the same event more than
//!   once (crash between publish and mark-processed), so consumers must
//!   deduplicate by event id.
//! - **No persistence**: the outbox table is the source of truth, the bus only
//!   distributes.
//!
//! ```text
//! Ledger Service → outbox_events (same tx as ledger_entries) → Relay → MessageBus → consumers
//! ```

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Bus publish failure.
///
/// Every variant is treated the same way by the relay: the event stays pending
/// and is retried on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The transport could not be reached (connection refused, closed, ...).
    #[error("message bus unavailable: {0}")]
    Unavailable(String),

    /// The transport refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The message could not be encoded for the transport.
    #[error("message serialization failed: {0}")]
    Serialization(String),
}

/// Transport-agnostic publisher.
///
/// `key` is the partitioning key (the stringified aggregate id for outbox
/// events), `payload` is opaque bytes.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; the relay holds one instance for the
/// lifetime of the process.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError>;
}

#[async_trait]
impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), BusError> {
        (**self).publish(topic, key, payload).await
    }
}

/// A subscription to messages fanned out by an in-process bus.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics). Intended for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}
