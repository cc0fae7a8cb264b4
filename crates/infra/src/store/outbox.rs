use async_trait::async_trait;

use ledgerflow_core::EventId;
use ledgerflow_events::{NewOutboxEvent, OutboxEvent};

use super::StoreError;

/// Durable queue of undelivered domain events.
#[async_trait]
pub trait OutboxStore: Send {
    /// Append a pending event inside the current unit of work.
    async fn add(&mut self, event: NewOutboxEvent) -> Result<OutboxEvent, StoreError>;

    /// Up to `limit` pending events, oldest first. Rows are neither locked
    /// nor removed.
    async fn fetch_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError>;

    /// Transition `id` to processed.
    ///
    /// Returns `true` when this call performed the transition and `false` when
    /// the event was already processed (or unknown), which is a no-op.
    async fn mark_processed(&mut self, id: EventId) -> Result<bool, StoreError>;
}
