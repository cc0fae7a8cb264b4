use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;

/// A claimed idempotency key.
///
/// `response` stays `None` between the claim and the save of the final
/// response. Claim and save normally commit together, so an observed `None`
/// means the original request is still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub response: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

/// Durable set of previously-accepted request keys.
#[async_trait]
pub trait IdempotencyStore: Send {
    /// Atomically claim `key` for `operation`.
    ///
    /// Returns `false`, without side effects, when the key already exists.
    /// Implementations must use a single conditional insert; a lookup followed
    /// by an insert races under concurrent duplicate submissions.
    async fn try_claim(&mut self, key: &str, operation: &str) -> Result<bool, StoreError>;

    /// Attach the final response to `key` (upsert).
    async fn save(&mut self, key: &str, operation: &str, response: &[u8]) -> Result<(), StoreError>;

    /// Look up a key. `None` is ambiguous: the key may never have been sent,
    /// or its request may not have committed yet.
    async fn get(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;
}
