//! Transactional persistence boundary for the ledger.
//!
//! Three stores share one database transaction:
//!
//! - **Ledger store**: append-only entries, balances derived by aggregation
//! - **Idempotency store**: atomic claim-or-detect-duplicate on request keys
//! - **Outbox store**: pending domain events, co-committed with the entries
//!
//! A `UnitOfWork` is one open transaction exposing all three. Nothing written
//! through it is visible to anyone else until `commit()`; dropping it (or
//! calling `rollback()`) discards every write, which is what makes a cancelled
//! caller roll back rather than partially commit.
//!
//! ## Backends
//!
//! - `postgres::PgDatabase`: production backend (sqlx, one shared pool)
//! - `in_memory::InMemoryDatabase`: tests/dev; serializes whole units of work

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod idempotency;
pub mod in_memory;
pub mod ledger;
pub mod outbox;
pub mod postgres;

pub use idempotency::{IdempotencyRecord, IdempotencyStore};
pub use in_memory::InMemoryDatabase;
pub use ledger::LedgerStore;
pub use outbox::OutboxStore;
pub use postgres::PgDatabase;

/// Transaction isolation requested for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

/// Persistence failure.
///
/// These are **infrastructure errors** as opposed to domain errors (validation,
/// insufficient funds).
///
/// ## Error Categories
///
/// - **Conflict**: serialization failure or deadlock; the whole unit of work
///   rolled back and may be retried
/// - **Duplicate**: unique constraint hit outside of an idempotent claim
/// - **Constraint**: check/foreign-key violation (bad data reached the store)
/// - **Unavailable**: pool closed, connection or IO failure
/// - **Decode**: a row could not be mapped back to a domain type
/// - **Backend**: anything else the driver reported
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to decode row: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether re-running the whole unit of work may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// One open database transaction spanning the ledger, idempotency and outbox
/// stores.
#[async_trait]
pub trait UnitOfWork: LedgerStore + IdempotencyStore + OutboxStore + Send {
    /// Make every write visible atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write. Dropping the unit of work has the same effect.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Source of units of work (the single shared connection pool).
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

#[async_trait]
impl<D> Database for Arc<D>
where
    D: Database + ?Sized,
{
    async fn begin(&self, isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError> {
        (**self).begin(isolation).await
    }
}
