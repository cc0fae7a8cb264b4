//! Transactional outbox records.
//!
//! An outbox event is written in the **same database transaction** as the
//! ledger entry it describes, then drained asynchronously by the relay.
//!
//! ## Lifecycle
//!
//! 1. **NewOutboxEvent**: built by the ledger service from a typed `Event`
//! 2. **OutboxEvent (pending)**: committed together with the ledger entry
//! 3. **OutboxEvent (processed)**: marked by the relay after a successful publish
//!
//! A crash between publish and mark-processed leaves the event pending, so it
//! is published again on the next tick (at-least-once).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{DomainError, EventId};

use crate::event::Event;

/// Delivery status of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
        }
    }
}

impl core::str::FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            other => Err(DomainError::validation(format!("unknown outbox status '{other}'"))),
        }
    }
}

/// An event ready to be added to the outbox (not yet persisted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    /// Serialize a typed event into an outbox record.
    ///
    /// The payload is the JSON encoding of `event`; the bus treats it as
    /// opaque bytes.
    pub fn from_typed<E>(
        id: EventId,
        aggregate_type: impl Into<String>,
        aggregate_id: i64,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            id,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event.event_type().to_string(),
            payload: serde_json::to_vec(event)?,
        })
    }
}

/// A persisted outbox event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Materialize a freshly-added (pending) event.
    pub fn pending(event: NewOutboxEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            payload: event.payload,
            status: OutboxStatus::Pending,
            created_at,
            processed_at: None,
        }
    }

    /// Bus partitioning key: the stringified aggregate id.
    pub fn partition_key(&self) -> String {
        self.aggregate_id.to_string()
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{TransactionCreated, TransactionKind};
    use ledgerflow_core::{AccountId, EntryId};

    #[test]
    fn from_typed_captures_event_metadata() {
        let event_id = EventId::new();
        let event = TransactionCreated {
            event_id,
            entry_id: EntryId::new(1),
            account_id: AccountId::new(12),
            amount: 100,
            kind: TransactionKind::Deposit,
            note: "x".to_string(),
            occurred_at: Utc::now(),
        };

        let new = NewOutboxEvent::from_typed(event_id, "account", 12, &event).unwrap();
        assert_eq!(new.event_type, "transaction.created");
        assert_eq!(new.aggregate_type, "account");

        let decoded: TransactionCreated = serde_json::from_slice(&new.payload).unwrap();
        assert_eq!(decoded, event);

        let stored = OutboxEvent::pending(new, Utc::now());
        assert!(stored.is_pending());
        assert_eq!(stored.partition_key(), "12");
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in [OutboxStatus::Pending, OutboxStatus::Processed] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("done".parse::<OutboxStatus>().is_err());
    }
}
