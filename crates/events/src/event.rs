use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, EntryId, EventId};

/// A domain event that can be written to the outbox.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "transaction.created").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Which balance-changing operation produced a `TransactionCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
        }
    }
}

/// Event: a deposit or withdrawal was committed to the ledger.
///
/// `event_id` is repeated inside the payload so consumers, which only see the
/// bus key and payload, can deduplicate redeliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCreated {
    pub event_id: EventId,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

impl TransactionCreated {
    pub const EVENT_TYPE: &'static str = "transaction.created";
    pub const AGGREGATE_TYPE: &'static str = "account";
}

impl Event for TransactionCreated {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
