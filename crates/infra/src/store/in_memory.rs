use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use ledgerflow_core::{AccountId, EntryId, EventId};
use ledgerflow_events::{NewOutboxEvent, OutboxEvent, OutboxStatus};
use ledgerflow_ledger::{LedgerEntry, NewLedgerEntry, derive_balance};

use super::{
    Database, IdempotencyRecord, IdempotencyStore, IsolationLevel, LedgerStore, OutboxStore,
    StoreError, UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct State {
    entries: Vec<LedgerEntry>,
    last_entry_id: i64,
    outbox: Vec<OutboxEvent>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_commits: AtomicBool,
    fail_next_commits: AtomicUsize,
    fail_outbox_writes: AtomicBool,
}

impl Faults {
    fn commit_should_fail(&self) -> bool {
        self.fail_commits.load(Ordering::SeqCst)
            || self
                .fail_next_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }
}

/// In-memory ledger database.
///
/// Intended for tests/dev. Not optimized for performance.
///
/// Each unit of work holds one async mutex over the whole state for its
/// lifetime and stages writes on a private copy, applied only on commit. Units
/// of work therefore execute one at a time, which satisfies every isolation
/// level the service asks for.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<State>>,
    faults: Arc<Faults>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with a conflict (nothing is applied).
    pub fn set_fail_commits(&self, fail: bool) {
        self.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make only the next `count` commits fail with a conflict.
    pub fn fail_next_commits(&self, count: usize) {
        self.faults.fail_next_commits.store(count, Ordering::SeqCst);
    }

    /// Make every subsequent outbox `add` fail.
    pub fn set_fail_outbox_writes(&self, fail: bool) {
        self.faults.fail_outbox_writes.store(fail, Ordering::SeqCst);
    }

    /// Committed entries, in append order.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Committed outbox events, in insertion order.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn idempotency_records(&self) -> Vec<IdempotencyRecord> {
        self.state.lock().await.idempotency.values().cloned().collect()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn begin(&self, _isolation: IsolationLevel) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }
}

/// Unit of work over `InMemoryDatabase`.
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Faults>,
}

#[async_trait]
impl LedgerStore for InMemoryUnitOfWork {
    async fn lock_account(&mut self, _account: AccountId) -> Result<(), StoreError> {
        // The unit of work already excludes every other one.
        Ok(())
    }

    async fn append(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        self.working.last_entry_id += 1;
        let stored = LedgerEntry::from_new(
            EntryId::new(self.working.last_entry_id),
            entry,
            Utc::now(),
        );
        self.working.entries.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_account(&mut self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut entries: Vec<LedgerEntry> = self
            .working
            .entries
            .iter()
            .filter(|e| e.account_id == account)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(entries)
    }

    async fn balance(&mut self, account: AccountId) -> Result<i64, StoreError> {
        derive_balance(self.working.entries.iter().filter(|e| e.account_id == account))
            .map_err(|e| StoreError::Backend(format!("balance of account {account}: {e}")))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryUnitOfWork {
    async fn try_claim(&mut self, key: &str, operation: &str) -> Result<bool, StoreError> {
        match self.working.idempotency.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord {
                    key: key.to_string(),
                    operation: operation.to_string(),
                    response: None,
                    created_at: Utc::now(),
                });
                Ok(true)
            }
        }
    }

    async fn save(&mut self, key: &str, operation: &str, response: &[u8]) -> Result<(), StoreError> {
        let record = self
            .working
            .idempotency
            .entry(key.to_string())
            .or_insert_with(|| IdempotencyRecord {
                key: key.to_string(),
                operation: operation.to_string(),
                response: None,
                created_at: Utc::now(),
            });
        record.operation = operation.to_string();
        record.response = Some(response.to_vec());
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.working.idempotency.get(key).cloned())
    }
}

#[async_trait]
impl OutboxStore for InMemoryUnitOfWork {
    async fn add(&mut self, event: NewOutboxEvent) -> Result<OutboxEvent, StoreError> {
        if self.faults.fail_outbox_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outbox write failure".to_string()));
        }
        if self.working.outbox.iter().any(|e| e.id == event.id) {
            return Err(StoreError::Duplicate(format!("outbox event {} already exists", event.id)));
        }

        let stored = OutboxEvent::pending(event, Utc::now());
        self.working.outbox.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let mut pending: Vec<OutboxEvent> = self
            .working
            .outbox
            .iter()
            .filter(|e| e.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&mut self, id: EventId) -> Result<bool, StoreError> {
        match self.working.outbox.iter_mut().find(|e| e.id == id) {
            Some(event) if event.is_pending() => {
                event.status = OutboxStatus::Processed;
                event.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.faults.commit_should_fail() {
            return Err(StoreError::Conflict("injected commit failure".to_string()));
        }

        let InMemoryUnitOfWork {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
