//! Ledger operations (application-level orchestration).
//!
//! Every balance-changing operation runs as one unit of work:
//!
//! ```text
//! validate amount
//!   ↓
//! ask the account directory (exists + active)
//!   ↓
//! BEGIN
//!   ↓
//! claim idempotency key (deposit/withdraw, when a key is given)
//!   ↓
//! lock account(s) + derive balance(s), check debit cover / credit headroom
//!   ↓
//! append entry/entries
//!   ↓
//! add outbox event + save idempotency response (deposit/withdraw)
//!   ↓
//! COMMIT
//! ```
//!
//! Any error between `BEGIN` and `COMMIT` drops the unit of work, which rolls
//! back everything written so far. Cancelling the caller's future has the same
//! effect.
//!
//! ## Isolation
//!
//! Every balance-changing operation runs serializable, so a balance read can
//! never act on a snapshot that misses a concurrently committed entry: such an
//! attempt fails with a serialization conflict instead. Conflicts re-run the
//! whole operation a bounded number of times; the failed attempt has already
//! rolled back entirely, idempotency claim included.
//!
//! Per-account transaction locks (taken in ascending id order when a transfer
//! needs two) make concurrent movements on one account queue up rather than
//! race to commit.
//!
//! Balances are never cached; they are re-derived from entries every time.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use ledgerflow_core::{AccountId, Amount, EntryId, EventId};
use ledgerflow_events::{NewOutboxEvent, TransactionCreated, TransactionKind};
use ledgerflow_ledger::{LedgerEntry, NewLedgerEntry, can_credit, can_debit, transfer_pair};

use crate::directory::AccountDirectory;
use crate::store::{
    Database, IdempotencyRecord, IdempotencyStore, IsolationLevel, LedgerStore, OutboxStore,
    StoreError, UnitOfWork,
};

/// Default number of automatic re-runs of an operation after a serialization conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Error code surfaced to callers (wire-stable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidAmount,
    InsufficientFunds,
    AccountUnavailable,
    SameAccount,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::AccountUnavailable => "ACCOUNT_UNAVAILABLE",
            ErrorCode::SameAccount => "SAME_ACCOUNT",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, rejected before any transaction opened. Not retryable.
    Validation,
    /// The account directory failed or denied the account. Safe to retry.
    Dependency,
    /// A business outcome (insufficient funds, balance limit). Not retried
    /// automatically.
    Consistency,
    /// The transaction rolled back (conflict, store failure). Safe to retry the
    /// whole call; an idempotency key makes the retry apply at most once.
    Transaction,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be a positive number of minor units, got {0}")]
    InvalidAmount(i64),

    #[error("source and destination account are the same ({0})")]
    SameAccount(AccountId),

    #[error("account {0} is unavailable")]
    AccountUnavailable(AccountId),

    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: i64,
        requested: i64,
    },

    #[error("crediting {requested} to account {account} would overflow its balance {balance}")]
    BalanceOverflow {
        account: AccountId,
        balance: i64,
        requested: i64,
    },

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl LedgerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::InvalidAmount(_) | LedgerError::BalanceOverflow { .. } => {
                ErrorCode::InvalidAmount
            }
            LedgerError::SameAccount(_) => ErrorCode::SameAccount,
            LedgerError::AccountUnavailable(_) => ErrorCode::AccountUnavailable,
            LedgerError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            LedgerError::Conflict(_) | LedgerError::Store(_) | LedgerError::Serialization(_) => {
                ErrorCode::Internal
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount(_) | LedgerError::SameAccount(_) => ErrorKind::Validation,
            LedgerError::AccountUnavailable(_) => ErrorKind::Dependency,
            LedgerError::InsufficientFunds { .. } | LedgerError::BalanceOverflow { .. } => {
                ErrorKind::Consistency
            }
            LedgerError::Conflict(_) | LedgerError::Store(_) | LedgerError::Serialization(_) => {
                ErrorKind::Transaction
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Dependency | ErrorKind::Transaction)
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => LedgerError::Conflict(msg),
            other => LedgerError::Store(other),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(value: serde_json::Error) -> Self {
        LedgerError::Serialization(value.to_string())
    }
}

/// Result of a deposit or withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The entry was appended and committed.
    Applied(LedgerEntry),
    /// The idempotency key had already been claimed; nothing was written.
    Duplicate,
}

impl OperationOutcome {
    pub fn entry(&self) -> Option<&LedgerEntry> {
        match self {
            OperationOutcome::Applied(entry) => Some(entry),
            OperationOutcome::Duplicate => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, OperationOutcome::Duplicate)
    }
}

/// Both legs of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

/// Response stored against an idempotency key once its operation committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: String,
    pub entry_id: EntryId,
}

impl OperationResponse {
    pub fn ok(entry_id: EntryId) -> Self {
        Self {
            status: "ok".to_string(),
            entry_id,
        }
    }
}

/// Orchestrates ledger operations across the stores and the account directory.
///
/// ## Generic Parameters
///
/// - `D`: database (source of units of work)
/// - `A`: account directory
#[derive(Debug, Clone)]
pub struct LedgerService<D, A> {
    db: D,
    directory: A,
    conflict_retries: u32,
}

impl<D, A> LedgerService<D, A>
where
    D: Database,
    A: AccountDirectory,
{
    pub fn new(db: D, directory: A) -> Self {
        Self {
            db,
            directory,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Number of automatic re-runs of an operation after a serialization conflict.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// Credit `amount` to `account`.
    ///
    /// A non-empty `idempotency_key` that was already claimed returns
    /// `OperationOutcome::Duplicate` without writing anything.
    /// Fails with `BalanceOverflow` when the resulting balance would not fit
    /// in an `i64`.
    #[instrument(skip(self, account, note), fields(account_id = %account), err)]
    pub async fn deposit(
        &self,
        idempotency_key: &str,
        account: AccountId,
        amount: i64,
        note: &str,
    ) -> Result<OperationOutcome, LedgerError> {
        let amount = validate_amount(amount)?;
        self.ensure_available(account).await?;

        let entry = NewLedgerEntry::deposit(account, amount, note);
        self.retry_on_conflict("deposit", move || {
            self.apply_movement(TransactionKind::Deposit, idempotency_key, entry.clone())
        })
        .await
    }

    /// Debit `amount` from `account`, failing with `InsufficientFunds` when the
    /// derived balance does not cover it.
    #[instrument(skip(self, account, note), fields(account_id = %account), err)]
    pub async fn withdraw(
        &self,
        idempotency_key: &str,
        account: AccountId,
        amount: i64,
        note: &str,
    ) -> Result<OperationOutcome, LedgerError> {
        let amount = validate_amount(amount)?;
        self.ensure_available(account).await?;

        let entry = NewLedgerEntry::withdraw(account, amount, note);
        self.retry_on_conflict("withdraw", move || {
            self.apply_movement(TransactionKind::Withdraw, idempotency_key, entry.clone())
        })
        .await
    }

    /// Move `amount` from `from` to `to` as one TRANSFER_OUT and one
    /// TRANSFER_IN entry. Emits no outbox event.
    #[instrument(skip(self, from, to, note), fields(from = %from, to = %to), err)]
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        note: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let amount = validate_amount(amount)?;
        if from == to {
            return Err(LedgerError::SameAccount(from));
        }
        self.ensure_available(from).await?;
        self.ensure_available(to).await?;

        self.retry_on_conflict("transfer", move || self.try_transfer(from, to, amount, note))
            .await
    }

    /// Entries for `account`, most recent first.
    #[instrument(skip(self, account), fields(account_id = %account), err)]
    pub async fn history(&self, account: AccountId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.ensure_available(account).await?;

        let mut uow = self.db.begin(IsolationLevel::ReadCommitted).await?;
        let entries = uow.list_by_account(account).await?;
        uow.commit().await?;

        debug!(entry_count = entries.len(), "loaded history");
        Ok(entries)
    }

    /// Derived balance of `account` in minor units.
    #[instrument(skip(self, account), fields(account_id = %account), err)]
    pub async fn balance(&self, account: AccountId) -> Result<i64, LedgerError> {
        self.ensure_available(account).await?;

        let mut uow = self.db.begin(IsolationLevel::ReadCommitted).await?;
        let balance = uow.balance(account).await?;
        uow.commit().await?;
        Ok(balance)
    }

    /// Stored record for an idempotency key.
    ///
    /// `None` does not mean the request failed: it may still be in flight.
    #[instrument(skip(self), err)]
    pub async fn idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, LedgerError> {
        let mut uow = self.db.begin(IsolationLevel::ReadCommitted).await?;
        let record = uow.get(key).await?;
        uow.commit().await?;
        Ok(record)
    }

    async fn ensure_available(&self, account: AccountId) -> Result<(), LedgerError> {
        match self.directory.get_account(account).await {
            Ok(status) if status.is_available() => Ok(()),
            Ok(status) => {
                debug!(
                    account_id = %account,
                    exists = status.exists,
                    active = status.active,
                    "account rejected by directory"
                );
                Err(LedgerError::AccountUnavailable(account))
            }
            Err(e) => {
                warn!(account_id = %account, error = %e, "account directory lookup failed");
                Err(LedgerError::AccountUnavailable(account))
            }
        }
    }

    /// Re-run `attempt` while it fails with a serialization conflict, at most
    /// `conflict_retries` extra times.
    async fn retry_on_conflict<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(LedgerError::Conflict(reason)) if retries < self.conflict_retries => {
                    retries += 1;
                    warn!(operation, attempt = retries, %reason, "serialization conflict; re-running");
                }
                result => return result,
            }
        }
    }

    async fn apply_movement(
        &self,
        kind: TransactionKind,
        idempotency_key: &str,
        entry: NewLedgerEntry,
    ) -> Result<OperationOutcome, LedgerError> {
        let account = entry.account_id;
        let operation = kind.as_str();
        let mut uow = self.db.begin(IsolationLevel::Serializable).await?;

        if !idempotency_key.is_empty() && !uow.try_claim(idempotency_key, operation).await? {
            discard(uow).await;
            info!(idempotency_key, operation, "duplicate request; already applied");
            return Ok(OperationOutcome::Duplicate);
        }

        uow.lock_account(account).await?;
        let balance = uow.balance(account).await?;
        let rejection = if entry.entry_type.is_credit() {
            (!can_credit(balance, entry.amount)).then(|| LedgerError::BalanceOverflow {
                account,
                balance,
                requested: entry.amount.minor_units(),
            })
        } else {
            (!can_debit(balance, entry.amount)).then(|| LedgerError::InsufficientFunds {
                account,
                balance,
                requested: entry.amount.minor_units(),
            })
        };
        if let Some(err) = rejection {
            discard(uow).await;
            debug!(balance, requested = entry.amount.minor_units(), error = %err, "movement rejected");
            return Err(err);
        }

        let stored = uow.append(entry).await?;

        let event_id = EventId::new();
        let event = TransactionCreated {
            event_id,
            entry_id: stored.id,
            account_id: account,
            amount: stored.amount.minor_units(),
            kind,
            note: stored.note.clone(),
            occurred_at: stored.created_at,
        };
        let outbox = NewOutboxEvent::from_typed(
            event_id,
            TransactionCreated::AGGREGATE_TYPE,
            account.get(),
            &event,
        )?;
        uow.add(outbox).await?;

        if !idempotency_key.is_empty() {
            let response = serde_json::to_vec(&OperationResponse::ok(stored.id))?;
            uow.save(idempotency_key, operation, &response).await?;
        }

        uow.commit().await?;
        info!(entry_id = %stored.id, %event_id, operation, "ledger entry committed");
        Ok(OperationOutcome::Applied(stored))
    }

    async fn try_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        note: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let mut uow = self.db.begin(IsolationLevel::Serializable).await?;

        // Ascending order, so two opposite transfers cannot deadlock.
        uow.lock_account(from.min(to)).await?;
        uow.lock_account(from.max(to)).await?;

        let balance = uow.balance(from).await?;
        if !can_debit(balance, amount) {
            discard(uow).await;
            debug!(balance, requested = amount.minor_units(), "insufficient funds");
            return Err(LedgerError::InsufficientFunds {
                account: from,
                balance,
                requested: amount.minor_units(),
            });
        }

        let credited = uow.balance(to).await?;
        if !can_credit(credited, amount) {
            discard(uow).await;
            debug!(balance = credited, requested = amount.minor_units(), "credit would overflow");
            return Err(LedgerError::BalanceOverflow {
                account: to,
                balance: credited,
                requested: amount.minor_units(),
            });
        }

        let (debit, credit) = transfer_pair(from, to, amount, note);
        let debit = uow.append(debit).await?;
        let credit = uow.append(credit).await?;
        uow.commit().await?;

        info!(debit_id = %debit.id, credit_id = %credit.id, "transfer committed");
        Ok(TransferReceipt { debit, credit })
    }
}

fn validate_amount(amount: i64) -> Result<Amount, LedgerError> {
    Amount::new(amount).map_err(|_| LedgerError::InvalidAmount(amount))
}

/// Roll back a unit of work whose outcome is already decided.
async fn discard(uow: Box<dyn UnitOfWork>) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "rollback failed; transaction discarded on drop");
    }
}
