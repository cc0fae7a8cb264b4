use async_trait::async_trait;

use ledgerflow_core::AccountId;
use ledgerflow_ledger::{LedgerEntry, NewLedgerEntry};

use super::StoreError;

/// Append-only ledger entries with derived balances.
///
/// There is no update or delete: an account's balance is always
/// Σ(DEPOSIT, TRANSFER_IN) − Σ(WITHDRAW, TRANSFER_OUT) over its entries.
#[async_trait]
pub trait LedgerStore: Send {
    /// Serialize every other unit of work that locks the same account until
    /// this one ends.
    ///
    /// Taken before reading a balance that gates a movement. On Postgres the
    /// lock statement fixes a serializable snapshot before it blocks, so a
    /// waiter reading a balance that changed meanwhile fails with
    /// `StoreError::Conflict` at read or commit; callers re-run the unit of work.
    async fn lock_account(&mut self, account: AccountId) -> Result<(), StoreError>;

    /// Append one entry; the store assigns `id` and `created_at`.
    async fn append(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Entries for `account`, most recent first.
    async fn list_by_account(&mut self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Signed sum of the account's entries (0 when it has none).
    async fn balance(&mut self, account: AccountId) -> Result<i64, StoreError>;
}
