use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AccountId, Amount, DomainError, DomainResult, EntryId};

/// Kind of monetary movement recorded by an entry (determines its sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
}

impl EntryType {
    pub const ALL: [EntryType; 4] = [
        EntryType::Deposit,
        EntryType::Withdraw,
        EntryType::TransferIn,
        EntryType::TransferOut,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Deposit => "DEPOSIT",
            EntryType::Withdraw => "WITHDRAW",
            EntryType::TransferIn => "TRANSFER_IN",
            EntryType::TransferOut => "TRANSFER_OUT",
        }
    }

    /// Credits increase the balance, debits decrease it.
    pub fn is_credit(self) -> bool {
        matches!(self, EntryType::Deposit | EntryType::TransferIn)
    }

    pub fn signed(self, amount: Amount) -> i64 {
        if self.is_credit() {
            amount.minor_units()
        } else {
            -amount.minor_units()
        }
    }
}

impl core::fmt::Display for EntryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown entry type '{s}'")))
    }
}

/// An entry to be appended (id and timestamp are assigned by the store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub note: String,
}

impl NewLedgerEntry {
    pub fn new(
        account_id: AccountId,
        entry_type: EntryType,
        amount: Amount,
        note: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            entry_type,
            amount,
            note: note.into(),
        }
    }

    pub fn deposit(account_id: AccountId, amount: Amount, note: impl Into<String>) -> Self {
        Self::new(account_id, EntryType::Deposit, amount, note)
    }

    pub fn withdraw(account_id: AccountId, amount: Amount, note: impl Into<String>) -> Self {
        Self::new(account_id, EntryType::Withdraw, amount, note)
    }
}

/// Build the debit/credit pair for a transfer.
///
/// Notes name the counterparty: `"To account {to}: {note}"` on the source and
/// `"From account {from}: {note}"` on the destination.
pub fn transfer_pair(
    from: AccountId,
    to: AccountId,
    amount: Amount,
    note: &str,
) -> (NewLedgerEntry, NewLedgerEntry) {
    let debit = NewLedgerEntry::new(
        from,
        EntryType::TransferOut,
        amount,
        format!("To account {to}: {note}"),
    );
    let credit = NewLedgerEntry::new(
        to,
        EntryType::TransferIn,
        amount,
        format!("From account {from}: {note}"),
    );
    (debit, credit)
}

/// A persisted, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub amount: Amount,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(id: EntryId, entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            account_id: entry.account_id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            note: entry.note,
            created_at,
        }
    }

    pub fn signed_amount(&self) -> i64 {
        self.entry_type.signed(self.amount)
    }
}

/// Balance of whatever entries are passed in: Σ credits − Σ debits.
///
/// Callers filter by account; the store-side equivalent is a `SUM(CASE ...)`
/// over `ledger_entries`. Partial sums are widened, so only a final balance
/// outside `i64` is an error.
pub fn derive_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> DomainResult<i64> {
    let total: i128 = entries
        .into_iter()
        .map(|e| i128::from(e.signed_amount()))
        .sum();
    i64::try_from(total)
        .map_err(|_| DomainError::invariant(format!("balance {total} does not fit in i64")))
}

/// Whether `balance` covers a debit of `amount`.
pub fn can_debit(balance: i64, amount: Amount) -> bool {
    balance >= amount.minor_units()
}

/// Whether crediting `amount` keeps `balance` representable.
pub fn can_credit(balance: i64, amount: Amount) -> bool {
    balance.checked_add(amount.minor_units()).is_some()
}
