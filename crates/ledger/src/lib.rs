//! Ledger module (append-only entries, derived balances).
//!
//! Pure domain logic only: no IO, no persistence concerns. Balances are never
//! stored; they are always a fold over immutable entries.

pub mod entry;

pub use entry::{
    EntryType, LedgerEntry, NewLedgerEntry, can_credit, can_debit, derive_balance, transfer_pair,
};
