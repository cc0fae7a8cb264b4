use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row};

use ledgerflow_core::{AccountId, Amount, EntryId};
use ledgerflow_ledger::{EntryType, LedgerEntry, NewLedgerEntry};

use super::{PgUnitOfWork, map_sqlx_error};
use crate::store::{LedgerStore, StoreError};

#[async_trait]
impl LedgerStore for PgUnitOfWork {
    async fn lock_account(&mut self, account: AccountId) -> Result<(), StoreError> {
        // Released automatically at commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(account.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_account", e))?;
        Ok(())
    }

    async fn append(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (account_id, type, amount, note)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(entry.account_id.get())
        .bind(entry.entry_type.as_str())
        .bind(entry.amount.minor_units())
        .bind(&entry.note)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_entry", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("append_entry", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("append_entry", e))?;

        Ok(LedgerEntry::from_new(EntryId::new(id), entry, created_at))
    }

    async fn list_by_account(&mut self, account: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, type, amount, note, created_at
            FROM ledger_entries
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account.get())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_by_account", e))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let row = LedgerEntryRow::from_row(&row)
                .map_err(|e| map_sqlx_error("list_by_account", e))?;
            entries.push(row.try_into()?);
        }
        Ok(entries)
    }

    async fn balance(&mut self, account: AccountId) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(
                CASE
                    WHEN type IN ($2, $3) THEN amount
                    WHEN type IN ($4, $5) THEN -amount
                END
            ), 0)::BIGINT AS balance
            FROM ledger_entries
            WHERE account_id = $1
            "#,
        )
        .bind(account.get())
        .bind(EntryType::Deposit.as_str())
        .bind(EntryType::TransferIn.as_str())
        .bind(EntryType::Withdraw.as_str())
        .bind(EntryType::TransferOut.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("balance", e))?;

        row.try_get("balance")
            .map_err(|e| map_sqlx_error("balance", e))
    }
}

// SQLx row types

#[derive(Debug)]
struct LedgerEntryRow {
    id: i64,
    account_id: i64,
    entry_type: String,
    amount: i64,
    note: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for LedgerEntryRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerEntryRow {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            entry_type: row.try_get("type")?,
            amount: row.try_get("amount")?,
            note: row.try_get("note")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        let entry_type: EntryType = row
            .entry_type
            .parse()
            .map_err(|e| StoreError::Decode(format!("ledger entry {}: {}", row.id, e)))?;
        let amount = Amount::new(row.amount)
            .map_err(|e| StoreError::Decode(format!("ledger entry {}: {}", row.id, e)))?;

        Ok(LedgerEntry {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            entry_type,
            amount,
            note: row.note,
            created_at: row.created_at,
        })
    }
}
