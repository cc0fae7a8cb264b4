use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use ledgerflow_core::AccountId;

use super::{Account, AccountDirectory, AccountStatus, DirectoryError};
use crate::store::StoreError;
use crate::store::postgres::map_sqlx_error as store_error;

const ACCOUNTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    name        TEXT        NOT NULL,
    is_active   BOOLEAN     NOT NULL DEFAULT TRUE,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Account directory backed by an `accounts` table in the ledger database.
///
/// Reads go straight to the pool on every call; nothing is cached.
#[derive(Debug, Clone)]
pub struct PostgresAccountDirectory {
    pool: PgPool,
}

impl PostgresAccountDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DirectoryError> {
        sqlx::raw_sql(ACCOUNTS_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Insert an active account (tests/dev; account lifecycle lives elsewhere).
    #[instrument(skip(self), err)]
    pub async fn create_account(&self, name: &str) -> Result<Account, DirectoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (name, is_active)
            VALUES ($1, TRUE)
            RETURNING id, name, is_active
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_account", e))?;

        account_from_row(&row).map_err(|e| map_sqlx_error("create_account", e))
    }

    pub async fn set_active(&self, id: AccountId, active: bool) -> Result<bool, DirectoryError> {
        let result = sqlx::query("UPDATE accounts SET is_active = $2 WHERE id = $1")
            .bind(id.get())
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_active", e))?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AccountDirectory for PostgresAccountDirectory {
    async fn get_account(&self, id: AccountId) -> Result<AccountStatus, DirectoryError> {
        let row = sqlx::query("SELECT id, name, is_active FROM accounts WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        match row {
            Some(row) => {
                let account =
                    account_from_row(&row).map_err(|e| map_sqlx_error("get_account", e))?;
                Ok(account.status())
            }
            None => Ok(AccountStatus::MISSING),
        }
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
    })
}

/// Classify through the store mapping so both adapters agree on what counts
/// as a connectivity failure.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DirectoryError {
    match store_error(operation, err) {
        StoreError::Unavailable(msg) => DirectoryError::Unreachable(msg),
        other => DirectoryError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_unreachable() {
        let cases = [
            sqlx::Error::PoolClosed,
            sqlx::Error::PoolTimedOut,
            sqlx::Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
            sqlx::Error::Tls("handshake failed".into()),
        ];
        for err in cases {
            assert!(matches!(
                map_sqlx_error("get_account", err),
                DirectoryError::Unreachable(_)
            ));
        }
    }

    #[test]
    fn decode_failures_are_backend_errors() {
        let err = map_sqlx_error("get_account", sqlx::Error::ColumnNotFound("name".into()));
        assert!(matches!(err, DirectoryError::Backend(msg) if msg.contains("get_account")));
    }

    #[test]
    fn schema_declares_accounts_table() {
        assert!(ACCOUNTS_SCHEMA.contains("CREATE TABLE IF NOT EXISTS accounts"));
    }
}
