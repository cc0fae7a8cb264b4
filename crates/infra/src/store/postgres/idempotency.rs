use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row};

use super::{PgUnitOfWork, map_sqlx_error};
use crate::store::{IdempotencyRecord, IdempotencyStore, StoreError};

#[async_trait]
impl IdempotencyStore for PgUnitOfWork {
    async fn try_claim(&mut self, key: &str, operation: &str) -> Result<bool, StoreError> {
        // A concurrent claimer of the same key blocks here until the first
        // transaction ends, then sees the conflict (or claims it after a rollback).
        let claimed = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, operation)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(key)
        .bind(operation)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("claim_idempotency_key", e))?;

        Ok(claimed.is_some())
    }

    async fn save(&mut self, key: &str, operation: &str, response: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, operation, response)
            VALUES ($1, $2, $3)
            ON CONFLICT (key)
            DO UPDATE SET
                operation = EXCLUDED.operation,
                response = EXCLUDED.response
            "#,
        )
        .bind(key)
        .bind(operation)
        .bind(response)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_idempotency_response", e))?;

        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT key, operation, response, created_at
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_idempotency_key", e))?;

        match row {
            Some(row) => {
                let row = IdempotencyRow::from_row(&row)
                    .map_err(|e| map_sqlx_error("get_idempotency_key", e))?;
                Ok(Some(row.into()))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
struct IdempotencyRow {
    key: String,
    operation: String,
    response: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for IdempotencyRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(IdempotencyRow {
            key: row.try_get("key")?,
            operation: row.try_get("operation")?,
            response: row.try_get("response")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        IdempotencyRecord {
            key: row.key,
            operation: row.operation,
            response: row.response,
            created_at: row.created_at,
        }
    }
}
