use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row};
use uuid::Uuid;

use ledgerflow_core::EventId;
use ledgerflow_events::{NewOutboxEvent, OutboxEvent, OutboxStatus};

use super::{PgUnitOfWork, map_sqlx_error};
use crate::store::{OutboxStore, StoreError};

#[async_trait]
impl OutboxStore for PgUnitOfWork {
    async fn add(&mut self, event: NewOutboxEvent) -> Result<OutboxEvent, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, payload, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING created_at
            "#,
        )
        .bind(*event.id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(OutboxStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("add_outbox_event", e))?;

        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| map_sqlx_error("add_outbox_event", e))?;

        Ok(OutboxEvent::pending(event, created_at))
    }

    async fn fetch_pending(&mut self, limit: usize) -> Result<Vec<OutboxEvent>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload, status, created_at, processed_at
            FROM outbox_events
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("fetch_pending", e))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let row = OutboxEventRow::from_row(&row)
                .map_err(|e| map_sqlx_error("fetch_pending", e))?;
            events.push(row.try_into()?);
        }
        Ok(events)
    }

    async fn mark_processed(&mut self, id: EventId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $2, processed_at = NOW()
            WHERE id = $1 AND status = $3
            "#,
        )
        .bind(*id.as_uuid())
        .bind(OutboxStatus::Processed.as_str())
        .bind(OutboxStatus::Pending.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("mark_processed", e))?;

        Ok(result.rows_affected() == 1)
    }
}

// SQLx row types

#[derive(Debug)]
struct OutboxEventRow {
    id: Uuid,
    aggregate_type: String,
    aggregate_id: i64,
    event_type: String,
    payload: Vec<u8>,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxEventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OutboxEventRow {
            id: row.try_get("id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl TryFrom<OutboxEventRow> for OutboxEvent {
    type Error = StoreError;

    fn try_from(row: OutboxEventRow) -> Result<Self, Self::Error> {
        let status: OutboxStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Decode(format!("outbox event {}: {}", row.id, e)))?;

        Ok(OutboxEvent {
            id: EventId::from_uuid(row.id),
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            status,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}
