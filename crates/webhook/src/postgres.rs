use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, IdempotencyKey};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    dlq::DlqEntry,
    error::{Result, WebhookError},
    event::{BankEvent, BankEventStatus},
    store::{BankEventStore, DlqStore},
};

/// PostgreSQL-backed webhook log.
///
/// A partial unique index on `(idempotency_key) WHERE status = 'processed'`
/// enforces the one-processed-row-per-key invariant even when two deliveries
/// of the same event race past the pre-check.
#[derive(Clone)]
pub struct PostgresBankEventStore {
    pool: PgPool,
}

impl PostgresBankEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PgRow) -> Result<BankEvent> {
        Ok(BankEvent {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            event_type: row.try_get("event_type")?,
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
            payload: row.try_get("payload")?,
            signature_valid: row.try_get("signature_valid")?,
            status: parse_status(row.try_get::<String, _>("status")?.as_str()),
            error: row.try_get("error")?,
            received_at: row.try_get("received_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: BankEventStatus,
        error: Option<&str>,
        stamp_processed: bool,
    ) -> Result<()> {
        let processed_at = stamp_processed.then(Utc::now);
        let updated = sqlx::query(
            r#"
            UPDATE bank_events
            SET status = $2, error = COALESCE($3, error), processed_at = COALESCE($4, processed_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error)
        .bind(processed_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(WebhookError::EventNotFound(id));
        }
        Ok(())
    }
}

fn parse_status(s: &str) -> BankEventStatus {
    match s {
        "processed" => BankEventStatus::Processed,
        "failed" => BankEventStatus::Failed,
        "ignored" => BankEventStatus::Ignored,
        _ => BankEventStatus::Pending,
    }
}

#[async_trait]
impl BankEventStore for PostgresBankEventStore {
    async fn insert(&self, event: BankEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bank_events
                (id, external_id, event_type, idempotency_key, payload,
                 signature_valid, status, error, received_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.external_id)
        .bind(&event.event_type)
        .bind(event.idempotency_key.as_str())
        .bind(&event.payload)
        .bind(event.signature_valid)
        .bind(event.status.to_string())
        .bind(&event.error)
        .bind(event.received_at)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BankEvent>> {
        let row = sqlx::query("SELECT * FROM bank_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn processed_exists(&self, key: &IdempotencyKey) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM bank_events WHERE idempotency_key = $1 AND status = 'processed')",
        )
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_processed(&self, id: Uuid) -> Result<()> {
        self.set_status(id, BankEventStatus::Processed, None, true)
            .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.set_status(id, BankEventStatus::Failed, Some(error), false)
            .await
    }

    async fn mark_ignored(&self, id: Uuid) -> Result<()> {
        self.set_status(id, BankEventStatus::Ignored, None, false)
            .await
    }
}

/// PostgreSQL-backed dead letter queue.
#[derive(Clone)]
pub struct PostgresDlqStore {
    pool: PgPool,
}

impl PostgresDlqStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: PgRow) -> Result<DlqEntry> {
        Ok(DlqEntry {
            id: row.try_get("id")?,
            bank_event_id: row.try_get("bank_event_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            deal_id: row
                .try_get::<Option<Uuid>, _>("deal_id")?
                .map(AggregateId::from_uuid),
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            resolved: row.try_get("resolved")?,
            resolution_notes: row.try_get("resolution_notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    async fn insert(&self, entry: DlqEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_dlq
                (id, bank_event_id, event_type, payload, error, deal_id,
                 retry_count, resolved, resolution_notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.bank_event_id)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.error)
        .bind(entry.deal_id.map(|d| d.as_uuid()))
        .bind(entry.retry_count as i32)
        .bind(entry.resolved)
        .bind(&entry.resolution_notes)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>> {
        let row = sqlx::query("SELECT * FROM webhook_dlq WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn list_unresolved(&self) -> Result<Vec<DlqEntry>> {
        let rows =
            sqlx::query("SELECT * FROM webhook_dlq WHERE resolved = FALSE ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn increment_retry(&self, id: Uuid) -> Result<DlqEntry> {
        let row = sqlx::query(
            r#"
            UPDATE webhook_dlq
            SET retry_count = retry_count + 1, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(WebhookError::DlqEntryNotFound(id))?;

        Self::row_to_entry(row)
    }

    async fn resolve(&self, id: Uuid, notes: &str) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE webhook_dlq
            SET resolved = TRUE, resolution_notes = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(WebhookError::DlqEntryNotFound(id));
        }
        Ok(())
    }
}
