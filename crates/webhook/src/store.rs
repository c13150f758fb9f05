//! Storage traits for the webhook log and dead letter queue.

use async_trait::async_trait;
use common::IdempotencyKey;
use uuid::Uuid;

use crate::dlq::DlqEntry;
use crate::error::Result;
use crate::event::BankEvent;

/// Append-only store for the webhook delivery log.
///
/// Inserts happen before dispatch; afterwards only the processing status
/// fields change. The store enforces at most one `processed` row per
/// idempotency key.
#[async_trait]
pub trait BankEventStore: Send + Sync {
    /// Inserts a new `pending` log record.
    async fn insert(&self, event: BankEvent) -> Result<()>;

    /// Fetches a log record by id.
    async fn get(&self, id: Uuid) -> Result<Option<BankEvent>>;

    /// Returns true if a `processed` record exists for the key.
    async fn processed_exists(&self, key: &IdempotencyKey) -> Result<bool>;

    /// Marks a record `processed`, stamping `processed_at`.
    async fn mark_processed(&self, id: Uuid) -> Result<()>;

    /// Marks a record `failed` with the handler's error message.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    /// Marks a record `ignored` (no handler recognizes the type).
    async fn mark_ignored(&self, id: Uuid) -> Result<()>;
}

/// Store for dead-lettered deliveries awaiting retry or manual resolution.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Records a failed delivery.
    async fn insert(&self, entry: DlqEntry) -> Result<()>;

    /// Fetches an entry by id.
    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>>;

    /// Lists entries that have not been resolved yet.
    async fn list_unresolved(&self) -> Result<Vec<DlqEntry>>;

    /// Increments the retry counter, returning the updated entry.
    async fn increment_retry(&self, id: Uuid) -> Result<DlqEntry>;

    /// Marks an entry resolved with operator notes.
    async fn resolve(&self, id: Uuid, notes: &str) -> Result<()>;
}
