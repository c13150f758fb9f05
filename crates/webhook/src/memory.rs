use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::IdempotencyKey;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    dlq::DlqEntry,
    error::{Result, WebhookError},
    event::{BankEvent, BankEventStatus},
    store::{BankEventStore, DlqStore},
};

/// In-memory webhook log used in tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryBankEventStore {
    events: Arc<RwLock<Vec<BankEvent>>>,
}

impl InMemoryBankEventStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of logged deliveries.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Returns all logged deliveries, oldest first.
    pub async fn all(&self) -> Vec<BankEvent> {
        self.events.read().await.clone()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut BankEvent),
    {
        let mut events = self.events.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(WebhookError::EventNotFound(id))?;
        f(event);
        Ok(())
    }
}

#[async_trait]
impl BankEventStore for InMemoryBankEventStore {
    async fn insert(&self, event: BankEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BankEvent>> {
        Ok(self.events.read().await.iter().find(|e| e.id == id).cloned())
    }

    async fn processed_exists(&self, key: &IdempotencyKey) -> Result<bool> {
        Ok(self.events.read().await.iter().any(|e| {
            e.idempotency_key == *key && e.status == BankEventStatus::Processed
        }))
    }

    async fn mark_processed(&self, id: Uuid) -> Result<()> {
        self.update(id, |e| {
            e.status = BankEventStatus::Processed;
            e.processed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let error = error.to_string();
        self.update(id, move |e| {
            e.status = BankEventStatus::Failed;
            e.error = Some(error);
        })
        .await
    }

    async fn mark_ignored(&self, id: Uuid) -> Result<()> {
        self.update(id, |e| e.status = BankEventStatus::Ignored).await
    }
}

/// In-memory dead letter queue.
#[derive(Clone, Default)]
pub struct InMemoryDlqStore {
    entries: Arc<RwLock<Vec<DlqEntry>>>,
}

impl InMemoryDlqStore {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries, resolved included.
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn insert(&self, entry: DlqEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DlqEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_unresolved(&self) -> Result<Vec<DlqEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| !e.resolved)
            .cloned()
            .collect())
    }

    async fn increment_retry(&self, id: Uuid) -> Result<DlqEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(WebhookError::DlqEntryNotFound(id))?;
        entry.retry_count += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn resolve(&self, id: Uuid, notes: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(WebhookError::DlqEntryNotFound(id))?;
        entry.resolved = true;
        entry.resolution_notes = Some(notes.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }
}
