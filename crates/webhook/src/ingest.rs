//! The webhook ingestion pipeline.
//!
//! Verify → deduplicate → log `pending` → dispatch → record the outcome.
//! The durable log write happens before the handler runs, so at-least-once
//! delivery from the provider is safe to replay: a crash mid-dispatch
//! leaves a `pending` row, and a redelivery of an already-processed key
//! short-circuits without touching the handler.

use async_trait::async_trait;
use common::AggregateId;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dlq::DlqEntry,
    error::Result,
    event::{BankEvent, ProviderEvent},
    signature::SignatureVerifier,
    store::{BankEventStore, DlqStore},
};

/// What a handler did with a recognized delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event was applied.
    Handled,
    /// No handler recognizes this event type.
    Unrecognized,
}

/// A handler failure, with best-effort deal linkage for the DLQ.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub deal_id: Option<AggregateId>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            deal_id: None,
        }
    }

    pub fn for_deal(message: impl Into<String>, deal_id: AggregateId) -> Self {
        Self {
            message: message.into(),
            deal_id: Some(deal_id),
        }
    }
}

/// Dispatches a parsed provider event to domain logic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ProviderEvent)
    -> std::result::Result<Disposition, HandlerError>;
}

/// Outcome of one delivery through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Handled and marked `processed`.
    Processed,
    /// A `processed` record already exists for this idempotency key.
    Duplicate,
    /// No handler recognizes the event type; logged as `ignored`.
    Ignored,
    /// The handler failed; the delivery is parked in the DLQ.
    Failed { dlq_entry_id: Uuid },
}

/// Webhook ingestion service.
pub struct WebhookIngestor<S, D, H> {
    verifier: SignatureVerifier,
    events: S,
    dlq: D,
    handler: H,
}

impl<S, D, H> WebhookIngestor<S, D, H>
where
    S: BankEventStore,
    D: DlqStore,
    H: EventHandler,
{
    pub fn new(verifier: SignatureVerifier, events: S, dlq: D, handler: H) -> Self {
        Self {
            verifier,
            events,
            dlq,
            handler,
        }
    }

    /// Gets a reference to the webhook log store.
    pub fn events(&self) -> &S {
        &self.events
    }

    /// Gets a reference to the dead letter queue store.
    pub fn dlq(&self) -> &D {
        &self.dlq
    }

    /// Runs one delivery through the pipeline.
    ///
    /// Signature errors propagate to the caller — they are the only
    /// failures the HTTP layer turns into a rejection. Everything past
    /// verification resolves to an [`IngestOutcome`].
    #[tracing::instrument(skip(self, raw, signature))]
    pub async fn ingest(&self, raw: &[u8], signature: &str) -> Result<IngestOutcome> {
        self.verifier.verify(raw, signature)?;

        // A signed body that does not parse is still acknowledged, so the
        // provider stops redelivering it; the delivery is dead-lettered
        // for manual follow-up instead of bounced.
        let event = match ProviderEvent::parse(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "malformed webhook body, dead-lettering");
                let record = BankEvent::malformed(raw);
                let record_id = record.id;
                self.events.insert(record.clone()).await?;
                self.events.mark_failed(record_id, &err.to_string()).await?;

                let entry = DlqEntry::for_failure(&record, &err.to_string(), None);
                let dlq_entry_id = entry.id;
                self.dlq.insert(entry).await?;
                metrics::counter!("webhooks_failed_total").increment(1);
                return Ok(IngestOutcome::Failed { dlq_entry_id });
            }
        };
        metrics::counter!("webhooks_received_total").increment(1);

        if self.events.processed_exists(&event.idempotency_key).await? {
            tracing::info!(
                idempotency_key = %event.idempotency_key,
                event_type = %event.event_type,
                "duplicate delivery, already processed"
            );
            metrics::counter!("webhooks_duplicate_total").increment(1);
            return Ok(IngestOutcome::Duplicate);
        }

        let record = BankEvent::pending(&event, true);
        let record_id = record.id;
        self.events.insert(record.clone()).await?;

        match self.handler.handle(&event).await {
            Ok(Disposition::Handled) => {
                self.events.mark_processed(record_id).await?;
                metrics::counter!("webhooks_processed_total").increment(1);
                Ok(IngestOutcome::Processed)
            }
            Ok(Disposition::Unrecognized) => {
                self.events.mark_ignored(record_id).await?;
                tracing::debug!(event_type = %event.event_type, "no handler for event type");
                Ok(IngestOutcome::Ignored)
            }
            Err(err) => {
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "webhook handler failed, dead-lettering"
                );
                self.events.mark_failed(record_id, &err.message).await?;

                let entry = DlqEntry::for_failure(&record, &err.message, err.deal_id);
                let dlq_entry_id = entry.id;
                self.dlq.insert(entry).await?;
                metrics::counter!("webhooks_failed_total").increment(1);
                Ok(IngestOutcome::Failed { dlq_entry_id })
            }
        }
    }

    /// Retries a dead-lettered delivery.
    ///
    /// Increments the retry counter, re-dispatches the original payload and,
    /// on success, marks both the log record `processed` and the entry
    /// resolved. A second failure just bumps the counter.
    #[tracing::instrument(skip(self))]
    pub async fn retry_dlq_entry(&self, entry_id: Uuid) -> Result<IngestOutcome> {
        let entry = self.dlq.increment_retry(entry_id).await?;
        let event = ProviderEvent::parse(&serde_json::to_vec(&entry.payload)?)?;

        match self.handler.handle(&event).await {
            Ok(Disposition::Handled) => {
                self.events.mark_processed(entry.bank_event_id).await?;
                self.dlq
                    .resolve(entry_id, &format!("retried ok (attempt {})", entry.retry_count))
                    .await?;
                metrics::counter!("webhooks_retried_ok_total").increment(1);
                Ok(IngestOutcome::Processed)
            }
            Ok(Disposition::Unrecognized) => {
                self.events.mark_ignored(entry.bank_event_id).await?;
                self.dlq
                    .resolve(entry_id, "event type no longer handled")
                    .await?;
                Ok(IngestOutcome::Ignored)
            }
            Err(err) => {
                tracing::warn!(
                    dlq_entry_id = %entry_id,
                    retry_count = entry.retry_count,
                    error = %err,
                    "dead letter retry failed"
                );
                self.events.mark_failed(entry.bank_event_id, &err.message).await?;
                Ok(IngestOutcome::Failed {
                    dlq_entry_id: entry_id,
                })
            }
        }
    }

    /// Resolves a dead letter entry manually, without re-dispatching.
    pub async fn resolve_dlq_entry(&self, entry_id: Uuid, notes: &str) -> Result<()> {
        self.dlq.resolve(entry_id, notes).await
    }
}
