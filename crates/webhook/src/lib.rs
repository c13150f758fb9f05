//! Webhook ingestion for provider-side settlement events.
//!
//! The escrow provider delivers payment notifications at-least-once, signed
//! with HMAC-SHA256. This crate verifies signatures, deduplicates deliveries
//! by idempotency key, writes every delivery to a durable log before
//! dispatching it, and parks handler failures in a dead letter queue for
//! retry or manual resolution.

pub mod dlq;
pub mod error;
pub mod event;
pub mod ingest;
pub mod memory;
pub mod postgres;
pub mod signature;
pub mod store;

pub use dlq::DlqEntry;
pub use error::{Result, WebhookError};
pub use event::{BankEvent, BankEventStatus, ProviderEvent};
pub use ingest::{Disposition, EventHandler, HandlerError, IngestOutcome, WebhookIngestor};
pub use memory::{InMemoryBankEventStore, InMemoryDlqStore};
pub use postgres::{PostgresBankEventStore, PostgresDlqStore};
pub use signature::SignatureVerifier;
pub use store::{BankEventStore, DlqStore};
