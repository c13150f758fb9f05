//! Append-only settlement ledger.
//!
//! Every mutation of a deal is recorded as an immutable fact in the ledger.
//! Appends carry an expected aggregate version, so two writers racing on the
//! same deal cannot both succeed — the loser gets a [`LedgerError::ConcurrencyConflict`]
//! and must re-read. This is the serialization point for the whole settlement
//! core.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::AggregateId;
pub use error::{LedgerError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::{AppendOptions, EventStream, Ledger, LedgerExt};
