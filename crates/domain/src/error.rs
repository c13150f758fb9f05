//! Domain-level error types.

use thiserror::Error;

use crate::deal::DealError;

/// Errors surfaced when loading aggregates and executing commands.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The ledger rejected or failed the operation.
    #[error("ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    /// The deal aggregate rejected the command.
    #[error(transparent)]
    Deal(#[from] DealError),

    /// Event payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation required an existing aggregate that was not found.
    #[error("{aggregate_type} not found: {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },
}

impl DomainError {
    /// Returns true when the error is an optimistic-concurrency conflict
    /// which the caller may resolve by re-reading and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Ledger(ledger::LedgerError::ConcurrencyConflict { .. })
        )
    }
}
