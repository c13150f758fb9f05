//! Orchestration error types.

use common::PartyId;
use domain::DomainError;
use thiserror::Error;

use crate::esp::EspError;

/// Errors that can occur while orchestrating settlement operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A domain rule rejected the operation (invalid transition, dispute
    /// lock, split validation). Never retried.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A provider call failed. Retryable calls are retried with backoff
    /// before this surfaces.
    #[error(transparent)]
    Provider(#[from] EspError),

    /// Input rejected at the boundary, before any persistence.
    #[error("validation error: {0}")]
    Validation(String),

    /// A recipient cannot be registered with the provider.
    #[error("recipient {party_id} cannot be registered: {reason}")]
    RecipientNotRegistrable { party_id: PartyId, reason: String },

    /// The e-signature subsystem failed.
    #[error("e-signature error: {0}")]
    ESign(String),
}

impl OrchestrationError {
    /// True when the caller may retry after re-reading current state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrchestrationError::Domain(e) if e.is_concurrency_conflict())
    }
}

/// Convenience type alias for orchestration results.
pub type Result<T> = std::result::Result<T, OrchestrationError>;
