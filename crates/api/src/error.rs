//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DealError, DomainError};
use ledger::LedgerError;
use orchestrator::OrchestrationError;
use webhook::WebhookError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Orchestration or domain logic error.
    Orchestration(OrchestrationError),
    /// Webhook pipeline error.
    Webhook(WebhookError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Orchestration(err) => orchestration_error_to_response(err),
            ApiError::Webhook(err) => webhook_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn orchestration_error_to_response(err: OrchestrationError) -> (StatusCode, String) {
    match &err {
        OrchestrationError::Domain(domain_err) => match domain_err {
            DomainError::Deal(deal_err) => match deal_err {
                DealError::DisputeLocked { .. } => (StatusCode::LOCKED, err.to_string()),
                DealError::Transition(_)
                | DealError::MilestoneTransition { .. }
                | DealError::DisputeTransition(_)
                | DealError::DisputeAlreadyOpen => (StatusCode::CONFLICT, err.to_string()),
                DealError::NotCreated => (StatusCode::NOT_FOUND, err.to_string()),
                _ => (StatusCode::BAD_REQUEST, err.to_string()),
            },
            DomainError::AggregateNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
            DomainError::Ledger(LedgerError::ConcurrencyConflict { .. }) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        },
        OrchestrationError::Provider(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        OrchestrationError::Validation(_) | OrchestrationError::RecipientNotRegistrable { .. } => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        OrchestrationError::ESign(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
    }
}

fn webhook_error_to_response(err: WebhookError) -> (StatusCode, String) {
    match &err {
        WebhookError::SignatureInvalid
        | WebhookError::SignatureMissing
        | WebhookError::SecretUnconfigured => (StatusCode::UNAUTHORIZED, err.to_string()),
        WebhookError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        WebhookError::EventNotFound(_) | WebhookError::DlqEntryNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        WebhookError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        ApiError::Orchestration(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Orchestration(OrchestrationError::Domain(err))
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}
