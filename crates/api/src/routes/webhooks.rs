//! Provider webhook ingestion and dead letter queue endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use ledger::Ledger;
use serde::{Deserialize, Serialize};
use webhook::{DlqStore, IngestOutcome, WebhookError};

use crate::error::ApiError;
use crate::routes::deals::AppState;

/// Header the provider signs its deliveries with.
pub const SIGNATURE_HEADER: &str = "x-esp-signature";

#[derive(Serialize)]
pub struct IngestResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dlq_entry_id: Option<String>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Processed => Self {
                outcome: "processed",
                dlq_entry_id: None,
            },
            IngestOutcome::Duplicate => Self {
                outcome: "duplicate",
                dlq_entry_id: None,
            },
            IngestOutcome::Ignored => Self {
                outcome: "ignored",
                dlq_entry_id: None,
            },
            IngestOutcome::Failed { dlq_entry_id } => Self {
                outcome: "failed",
                dlq_entry_id: Some(dlq_entry_id.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
pub struct DlqEntryResponse {
    pub id: String,
    pub event_type: String,
    pub error: String,
    pub deal_id: Option<String>,
    pub retry_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
pub struct ResolveDlqRequest {
    pub notes: String,
}

/// POST /webhooks/esp — one provider delivery.
///
/// Only a signature failure is rejected; everything past verification
/// is acknowledged with 200 so the provider stops redelivering. Failed
/// dispatches land in the dead letter queue instead.
#[tracing::instrument(skip(state, headers, body))]
pub async fn ingest<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Webhook(WebhookError::SignatureMissing))?;

    let outcome = state.ingestor.ingest(&body, signature).await?;
    Ok(Json(outcome.into()))
}

/// GET /dlq — unresolved dead letter entries.
#[tracing::instrument(skip(state))]
pub async fn list_dlq<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Result<Json<Vec<DlqEntryResponse>>, ApiError> {
    let entries = state.ingestor.dlq().list_unresolved().await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| DlqEntryResponse {
                id: e.id.to_string(),
                event_type: e.event_type,
                error: e.error,
                deal_id: e.deal_id.map(|d| d.to_string()),
                retry_count: e.retry_count,
                created_at: e.created_at,
            })
            .collect(),
    ))
}

/// POST /dlq/:id/retry — re-dispatch a dead-lettered delivery.
#[tracing::instrument(skip(state))]
pub async fn retry_dlq<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<IngestResponse>, ApiError> {
    let entry_id = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid entry id: {e}")))?;
    let outcome = state.ingestor.retry_dlq_entry(entry_id).await?;
    Ok(Json(outcome.into()))
}

/// POST /dlq/:id/resolve — close an entry without re-dispatching.
#[tracing::instrument(skip(state, req))]
pub async fn resolve_dlq<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<ResolveDlqRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let entry_id = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid entry id: {e}")))?;
    state.ingestor.resolve_dlq_entry(entry_id, &req.notes).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
