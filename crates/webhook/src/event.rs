//! Provider event parsing and the durable bank-event log record.

use chrono::{DateTime, Utc};
use common::IdempotencyKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

/// Processing status of a logged webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankEventStatus {
    /// Logged, dispatch not yet attempted or still in flight.
    Pending,
    /// Handler completed successfully.
    Processed,
    /// Handler failed; a dead-letter entry exists.
    Failed,
    /// No handler recognizes this event type. Not an error.
    Ignored,
}

impl std::fmt::Display for BankEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BankEventStatus::Pending => "pending",
            BankEventStatus::Processed => "processed",
            BankEventStatus::Failed => "failed",
            BankEventStatus::Ignored => "ignored",
        };
        write!(f, "{s}")
    }
}

/// One row of the append-only webhook log.
///
/// A row is written `pending` before the handler runs, so a crash mid-dispatch
/// leaves an auditable record and the provider's redelivery can be matched to
/// it. The original payload never mutates after insert; only `status`,
/// `error` and `processed_at` change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankEvent {
    pub id: Uuid,
    /// Provider-assigned event id, when the provider sends one.
    pub external_id: Option<String>,
    pub event_type: String,
    pub idempotency_key: IdempotencyKey,
    pub payload: serde_json::Value,
    pub signature_valid: bool,
    pub status: BankEventStatus,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl BankEvent {
    /// Creates a `pending` log record for an incoming delivery.
    pub fn pending(event: &ProviderEvent, signature_valid: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: event.external_id.clone(),
            event_type: event.event_type.clone(),
            idempotency_key: event.idempotency_key.clone(),
            payload: event.payload.clone(),
            signature_valid,
            status: BankEventStatus::Pending,
            error: None,
            received_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Creates a log record for a signed delivery whose body does not
    /// parse. The raw bytes are preserved as a JSON string so the
    /// delivery stays auditable.
    pub fn malformed(raw: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id: None,
            event_type: "malformed".to_string(),
            idempotency_key: IdempotencyKey::new(hex::encode(Sha256::digest(raw))),
            payload: serde_json::Value::String(String::from_utf8_lossy(raw).into_owned()),
            signature_valid: true,
            status: BankEventStatus::Pending,
            error: None,
            received_at: Utc::now(),
            processed_at: None,
        }
    }
}

/// A parsed provider notification.
///
/// The envelope fields the pipeline needs are pulled out eagerly; the full
/// payload is kept verbatim for the handler and for the log.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub external_id: Option<String>,
    pub event_type: String,
    /// The provider's deal identifier, when present. Best-effort linkage
    /// for the dead letter queue.
    pub provider_deal_id: Option<String>,
    pub idempotency_key: IdempotencyKey,
    pub payload: serde_json::Value,
}

impl ProviderEvent {
    /// Parses a raw webhook body.
    ///
    /// The idempotency key is the provider's event id when one is present,
    /// otherwise a SHA-256 digest of the raw bytes — deterministic across
    /// redeliveries of the same body.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let payload: serde_json::Value = serde_json::from_slice(raw)?;

        let external_id = string_field(&payload, &["event_id", "id"]);
        let event_type = string_field(&payload, &["event", "type"])
            .unwrap_or_else(|| "unknown".to_string());
        let provider_deal_id = string_field(&payload, &["deal_id", "dealId"]);

        let idempotency_key = match &external_id {
            Some(id) => IdempotencyKey::new(id.clone()),
            None => IdempotencyKey::new(hex::encode(Sha256::digest(raw))),
        };

        Ok(Self {
            external_id,
            event_type,
            provider_deal_id,
            idempotency_key,
            payload,
        })
    }

    /// Looks up a string field in the payload body.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

fn string_field(payload: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
