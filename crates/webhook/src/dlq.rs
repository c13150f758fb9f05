//! Dead letter queue entry for failed webhook processing.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::BankEvent;

/// One failed delivery, parked for retry or manual resolution.
///
/// The entry carries its own copy of the payload so an operator can inspect
/// it without joining back to the log; the original [`BankEvent`] row is
/// never mutated beyond its status fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub bank_event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub error: String,
    /// Best-effort linkage to the affected deal, when the handler could
    /// identify one before failing.
    pub deal_id: Option<AggregateId>,
    pub retry_count: u32,
    pub resolved: bool,
    pub resolution_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Creates an entry for a failed bank event.
    pub fn for_failure(event: &BankEvent, error: &str, deal_id: Option<AggregateId>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            bank_event_id: event.id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            error: error.to_string(),
            deal_id,
            retry_count: 0,
            resolved: false,
            resolution_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}
