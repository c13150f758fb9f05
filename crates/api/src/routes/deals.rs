//! Deal lifecycle and dispute endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{AggregateId, PartyId, TaxId};
use domain::{
    Aggregate, Deal, DisputeResolution, MilestoneSpec, Money, NewDeal, PaymentModel, Percent,
    RecipientRole, RecipientSpec, ReleaseTrigger, SplitRule,
};
use ledger::Ledger;
use orchestrator::{
    DealOrchestrator, DisputeManager, InMemoryESignService, InMemoryEspClient,
    InMemoryFiscalReceipts, InMemoryNotifier, ReleaseOutcome, SettlementEventHandler,
};
use projections::{DealBoardView, DealSummary, ProjectionProcessor};
use serde::{Deserialize, Serialize};
use webhook::{InMemoryBankEventStore, InMemoryDlqStore, WebhookIngestor};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<L: Ledger + Clone> {
    pub orchestrator: Arc<
        DealOrchestrator<
            L,
            InMemoryEspClient,
            InMemoryESignService,
            InMemoryNotifier,
            InMemoryFiscalReceipts,
        >,
    >,
    pub disputes: Arc<DisputeManager<L, InMemoryEspClient, InMemoryNotifier>>,
    pub ingestor:
        Arc<WebhookIngestor<InMemoryBankEventStore, InMemoryDlqStore, SettlementEventHandler<L>>>,
    pub deal_board: Arc<DealBoardView>,
    pub projection_processor: Arc<ProjectionProcessor<L>>,
    pub ledger: L,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateDealRequest {
    pub creator: Option<String>,
    pub payment_model: Option<String>,
    pub total_price_minor: i64,
    pub total_commission_minor: i64,
    #[serde(default)]
    pub recipients: Vec<RecipientRequest>,
    #[serde(default)]
    pub milestones: Vec<MilestoneRequest>,
}

#[derive(Deserialize)]
pub struct RecipientRequest {
    pub role: String,
    pub party_id: Option<String>,
    pub name: String,
    pub tax_id: Option<String>,
    pub percent_bps: Option<u32>,
    pub fixed_minor: Option<i64>,
}

#[derive(Deserialize)]
pub struct MilestoneRequest {
    pub step_no: u32,
    pub percent_bps: u32,
    pub trigger: String,
    pub release_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: String,
    pub cancelled_by: Option<String>,
}

#[derive(Deserialize)]
pub struct OpenDisputeRequest {
    pub initiator: String,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ResolveDisputeRequest {
    pub resolution: String,
    pub refund_amount_minor: Option<i64>,
    pub adjusted_amounts: Option<Vec<AdjustedAmountRequest>>,
}

#[derive(Deserialize)]
pub struct AdjustedAmountRequest {
    pub party_id: String,
    pub amount_minor: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct DealCreatedResponse {
    pub deal_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct DealResponse {
    pub id: String,
    pub status: String,
    pub payment_model: String,
    pub total_price_minor: i64,
    pub total_commission_minor: i64,
    pub payment_url: Option<String>,
    pub provider_deal_id: Option<String>,
    pub dispute_locked: bool,
    pub recipients: Vec<RecipientResponse>,
    pub milestones: Vec<MilestoneResponse>,
    pub dispute: Option<DisputeResponse>,
}

#[derive(Serialize)]
pub struct RecipientResponse {
    pub party_id: String,
    pub role: String,
    pub name: String,
    pub amount_minor: i64,
    pub payout_status: String,
    pub beneficiary_ref: Option<String>,
}

#[derive(Serialize)]
pub struct MilestoneResponse {
    pub step_no: u32,
    pub amount_minor: i64,
    pub trigger: String,
    pub status: String,
    pub release_scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
pub struct DisputeResponse {
    pub initiator: String,
    pub reason: String,
    pub status: String,
    pub level: String,
    pub level_deadline: chrono::DateTime<chrono::Utc>,
    pub resolution: Option<String>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub released: bool,
    pub status: String,
    pub deferred_reason: Option<String>,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

fn deal_response(deal: &Deal) -> DealResponse {
    DealResponse {
        id: deal.id().map(|id| id.to_string()).unwrap_or_default(),
        status: deal.status().to_string(),
        payment_model: deal.payment_model().to_string(),
        total_price_minor: deal.total_price().minor_units(),
        total_commission_minor: deal.total_commission().minor_units(),
        payment_url: deal.payment_url().map(String::from),
        provider_deal_id: deal.provider_deal_id().map(String::from),
        dispute_locked: deal.dispute_locked(),
        recipients: deal
            .recipients()
            .iter()
            .map(|r| RecipientResponse {
                party_id: r.party_id.to_string(),
                role: r.role.to_string(),
                name: r.name.clone(),
                amount_minor: r.calculated_amount.minor_units(),
                payout_status: r.payout_status.to_string(),
                beneficiary_ref: r.beneficiary_ref.clone(),
            })
            .collect(),
        milestones: deal
            .milestones()
            .iter()
            .map(|m| MilestoneResponse {
                step_no: m.step_no,
                amount_minor: m.amount.minor_units(),
                trigger: m.trigger.to_string(),
                status: m.status.to_string(),
                release_scheduled_at: m.release_scheduled_at,
            })
            .collect(),
        dispute: deal.dispute().map(|d| DisputeResponse {
            initiator: d.initiator.to_string(),
            reason: d.reason.clone(),
            status: d.status.to_string(),
            level: d.level.to_string(),
            level_deadline: d.level_deadline,
            resolution: d.resolution.map(|r| r.to_string()),
        }),
    }
}

// -- Parsing helpers --

fn parse_aggregate_id(raw: &str) -> Result<AggregateId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(AggregateId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid deal id: {e}")))
}

fn parse_party_id(raw: &str) -> Result<PartyId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(PartyId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid party id: {e}")))
}

fn parse_role(raw: &str) -> Result<RecipientRole, ApiError> {
    match raw {
        "agent" => Ok(RecipientRole::Agent),
        "agency" => Ok(RecipientRole::Agency),
        "lead" => Ok(RecipientRole::Lead),
        "platform_fee" => Ok(RecipientRole::PlatformFee),
        other => Err(ApiError::BadRequest(format!("Unknown role {other:?}"))),
    }
}

fn parse_trigger(raw: &str) -> Result<ReleaseTrigger, ApiError> {
    match raw {
        "immediate" => Ok(ReleaseTrigger::Immediate),
        "short_hold" => Ok(ReleaseTrigger::ShortHold),
        "confirmation" => Ok(ReleaseTrigger::Confirmation),
        "date" => Ok(ReleaseTrigger::Date),
        other => Err(ApiError::BadRequest(format!("Unknown trigger {other:?}"))),
    }
}

fn parse_resolution(raw: &str) -> Result<DisputeResolution, ApiError> {
    match raw {
        "full_refund" => Ok(DisputeResolution::FullRefund),
        "partial_refund" => Ok(DisputeResolution::PartialRefund),
        "no_refund" => Ok(DisputeResolution::NoRefund),
        "split_adjustment" => Ok(DisputeResolution::SplitAdjustment),
        other => Err(ApiError::BadRequest(format!(
            "Unknown resolution {other:?}"
        ))),
    }
}

fn parse_payment_model(raw: Option<&str>) -> Result<PaymentModel, ApiError> {
    match raw {
        None | Some("provider_split") => Ok(PaymentModel::ProviderSplit),
        Some("legacy_direct") => Ok(PaymentModel::LegacyDirect),
        Some(other) => Err(ApiError::BadRequest(format!(
            "Unknown payment model {other:?}"
        ))),
    }
}

fn recipient_spec(req: &RecipientRequest) -> Result<RecipientSpec, ApiError> {
    let role = parse_role(&req.role)?;
    let party_id = match &req.party_id {
        Some(raw) => parse_party_id(raw)?,
        None => PartyId::new(),
    };
    let rule = match (req.percent_bps, req.fixed_minor) {
        (Some(bps), None) => SplitRule::Percent(Percent::from_basis_points(bps)),
        (None, Some(minor)) => SplitRule::Fixed(Money::from_minor_units(minor)),
        _ => {
            return Err(ApiError::BadRequest(
                "Recipient needs exactly one of percent_bps or fixed_minor".to_string(),
            ));
        }
    };
    let mut spec = RecipientSpec::new(role, party_id, req.name.as_str(), rule);
    if let Some(raw) = &req.tax_id {
        let tax_id = TaxId::parse(raw)
            .map_err(|e| ApiError::BadRequest(format!("Invalid tax id: {e}")))?;
        spec = spec.with_tax_id(tax_id);
    }
    Ok(spec)
}

async fn load_deal<L: Ledger + Clone + 'static>(
    state: &AppState<L>,
    id: &str,
) -> Result<(AggregateId, Deal), ApiError> {
    let deal_id = parse_aggregate_id(id)?;
    let deal = state
        .orchestrator
        .get_deal(deal_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Deal {id} not found")))?;
    Ok((deal_id, deal))
}

// -- Handlers --

/// POST /deals — create a new deal with its split.
#[tracing::instrument(skip(state, req))]
pub async fn create<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<CreateDealRequest>,
) -> Result<(axum::http::StatusCode, Json<DealCreatedResponse>), ApiError> {
    let creator = match &req.creator {
        Some(raw) => parse_party_id(raw)?,
        None => PartyId::new(),
    };
    let recipients = req
        .recipients
        .iter()
        .map(recipient_spec)
        .collect::<Result<Vec<_>, _>>()?;
    let milestones = req
        .milestones
        .iter()
        .map(|m| {
            Ok(MilestoneSpec {
                step_no: m.step_no,
                percent: Percent::from_basis_points(m.percent_bps),
                trigger: parse_trigger(&m.trigger)?,
                release_at: m.release_at,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let input = NewDeal {
        creator,
        payment_model: parse_payment_model(req.payment_model.as_deref())?,
        total_price: Money::from_minor_units(req.total_price_minor),
        total_commission: Money::from_minor_units(req.total_commission_minor),
        recipients,
        milestones,
    };

    let result = state.orchestrator.create_deal(input).await?;
    let response = DealCreatedResponse {
        deal_id: result
            .aggregate
            .id()
            .map(|id| id.to_string())
            .unwrap_or_default(),
        status: result.aggregate.status().to_string(),
    };
    Ok((axum::http::StatusCode::CREATED, Json(response)))
}

/// GET /deals/:id — load a deal aggregate by ID.
#[tracing::instrument(skip(state))]
pub async fn get<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let (_, deal) = load_deal(&state, &id).await?;
    Ok(Json(deal_response(&deal)))
}

/// GET /deals — list deals from the board projection.
#[tracing::instrument(skip(state))]
pub async fn list<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
) -> Result<Json<Vec<DealSummary>>, ApiError> {
    state
        .projection_processor
        .run_catch_up()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(state.deal_board.get_all_deals().await))
}

/// GET /deals/:id/events — the deal's ledger history.
#[tracing::instrument(skip(state))]
pub async fn events<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let envelopes = state
        .ledger
        .events_for_aggregate(deal_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if envelopes.is_empty() {
        return Err(ApiError::NotFound(format!("Deal {id} not found")));
    }
    Ok(Json(
        envelopes
            .into_iter()
            .map(|e| EventResponse {
                event_id: e.event_id.to_string(),
                event_type: e.event_type,
                version: e.version.as_i64(),
                timestamp: e.timestamp,
            })
            .collect(),
    ))
}

/// POST /deals/:id/submit — send the deal out for signatures.
#[tracing::instrument(skip(state))]
pub async fn submit<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.submit_for_signing(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/sign — record signature completion.
#[tracing::instrument(skip(state))]
pub async fn sign<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.mark_signed(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/invoice — create the provider deal and payment link.
#[tracing::instrument(skip(state))]
pub async fn invoice<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.create_invoice(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/link — issue a fresh payment link.
#[tracing::instrument(skip(state))]
pub async fn regenerate_link<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.regenerate_payment_link(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/retry-invoice — re-issue after a failed payment.
#[tracing::instrument(skip(state))]
pub async fn retry_invoice<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.retry_invoice(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/confirmation — ask the client to sign the
/// completion act.
#[tracing::instrument(skip(state))]
pub async fn request_confirmation<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.request_client_confirmation(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/act-signed — record the client's completion signature.
#[tracing::instrument(skip(state))]
pub async fn act_signed<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.record_act_signed(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/release — release settlement funds.
#[tracing::instrument(skip(state, req))]
pub async fn release<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let (deal_id, deal) = load_deal(&state, &id).await?;
    let outcome = if deal.status() == domain::DealStatus::PayoutReady {
        state.orchestrator.release(deal_id).await?
    } else {
        state
            .orchestrator
            .release_after_hold(deal_id, chrono::Utc::now(), req.force)
            .await?
    };

    let response = match outcome {
        ReleaseOutcome::Released(result) => ReleaseResponse {
            released: true,
            status: result.aggregate.status().to_string(),
            deferred_reason: None,
        },
        ReleaseOutcome::Deferred { reason } => ReleaseResponse {
            released: false,
            status: domain::DealStatus::PayoutReady.to_string(),
            deferred_reason: Some(reason),
        },
    };
    Ok(Json(response))
}

/// POST /deals/:id/cancel — cancel a deal.
#[tracing::instrument(skip(state, req))]
pub async fn cancel<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let cancelled_by = req
        .cancelled_by
        .as_deref()
        .map(parse_party_id)
        .transpose()?;
    let result = state
        .orchestrator
        .cancel_deal(deal_id, req.reason, cancelled_by)
        .await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/reopen — return an early-cancelled deal to draft.
#[tracing::instrument(skip(state))]
pub async fn reopen<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.orchestrator.reopen_deal(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/disputes — open a dispute.
#[tracing::instrument(skip(state, req))]
pub async fn open_dispute<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<OpenDisputeRequest>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let initiator = parse_party_id(&req.initiator)?;
    let result = state.disputes.open(deal_id, initiator, req.reason).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/disputes/escalate — escalate to platform review.
#[tracing::instrument(skip(state))]
pub async fn escalate_dispute<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.disputes.escalate(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/disputes/resolve — resolve the open dispute.
#[tracing::instrument(skip(state, req))]
pub async fn resolve_dispute<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(req): Json<ResolveDisputeRequest>,
) -> Result<Json<DealResponse>, ApiError> {
    let (deal_id, deal) = load_deal(&state, &id).await?;
    let resolution = parse_resolution(&req.resolution)?;
    let refund_amount = req.refund_amount_minor.map(Money::from_minor_units);

    let adjusted_recipients = match &req.adjusted_amounts {
        None => None,
        Some(amounts) => {
            let mut recipients = deal.recipients().to_vec();
            for adjustment in amounts {
                let party_id = parse_party_id(&adjustment.party_id)?;
                let recipient = recipients
                    .iter_mut()
                    .find(|r| r.party_id == party_id)
                    .ok_or_else(|| {
                        ApiError::BadRequest(format!(
                            "Party {} is not a recipient of this deal",
                            adjustment.party_id
                        ))
                    })?;
                recipient.calculated_amount = Money::from_minor_units(adjustment.amount_minor);
            }
            Some(recipients)
        }
    };

    let result = state
        .disputes
        .resolve(deal_id, resolution, refund_amount, adjusted_recipients)
        .await?;
    Ok(Json(deal_response(&result.aggregate)))
}

/// POST /deals/:id/disputes/cancel — withdraw the open dispute.
#[tracing::instrument(skip(state))]
pub async fn cancel_dispute<L: Ledger + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<DealResponse>, ApiError> {
    let deal_id = parse_aggregate_id(&id)?;
    let result = state.disputes.cancel(deal_id).await?;
    Ok(Json(deal_response(&result.aggregate)))
}
