//! Deal board read model — denormalized deal summaries for the API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, PartyId};
use domain::{DealEvent, DealStatus, Money, PayoutStatus, RecipientRole};
use ledger::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Recipient line on the board.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientSummary {
    pub party_id: PartyId,
    pub role: RecipientRole,
    pub name: String,
    pub amount: Money,
    pub payout_status: PayoutStatus,
}

/// Denormalized summary of one deal.
#[derive(Debug, Clone, Serialize)]
pub struct DealSummary {
    pub deal_id: AggregateId,
    pub creator: PartyId,
    pub status: DealStatus,
    pub total_price: Money,
    pub total_commission: Money,
    pub recipients: Vec<RecipientSummary>,
    pub payment_url: Option<String>,
    pub dispute_locked: bool,
    #[serde(skip)]
    dispute_resumed_from: Option<DealStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read model view of all deals, keyed by id.
#[derive(Clone)]
pub struct DealBoardView {
    deals: Arc<RwLock<HashMap<AggregateId, DealSummary>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl DealBoardView {
    /// Creates a new empty board.
    pub fn new() -> Self {
        Self {
            deals: Arc::new(RwLock::new(HashMap::new())),
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    /// Gets a summary of a specific deal.
    pub async fn get_deal(&self, deal_id: AggregateId) -> Option<DealSummary> {
        self.deals.read().await.get(&deal_id).cloned()
    }

    /// Gets all deals, newest first.
    pub async fn get_all_deals(&self) -> Vec<DealSummary> {
        let mut deals: Vec<_> = self.deals.read().await.values().cloned().collect();
        deals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deals
    }

    /// Gets deals in a given status.
    pub async fn get_deals_by_status(&self, status: DealStatus) -> Vec<DealSummary> {
        self.deals
            .read()
            .await
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect()
    }

    /// Gets deals a party participates in, as creator or recipient.
    pub async fn get_deals_for_party(&self, party_id: PartyId) -> Vec<DealSummary> {
        self.deals
            .read()
            .await
            .values()
            .filter(|d| {
                d.creator == party_id || d.recipients.iter().any(|r| r.party_id == party_id)
            })
            .cloned()
            .collect()
    }

    async fn with_deal<F>(&self, deal_id: AggregateId, timestamp: DateTime<Utc>, f: F)
    where
        F: FnOnce(&mut DealSummary),
    {
        let mut deals = self.deals.write().await;
        if let Some(deal) = deals.get_mut(&deal_id) {
            f(deal);
            deal.updated_at = timestamp;
        }
    }
}

impl Default for DealBoardView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for DealBoardView {
    fn name(&self) -> &'static str {
        "DealBoardView"
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        if event.aggregate_type != "Deal" {
            let mut pos = self.position.write().await;
            *pos = pos.advance();
            return Ok(());
        }

        let deal_event: DealEvent = serde_json::from_value(event.payload.clone())?;
        let deal_id = event.aggregate_id;
        let at = event.timestamp;

        match deal_event {
            DealEvent::DealCreated(data) => {
                self.deals.write().await.insert(
                    deal_id,
                    DealSummary {
                        deal_id,
                        creator: data.creator,
                        status: DealStatus::Draft,
                        total_price: data.total_price,
                        total_commission: data.total_commission,
                        recipients: data
                            .recipients
                            .iter()
                            .map(|r| RecipientSummary {
                                party_id: r.party_id,
                                role: r.role,
                                name: r.name.clone(),
                                amount: r.calculated_amount,
                                payout_status: r.payout_status,
                            })
                            .collect(),
                        payment_url: None,
                        dispute_locked: false,
                        dispute_resumed_from: None,
                        created_at: data.created_at,
                        updated_at: data.created_at,
                    },
                );
            }
            DealEvent::SubmittedForSigning(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::AwaitingSignatures)
                    .await;
            }
            DealEvent::AllPartiesSigned(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::Signed)
                    .await;
            }
            DealEvent::InvoiceCreated(data) => {
                self.with_deal(deal_id, at, |d| {
                    d.status = DealStatus::Invoiced;
                    d.payment_url = data.payment_url;
                })
                .await;
            }
            DealEvent::PaymentLinkRegenerated(data) => {
                self.with_deal(deal_id, at, |d| d.payment_url = Some(data.payment_url))
                    .await;
            }
            DealEvent::PaymentPending(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::PaymentPending)
                    .await;
            }
            DealEvent::PaymentReceived(_) => {
                self.with_deal(deal_id, at, |d| {
                    d.status = DealStatus::HoldPeriod;
                    for r in &mut d.recipients {
                        r.payout_status = PayoutStatus::Hold;
                    }
                })
                .await;
            }
            DealEvent::PaymentFailed(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::PaymentFailed)
                    .await;
            }
            DealEvent::ClientConfirmationRequested(_) => {
                self.with_deal(deal_id, at, |d| {
                    d.status = DealStatus::AwaitingClientConfirmation;
                })
                .await;
            }
            DealEvent::CompletionActSigned(_)
            | DealEvent::ConfirmationWindowElapsed(_)
            | DealEvent::HoldExpired(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::PayoutReady)
                    .await;
            }
            DealEvent::PayoutStarted(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::PayoutInProgress)
                    .await;
            }
            DealEvent::FundsReleased(_) => {
                self.with_deal(deal_id, at, |d| {
                    d.status = DealStatus::Closed;
                    for r in &mut d.recipients {
                        r.payout_status = PayoutStatus::Released;
                    }
                })
                .await;
            }
            DealEvent::DisputeOpened(data) => {
                self.with_deal(deal_id, at, |d| {
                    d.status = DealStatus::Dispute;
                    d.dispute_locked = true;
                    d.dispute_resumed_from = Some(data.resumed_from);
                })
                .await;
            }
            DealEvent::DisputeResolved(data) => {
                self.with_deal(deal_id, at, |d| {
                    d.dispute_locked = false;
                    if data.resolution == domain::DisputeResolution::FullRefund {
                        d.status = DealStatus::Refunded;
                        d.dispute_resumed_from = None;
                    } else if let Some(resumed) = d.dispute_resumed_from.take() {
                        d.status = resumed.dispute_resumption();
                    }
                })
                .await;
            }
            DealEvent::DisputeCancelled(_) => {
                self.with_deal(deal_id, at, |d| {
                    d.dispute_locked = false;
                    if let Some(resumed) = d.dispute_resumed_from.take() {
                        d.status = resumed.dispute_resumption();
                    }
                })
                .await;
            }
            DealEvent::SplitAdjusted(data) => {
                self.with_deal(deal_id, at, |d| {
                    d.recipients = data
                        .recipients
                        .iter()
                        .map(|r| RecipientSummary {
                            party_id: r.party_id,
                            role: r.role,
                            name: r.name.clone(),
                            amount: r.calculated_amount,
                            payout_status: r.payout_status,
                        })
                        .collect();
                })
                .await;
            }
            DealEvent::DealCancelled(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::Cancelled)
                    .await;
            }
            DealEvent::DealReopened(_) => {
                self.with_deal(deal_id, at, |d| d.status = DealStatus::Draft)
                    .await;
            }
            // Recipient registration and milestone progress do not change
            // the board columns.
            DealEvent::RecipientRegistered(_)
            | DealEvent::DisputeEscalated(_)
            | DealEvent::MilestonePaid(_)
            | DealEvent::MilestoneHeld(_)
            | DealEvent::MilestoneReleased(_)
            | DealEvent::MilestoneCancelled(_) => {}
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance();
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.deals.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for DealBoardView {
    fn name(&self) -> &'static str {
        "DealBoardView"
    }

    fn count(&self) -> usize {
        self.deals.try_read().map(|d| d.len()).unwrap_or(0)
    }
}
