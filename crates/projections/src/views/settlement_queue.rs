//! Settlement queue read model — the sweep worklist.
//!
//! Tracks, per deal, everything the periodic sweep needs to decide what is
//! due: hold expiry, confirmation deadline, milestone release schedule and
//! dispute escalation deadline. The view is rebuilt from the ledger on
//! startup and kept current from the write path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{DealEvent, DealStatus, DisputeStatus, EscalationLevel, MilestoneStatus};
use ledger::EventEnvelope;
use tokio::sync::RwLock;

use crate::Result;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

/// Milestone hold tracked for scheduled release.
#[derive(Debug, Clone)]
pub struct MilestoneHold {
    pub step_no: u32,
    pub status: MilestoneStatus,
    /// None for confirmation-triggered milestones; those release with the
    /// deal, not with the clock.
    pub release_scheduled_at: Option<DateTime<Utc>>,
}

/// Per-deal entry in the settlement queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub deal_id: AggregateId,
    pub status: DealStatus,
    pub dispute_locked: bool,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub confirmation_deadline: Option<DateTime<Utc>>,
    pub act_signed: bool,
    pub dispute_status: Option<DisputeStatus>,
    pub dispute_level: Option<EscalationLevel>,
    pub dispute_deadline: Option<DateTime<Utc>>,
    /// Status the deal resumes if the open dispute ends without a refund.
    pub dispute_resumed_from: Option<DealStatus>,
    pub milestones: Vec<MilestoneHold>,
    pub updated_at: DateTime<Utc>,
}

/// Read model view feeding the settlement sweep.
#[derive(Clone)]
pub struct SettlementQueueView {
    entries: Arc<RwLock<HashMap<AggregateId, QueueEntry>>>,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl SettlementQueueView {
    /// Creates a new empty queue view.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    /// Gets the entry for a specific deal.
    pub async fn get(&self, deal_id: AggregateId) -> Option<QueueEntry> {
        self.entries.read().await.get(&deal_id).cloned()
    }

    /// Deals whose hold window has elapsed and which are free to release.
    pub async fn expired_holds(&self, now: DateTime<Utc>) -> Vec<AggregateId> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| {
                e.status == DealStatus::HoldPeriod
                    && !e.dispute_locked
                    && e.hold_expires_at.is_some_and(|at| at <= now)
            })
            .map(|e| e.deal_id)
            .collect()
    }

    /// Deals past their client-confirmation deadline with no signature and
    /// no dispute.
    pub async fn expired_confirmations(&self, now: DateTime<Utc>) -> Vec<AggregateId> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| {
                e.status == DealStatus::AwaitingClientConfirmation
                    && !e.dispute_locked
                    && !e.act_signed
                    && e.confirmation_deadline.is_some_and(|at| at <= now)
            })
            .map(|e| e.deal_id)
            .collect()
    }

    /// Held milestones whose scheduled release time has arrived.
    pub async fn due_milestones(&self, now: DateTime<Utc>) -> Vec<(AggregateId, u32)> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| !e.dispute_locked)
            .flat_map(|e| {
                e.milestones
                    .iter()
                    .filter(|m| {
                        m.status == MilestoneStatus::Hold
                            && m.release_scheduled_at.is_some_and(|at| at <= now)
                    })
                    .map(|m| (e.deal_id, m.step_no))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Agency-level disputes past their review deadline, due for escalation.
    pub async fn overdue_disputes(&self, now: DateTime<Utc>) -> Vec<AggregateId> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| {
                e.dispute_status == Some(DisputeStatus::Open)
                    && e.dispute_level == Some(EscalationLevel::Agency)
                    && e.dispute_deadline.is_some_and(|at| at <= now)
            })
            .map(|e| e.deal_id)
            .collect()
    }

    async fn with_entry<F>(&self, deal_id: AggregateId, timestamp: DateTime<Utc>, f: F)
    where
        F: FnOnce(&mut QueueEntry),
    {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&deal_id) {
            f(entry);
            entry.updated_at = timestamp;
        }
    }
}

impl Default for SettlementQueueView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for SettlementQueueView {
    fn name(&self) -> &'static str {
        "SettlementQueueView"
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
                self.entries.write().await.insert(
                    deal_id,
                    QueueEntry {
                        deal_id,
                        status: DealStatus::Draft,
                        dispute_locked: false,
                        hold_expires_at: None,
                        confirmation_deadline: None,
                        act_signed: false,
                        dispute_status: None,
                        dispute_level: None,
                        dispute_deadline: None,
                        dispute_resumed_from: None,
                        milestones: data
                            .milestones
                            .iter()
                            .map(|m| MilestoneHold {
                                step_no: m.step_no,
                                status: MilestoneStatus::Pending,
                                release_scheduled_at: m.release_scheduled_at,
                            })
                            .collect(),
                        updated_at: data.created_at,
                    },
                );
            }
            DealEvent::SubmittedForSigning(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::AwaitingSignatures)
                    .await;
            }
            DealEvent::AllPartiesSigned(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::Signed)
                    .await;
            }
            DealEvent::InvoiceCreated(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::Invoiced)
                    .await;
            }
            DealEvent::PaymentPending(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::PaymentPending)
                    .await;
            }
            DealEvent::PaymentReceived(data) => {
                self.with_entry(deal_id, at, |e| {
                    e.status = DealStatus::HoldPeriod;
                    e.hold_expires_at = Some(data.hold_expires_at);
                })
                .await;
            }
            DealEvent::PaymentFailed(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::PaymentFailed)
                    .await;
            }
            DealEvent::ClientConfirmationRequested(data) => {
                self.with_entry(deal_id, at, |e| {
                    e.status = DealStatus::AwaitingClientConfirmation;
                    e.confirmation_deadline = Some(data.deadline);
                })
                .await;
            }
            DealEvent::CompletionActSigned(_) => {
                self.with_entry(deal_id, at, |e| {
                    e.status = DealStatus::PayoutReady;
                    e.act_signed = true;
                })
                .await;
            }
            DealEvent::ConfirmationWindowElapsed(_) | DealEvent::HoldExpired(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::PayoutReady)
                    .await;
            }
            DealEvent::PayoutStarted(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::PayoutInProgress)
                    .await;
            }
            DealEvent::FundsReleased(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::Closed)
                    .await;
            }
            DealEvent::DisputeOpened(data) => {
                self.with_entry(deal_id, at, |e| {
                    e.status = DealStatus::Dispute;
                    e.dispute_locked = true;
                    e.dispute_status = Some(DisputeStatus::Open);
                    e.dispute_level = Some(EscalationLevel::Agency);
                    e.dispute_deadline = Some(data.level_deadline);
                    e.dispute_resumed_from = Some(data.resumed_from);
                })
                .await;
            }
            DealEvent::DisputeEscalated(data) => {
                self.with_entry(deal_id, at, |e| {
                    e.dispute_status = Some(DisputeStatus::AgencyReview);
                    e.dispute_level = Some(data.level);
                    e.dispute_deadline = Some(data.level_deadline);
                })
                .await;
            }
            DealEvent::DisputeResolved(data) => {
                self.with_entry(deal_id, at, |e| {
                    e.dispute_locked = false;
                    e.dispute_status = Some(DisputeStatus::Resolved);
                    e.dispute_deadline = None;
                    if data.resolution == domain::DisputeResolution::FullRefund {
                        e.status = DealStatus::Refunded;
                    } else if let Some(resumed) = e.dispute_resumed_from.take() {
                        e.status = resumed.dispute_resumption();
                    }
                })
                .await;
            }
            DealEvent::DisputeCancelled(_) => {
                self.with_entry(deal_id, at, |e| {
                    e.dispute_locked = false;
                    e.dispute_status = Some(DisputeStatus::Cancelled);
                    e.dispute_deadline = None;
                    if let Some(resumed) = e.dispute_resumed_from.take() {
                        e.status = resumed.dispute_resumption();
                    }
                })
                .await;
            }
            DealEvent::MilestonePaid(data) => {
                self.with_entry(deal_id, at, |e| {
                    if let Some(m) = e.milestones.iter_mut().find(|m| m.step_no == data.step_no) {
                        m.status = MilestoneStatus::Paid;
                    }
                })
                .await;
            }
            DealEvent::MilestoneHeld(data) => {
                self.with_entry(deal_id, at, |e| {
                    if let Some(m) = e.milestones.iter_mut().find(|m| m.step_no == data.step_no) {
                        m.status = MilestoneStatus::Hold;
                        m.release_scheduled_at = data.release_scheduled_at;
                    }
                })
                .await;
            }
            DealEvent::MilestoneReleased(data) => {
                self.with_entry(deal_id, at, |e| {
                    if let Some(m) = e.milestones.iter_mut().find(|m| m.step_no == data.step_no) {
                        m.status = MilestoneStatus::Released;
                    }
                })
                .await;
            }
            DealEvent::MilestoneCancelled(data) => {
                self.with_entry(deal_id, at, |e| {
                    if let Some(m) = e.milestones.iter_mut().find(|m| m.step_no == data.step_no) {
                        m.status = MilestoneStatus::Cancelled;
                    }
                })
                .await;
            }
            DealEvent::DealCancelled(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::Cancelled)
                    .await;
            }
            DealEvent::DealReopened(_) => {
                self.with_entry(deal_id, at, |e| e.status = DealStatus::Draft)
                    .await;
            }
            // Events with no bearing on the sweep worklist
            DealEvent::RecipientRegistered(_)
            | DealEvent::PaymentLinkRegenerated(_)
            | DealEvent::SplitAdjusted(_) => {}
        }

        let mut pos = self.position.write().await;
        *pos = pos.advance();
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().await.clear();
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

impl ReadModel for SettlementQueueView {
    fn name(&self) -> &'static str {
        "SettlementQueueView"
    }

    fn count(&self) -> usize {
        // Sync trait over async storage; try_read is fine because the view
        // is only counted from diagnostics.
        self.entries.try_read().map(|e| e.len()).unwrap_or(0)
    }
}
