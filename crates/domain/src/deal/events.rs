//! Deal domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, PartyId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::status::{DealStatus, EscalationLevel};
use super::value_objects::{
    DisputeResolution, Milestone, Money, PaymentModel, SplitRecipient,
};

/// Events that can occur on a deal aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DealEvent {
    /// Deal was created in draft with its calculated split.
    DealCreated(DealCreatedData),

    /// Deal was sent out for signature collection.
    SubmittedForSigning(SubmittedForSigningData),

    /// Every required party has signed the contract.
    AllPartiesSigned(AllPartiesSignedData),

    /// A recipient was registered with the provider.
    RecipientRegistered(RecipientRegisteredData),

    /// Provider-side deal and payment link were created.
    InvoiceCreated(InvoiceCreatedData),

    /// An expired payment link was replaced.
    PaymentLinkRegenerated(PaymentLinkRegeneratedData),

    /// Provider reported the payment as started.
    PaymentPending(PaymentPendingData),

    /// Funds arrived in the provider's nominal account.
    PaymentReceived(PaymentReceivedData),

    /// The payment attempt failed.
    PaymentFailed(PaymentFailedData),

    /// The client was asked to sign the completion acknowledgment.
    ClientConfirmationRequested(ClientConfirmationRequestedData),

    /// The client signed the completion acknowledgment.
    CompletionActSigned(CompletionActSignedData),

    /// The confirmation window elapsed without signature or dispute.
    ConfirmationWindowElapsed(ConfirmationWindowElapsedData),

    /// The hold window elapsed without dispute.
    HoldExpired(HoldExpiredData),

    /// Provider-side disbursement was started.
    PayoutStarted(PayoutStartedData),

    /// Funds were disbursed to every recipient; the deal is closed.
    FundsReleased(FundsReleasedData),

    /// A participant opened a dispute, locking the deal.
    DisputeOpened(DisputeOpenedData),

    /// The dispute escalated to the next review level.
    DisputeEscalated(DisputeEscalatedData),

    /// The dispute was resolved.
    DisputeResolved(DisputeResolvedData),

    /// The initiator withdrew the dispute.
    DisputeCancelled(DisputeCancelledData),

    /// Recipient amounts were replaced after a dispute adjustment.
    SplitAdjusted(SplitAdjustedData),

    /// A milestone's payment arrived.
    MilestonePaid(MilestonePaidData),

    /// A paid milestone entered its hold window.
    MilestoneHeld(MilestoneHeldData),

    /// A milestone's funds were released.
    MilestoneReleased(MilestoneReleasedData),

    /// A milestone was cancelled.
    MilestoneCancelled(MilestoneCancelledData),

    /// The deal was cancelled.
    DealCancelled(DealCancelledData),

    /// An early-cancelled deal was returned to draft.
    DealReopened(DealReopenedData),
}

impl DomainEvent for DealEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DealEvent::DealCreated(_) => "DealCreated",
            DealEvent::SubmittedForSigning(_) => "SubmittedForSigning",
            DealEvent::AllPartiesSigned(_) => "AllPartiesSigned",
            DealEvent::RecipientRegistered(_) => "RecipientRegistered",
            DealEvent::InvoiceCreated(_) => "InvoiceCreated",
            DealEvent::PaymentLinkRegenerated(_) => "PaymentLinkRegenerated",
            DealEvent::PaymentPending(_) => "PaymentPending",
            DealEvent::PaymentReceived(_) => "PaymentReceived",
            DealEvent::PaymentFailed(_) => "PaymentFailed",
            DealEvent::ClientConfirmationRequested(_) => "ClientConfirmationRequested",
            DealEvent::CompletionActSigned(_) => "CompletionActSigned",
            DealEvent::ConfirmationWindowElapsed(_) => "ConfirmationWindowElapsed",
            DealEvent::HoldExpired(_) => "HoldExpired",
            DealEvent::PayoutStarted(_) => "PayoutStarted",
            DealEvent::FundsReleased(_) => "FundsReleased",
            DealEvent::DisputeOpened(_) => "DisputeOpened",
            DealEvent::DisputeEscalated(_) => "DisputeEscalated",
            DealEvent::DisputeResolved(_) => "DisputeResolved",
            DealEvent::DisputeCancelled(_) => "DisputeCancelled",
            DealEvent::SplitAdjusted(_) => "SplitAdjusted",
            DealEvent::MilestonePaid(_) => "MilestonePaid",
            DealEvent::MilestoneHeld(_) => "MilestoneHeld",
            DealEvent::MilestoneReleased(_) => "MilestoneReleased",
            DealEvent::MilestoneCancelled(_) => "MilestoneCancelled",
            DealEvent::DealCancelled(_) => "DealCancelled",
            DealEvent::DealReopened(_) => "DealReopened",
        }
    }
}

/// Data for DealCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealCreatedData {
    /// The unique deal ID.
    pub deal_id: AggregateId,

    /// The agent who created the deal.
    pub creator: PartyId,

    /// Which payment workflow governs the deal.
    pub payment_model: PaymentModel,

    /// Full property price.
    pub total_price: Money,

    /// Commission to be split among recipients.
    pub total_commission: Money,

    /// Recipients with their calculated amounts.
    pub recipients: Vec<SplitRecipient>,

    /// Milestone schedule, empty for a single implicit payment.
    pub milestones: Vec<Milestone>,

    /// When the deal was created.
    pub created_at: DateTime<Utc>,
}

/// Data for SubmittedForSigning event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedForSigningData {
    pub submitted_at: DateTime<Utc>,
}

/// Data for AllPartiesSigned event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllPartiesSignedData {
    pub signed_at: DateTime<Utc>,
}

/// Data for RecipientRegistered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRegisteredData {
    /// The recipient that was registered.
    pub party_id: PartyId,

    /// Beneficiary reference assigned by the provider.
    pub beneficiary_ref: String,

    pub registered_at: DateTime<Utc>,
}

/// Data for InvoiceCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceCreatedData {
    /// Provider-side deal reference; absent for direct-payment deals,
    /// which settle outside the provider.
    pub provider_deal_id: Option<String>,

    /// Payment URL handed to the client; absent for direct-payment deals.
    pub payment_url: Option<String>,

    /// When the payment link expires.
    pub link_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Data for PaymentLinkRegenerated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLinkRegeneratedData {
    pub payment_url: String,
    pub link_expires_at: Option<DateTime<Utc>>,
    pub regenerated_at: DateTime<Utc>,
}

/// Data for PaymentPending event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentPendingData {
    pub at: DateTime<Utc>,
}

/// Data for PaymentReceived event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceivedData {
    /// Amount confirmed by the provider.
    pub amount: Money,

    /// Provider-side transaction reference.
    pub transaction_id: String,

    /// End of the dispute window computed at receipt time.
    pub hold_expires_at: DateTime<Utc>,

    pub received_at: DateTime<Utc>,
}

/// Data for PaymentFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Data for ClientConfirmationRequested event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfirmationRequestedData {
    /// Deadline after which the release happens without the client.
    pub deadline: DateTime<Utc>,

    pub requested_at: DateTime<Utc>,
}

/// Data for CompletionActSigned event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionActSignedData {
    pub signed_at: DateTime<Utc>,
}

/// Data for ConfirmationWindowElapsed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationWindowElapsedData {
    pub elapsed_at: DateTime<Utc>,
}

/// Data for HoldExpired event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldExpiredData {
    pub expired_at: DateTime<Utc>,
}

/// Data for PayoutStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutStartedData {
    pub started_at: DateTime<Utc>,
}

/// Data for FundsReleased event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundsReleasedData {
    pub released_at: DateTime<Utc>,
}

/// Data for DisputeOpened event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeOpenedData {
    /// The participant who opened the dispute.
    pub initiator: PartyId,

    /// Free-form reason given by the initiator.
    pub reason: String,

    /// Deadline for the agency review level.
    pub level_deadline: DateTime<Utc>,

    /// Status the deal returns to if the dispute ends without a refund.
    pub resumed_from: DealStatus,

    pub opened_at: DateTime<Utc>,
}

/// Data for DisputeEscalated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeEscalatedData {
    /// The review level the dispute escalated to.
    pub level: EscalationLevel,

    /// Deadline for the new level.
    pub level_deadline: DateTime<Utc>,

    pub escalated_at: DateTime<Utc>,
}

/// Data for DisputeResolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeResolvedData {
    pub resolution: DisputeResolution,

    /// Present for partial refunds.
    pub refund_amount: Option<Money>,

    pub resolved_at: DateTime<Utc>,
}

/// Data for DisputeCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeCancelledData {
    pub cancelled_at: DateTime<Utc>,
}

/// Data for SplitAdjusted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAdjustedData {
    /// The replacement recipient set with recalculated amounts.
    pub recipients: Vec<SplitRecipient>,

    pub adjusted_at: DateTime<Utc>,
}

/// Data for MilestonePaid event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestonePaidData {
    pub step_no: u32,
    pub paid_at: DateTime<Utc>,
}

/// Data for MilestoneHeld event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneHeldData {
    pub step_no: u32,

    /// When the hold becomes eligible for release, None for
    /// confirmation-triggered milestones.
    pub release_scheduled_at: Option<DateTime<Utc>>,

    pub held_at: DateTime<Utc>,
}

/// Data for MilestoneReleased event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneReleasedData {
    pub step_no: u32,
    pub released_at: DateTime<Utc>,
}

/// Data for MilestoneCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneCancelledData {
    pub step_no: u32,
    pub cancelled_at: DateTime<Utc>,
}

/// Data for DealCancelled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealCancelledData {
    /// Reason for cancellation.
    pub reason: String,

    /// Who cancelled the deal, None for system cancellation.
    pub cancelled_by: Option<PartyId>,

    /// Status the deal held before cancellation; reopening is only
    /// permitted when this is draft or awaiting_signatures.
    pub cancelled_from: DealStatus,

    pub cancelled_at: DateTime<Utc>,
}

/// Data for DealReopened event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealReopenedData {
    pub reopened_at: DateTime<Utc>,
}

// Convenience constructors for events
impl DealEvent {
    pub fn deal_created(
        deal_id: AggregateId,
        creator: PartyId,
        payment_model: PaymentModel,
        total_price: Money,
        total_commission: Money,
        recipients: Vec<SplitRecipient>,
        milestones: Vec<Milestone>,
    ) -> Self {
        DealEvent::DealCreated(DealCreatedData {
            deal_id,
            creator,
            payment_model,
            total_price,
            total_commission,
            recipients,
            milestones,
            created_at: Utc::now(),
        })
    }

    pub fn submitted_for_signing() -> Self {
        DealEvent::SubmittedForSigning(SubmittedForSigningData {
            submitted_at: Utc::now(),
        })
    }

    pub fn all_parties_signed() -> Self {
        DealEvent::AllPartiesSigned(AllPartiesSignedData {
            signed_at: Utc::now(),
        })
    }

    pub fn recipient_registered(party_id: PartyId, beneficiary_ref: impl Into<String>) -> Self {
        DealEvent::RecipientRegistered(RecipientRegisteredData {
            party_id,
            beneficiary_ref: beneficiary_ref.into(),
            registered_at: Utc::now(),
        })
    }

    pub fn invoice_created(
        provider_deal_id: Option<String>,
        payment_url: Option<String>,
        link_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        DealEvent::InvoiceCreated(InvoiceCreatedData {
            provider_deal_id,
            payment_url,
            link_expires_at,
            created_at: Utc::now(),
        })
    }

    pub fn payment_link_regenerated(
        payment_url: impl Into<String>,
        link_expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        DealEvent::PaymentLinkRegenerated(PaymentLinkRegeneratedData {
            payment_url: payment_url.into(),
            link_expires_at,
            regenerated_at: Utc::now(),
        })
    }

    pub fn payment_pending() -> Self {
        DealEvent::PaymentPending(PaymentPendingData { at: Utc::now() })
    }

    pub fn payment_received(
        amount: Money,
        transaction_id: impl Into<String>,
        hold_expires_at: DateTime<Utc>,
    ) -> Self {
        DealEvent::PaymentReceived(PaymentReceivedData {
            amount,
            transaction_id: transaction_id.into(),
            hold_expires_at,
            received_at: Utc::now(),
        })
    }

    pub fn payment_failed(reason: impl Into<String>) -> Self {
        DealEvent::PaymentFailed(PaymentFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    pub fn client_confirmation_requested(deadline: DateTime<Utc>) -> Self {
        DealEvent::ClientConfirmationRequested(ClientConfirmationRequestedData {
            deadline,
            requested_at: Utc::now(),
        })
    }

    pub fn completion_act_signed() -> Self {
        DealEvent::CompletionActSigned(CompletionActSignedData {
            signed_at: Utc::now(),
        })
    }

    pub fn confirmation_window_elapsed() -> Self {
        DealEvent::ConfirmationWindowElapsed(ConfirmationWindowElapsedData {
            elapsed_at: Utc::now(),
        })
    }

    pub fn hold_expired() -> Self {
        DealEvent::HoldExpired(HoldExpiredData {
            expired_at: Utc::now(),
        })
    }

    pub fn payout_started() -> Self {
        DealEvent::PayoutStarted(PayoutStartedData {
            started_at: Utc::now(),
        })
    }

    pub fn funds_released() -> Self {
        DealEvent::FundsReleased(FundsReleasedData {
            released_at: Utc::now(),
        })
    }

    pub fn dispute_opened(
        initiator: PartyId,
        reason: impl Into<String>,
        level_deadline: DateTime<Utc>,
        resumed_from: DealStatus,
    ) -> Self {
        DealEvent::DisputeOpened(DisputeOpenedData {
            initiator,
            reason: reason.into(),
            level_deadline,
            resumed_from,
            opened_at: Utc::now(),
        })
    }

    pub fn dispute_escalated(level: EscalationLevel, level_deadline: DateTime<Utc>) -> Self {
        DealEvent::DisputeEscalated(DisputeEscalatedData {
            level,
            level_deadline,
            escalated_at: Utc::now(),
        })
    }

    pub fn dispute_resolved(resolution: DisputeResolution, refund_amount: Option<Money>) -> Self {
        DealEvent::DisputeResolved(DisputeResolvedData {
            resolution,
            refund_amount,
            resolved_at: Utc::now(),
        })
    }

    pub fn dispute_cancelled() -> Self {
        DealEvent::DisputeCancelled(DisputeCancelledData {
            cancelled_at: Utc::now(),
        })
    }

    pub fn split_adjusted(recipients: Vec<SplitRecipient>) -> Self {
        DealEvent::SplitAdjusted(SplitAdjustedData {
            recipients,
            adjusted_at: Utc::now(),
        })
    }

    pub fn milestone_paid(step_no: u32) -> Self {
        DealEvent::MilestonePaid(MilestonePaidData {
            step_no,
            paid_at: Utc::now(),
        })
    }

    pub fn milestone_held(step_no: u32, release_scheduled_at: Option<DateTime<Utc>>) -> Self {
        DealEvent::MilestoneHeld(MilestoneHeldData {
            step_no,
            release_scheduled_at,
            held_at: Utc::now(),
        })
    }

    pub fn milestone_released(step_no: u32) -> Self {
        DealEvent::MilestoneReleased(MilestoneReleasedData {
            step_no,
            released_at: Utc::now(),
        })
    }

    pub fn milestone_cancelled(step_no: u32) -> Self {
        DealEvent::MilestoneCancelled(MilestoneCancelledData {
            step_no,
            cancelled_at: Utc::now(),
        })
    }

    pub fn deal_cancelled(
        reason: impl Into<String>,
        cancelled_by: Option<PartyId>,
        cancelled_from: DealStatus,
    ) -> Self {
        DealEvent::DealCancelled(DealCancelledData {
            reason: reason.into(),
            cancelled_by,
            cancelled_from,
            cancelled_at: Utc::now(),
        })
    }

    pub fn deal_reopened() -> Self {
        DealEvent::DealReopened(DealReopenedData {
            reopened_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        let event = DealEvent::submitted_for_signing();
        assert_eq!(event.event_type(), "SubmittedForSigning");

        let event = DealEvent::payment_received(
            Money::from_minor_units(100_000),
            "txn-1",
            Utc::now(),
        );
        assert_eq!(event.event_type(), "PaymentReceived");

        let event = DealEvent::dispute_opened(
            PartyId::new(),
            "service not delivered",
            Utc::now(),
            DealStatus::HoldPeriod,
        );
        assert_eq!(event.event_type(), "DisputeOpened");

        let event = DealEvent::deal_cancelled("client request", None, DealStatus::Draft);
        assert_eq!(event.event_type(), "DealCancelled");
    }

    #[test]
    fn test_event_serialization() {
        let event = DealEvent::payment_received(
            Money::from_minor_units(250_000),
            "txn-42",
            Utc::now(),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PaymentReceived"));

        let deserialized: DealEvent = serde_json::from_str(&json).unwrap();
        if let DealEvent::PaymentReceived(data) = deserialized {
            assert_eq!(data.amount.minor_units(), 250_000);
            assert_eq!(data.transaction_id, "txn-42");
        } else {
            panic!("Expected PaymentReceived event");
        }
    }

    #[test]
    fn test_dispute_resolved_serialization() {
        let event = DealEvent::dispute_resolved(
            DisputeResolution::PartialRefund,
            Some(Money::from_minor_units(30_000)),
        );

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: DealEvent = serde_json::from_str(&json).unwrap();

        if let DealEvent::DisputeResolved(data) = deserialized {
            assert_eq!(data.resolution, DisputeResolution::PartialRefund);
            assert_eq!(data.refund_amount, Some(Money::from_minor_units(30_000)));
        } else {
            panic!("Expected DisputeResolved event");
        }
    }
}
