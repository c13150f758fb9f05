//! Status enums for deals, milestones, disputes and payouts.
//!
//! Each enum implements [`Lifecycle`]; its `allowed` table is the single
//! source of truth for which transitions exist.

use serde::{Deserialize, Serialize};

use crate::machine::Lifecycle;

/// Payment lifecycle status of a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStatus {
    #[default]
    Draft,
    AwaitingSignatures,
    Signed,
    Invoiced,
    PaymentPending,
    PaymentFailed,
    HoldPeriod,
    AwaitingClientConfirmation,
    PayoutReady,
    PayoutInProgress,
    Dispute,
    Refunded,
    Closed,
    Cancelled,
}

impl Lifecycle for DealStatus {
    fn allowed(self) -> &'static [Self] {
        use DealStatus::*;
        match self {
            Draft => &[AwaitingSignatures, Cancelled],
            AwaitingSignatures => &[Signed, Cancelled],
            Signed => &[Invoiced, Cancelled],
            Invoiced => &[PaymentPending, PaymentFailed, Cancelled],
            PaymentPending => &[HoldPeriod, PaymentFailed, Cancelled],
            PaymentFailed => &[Invoiced, Cancelled],
            HoldPeriod => &[AwaitingClientConfirmation, PayoutReady, Dispute, Cancelled],
            AwaitingClientConfirmation => &[PayoutReady, Dispute, Cancelled],
            PayoutReady => &[PayoutInProgress, Dispute],
            PayoutInProgress => &[Closed],
            Dispute => &[HoldPeriod, AwaitingClientConfirmation, Refunded, Cancelled],
            Refunded => &[],
            Closed => &[],
            // Reopening is further guarded by the aggregate: only deals
            // cancelled before signing may return to draft.
            Cancelled => &[Draft],
        }
    }
}

impl DealStatus {
    /// Status a deal resumes when its dispute ends without a refund,
    /// routed through the transition table. A pre-dispute status the
    /// table does not allow out of `dispute` (`payout_ready`) re-enters
    /// the hold; its already-elapsed window sends the deal back through
    /// the normal release path.
    pub fn dispute_resumption(self) -> DealStatus {
        if DealStatus::Dispute.check(self).is_ok() {
            self
        } else {
            DealStatus::HoldPeriod
        }
    }
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DealStatus::Draft => "draft",
            DealStatus::AwaitingSignatures => "awaiting_signatures",
            DealStatus::Signed => "signed",
            DealStatus::Invoiced => "invoiced",
            DealStatus::PaymentPending => "payment_pending",
            DealStatus::PaymentFailed => "payment_failed",
            DealStatus::HoldPeriod => "hold_period",
            DealStatus::AwaitingClientConfirmation => "awaiting_client_confirmation",
            DealStatus::PayoutReady => "payout_ready",
            DealStatus::PayoutInProgress => "payout_in_progress",
            DealStatus::Dispute => "dispute",
            DealStatus::Refunded => "refunded",
            DealStatus::Closed => "closed",
            DealStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Status of a single milestone payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Paid,
    Hold,
    Released,
    Cancelled,
}

impl Lifecycle for MilestoneStatus {
    fn allowed(self) -> &'static [Self] {
        use MilestoneStatus::*;
        match self {
            Pending => &[Paid, Cancelled],
            Paid => &[Hold, Cancelled],
            Hold => &[Released, Cancelled],
            Released => &[],
            Cancelled => &[],
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::Paid => "paid",
            MilestoneStatus::Hold => "hold",
            MilestoneStatus::Released => "released",
            MilestoneStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Status of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    AgencyReview,
    Resolved,
    Cancelled,
}

impl Lifecycle for DisputeStatus {
    fn allowed(self) -> &'static [Self] {
        use DisputeStatus::*;
        match self {
            Open => &[AgencyReview, Resolved, Cancelled],
            AgencyReview => &[Resolved, Cancelled],
            Resolved => &[],
            Cancelled => &[],
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisputeStatus::Open => "open",
            DisputeStatus::AgencyReview => "agency_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Review level a dispute is currently at. Time-driven escalation moves
/// it from agency to platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Agency,
    Platform,
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscalationLevel::Agency => "agency",
            EscalationLevel::Platform => "platform",
        };
        write!(f, "{s}")
    }
}

/// Payout status of a single split recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Hold,
    Released,
    Failed,
}

impl Lifecycle for PayoutStatus {
    fn allowed(self) -> &'static [Self] {
        use PayoutStatus::*;
        match self {
            Pending => &[Hold, Failed],
            Hold => &[Released, Failed],
            Released => &[],
            // Manual retry re-enters hold after the underlying problem is
            // fixed on the provider side.
            Failed => &[Hold],
        }
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Hold => "hold",
            PayoutStatus::Released => "released",
            PayoutStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
