//! Deal aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod service;
mod status;
mod value_objects;

pub use aggregate::Deal;
pub use commands::*;
pub use events::{
    AllPartiesSignedData, ClientConfirmationRequestedData, CompletionActSignedData,
    ConfirmationWindowElapsedData, DealCancelledData, DealCreatedData, DealEvent, DealReopenedData,
    DisputeCancelledData, DisputeEscalatedData, DisputeOpenedData, DisputeResolvedData,
    FundsReleasedData, HoldExpiredData, InvoiceCreatedData, MilestoneCancelledData,
    MilestoneHeldData, MilestonePaidData, MilestoneReleasedData, PaymentFailedData,
    PaymentLinkRegeneratedData, PaymentPendingData, PaymentReceivedData, PayoutStartedData,
    RecipientRegisteredData, SplitAdjustedData, SubmittedForSigningData,
};
pub use service::DealService;
pub use status::{DealStatus, DisputeStatus, EscalationLevel, MilestoneStatus, PayoutStatus};
pub use value_objects::{
    DisputeRecord, DisputeResolution, Milestone, MilestoneSpec, Money, NewDeal, PaymentModel,
    Percent, RecipientRole, RecipientSpec, ReleaseTrigger, SplitRecipient, SplitRule,
};

use chrono::{DateTime, Utc};
use common::PartyId;
use thiserror::Error;

use crate::machine::InvalidTransition;
use crate::split::SplitError;

/// Errors that can occur during deal operations.
#[derive(Debug, Error)]
pub enum DealError {
    /// Attempted status change not in the deal allow-table.
    #[error(transparent)]
    Transition(#[from] InvalidTransition<DealStatus>),

    /// Attempted milestone status change not in its allow-table.
    #[error("milestone {step_no}: {source}")]
    MilestoneTransition {
        step_no: u32,
        source: InvalidTransition<MilestoneStatus>,
    },

    /// Attempted dispute status change not in its allow-table.
    #[error(transparent)]
    DisputeTransition(#[from] InvalidTransition<DisputeStatus>),

    /// The split rules are invalid.
    #[error(transparent)]
    Split(#[from] SplitError),

    /// Deal already exists.
    #[error("deal already created")]
    AlreadyCreated,

    /// Operation requires an existing deal.
    #[error("deal does not exist")]
    NotCreated,

    /// Operation forbidden while a dispute holds the deal locked.
    #[error("operation forbidden: dispute in progress, reason: {reason}")]
    DisputeLocked { reason: String },

    /// Only one dispute may be open per deal.
    #[error("a dispute is already open for this deal")]
    DisputeAlreadyOpen,

    /// Dispute operation requires an open dispute.
    #[error("no open dispute for this deal")]
    NoOpenDispute,

    /// Disputes may only be opened by a deal participant.
    #[error("party {party_id} is not a participant of this deal")]
    NotParticipant { party_id: PartyId },

    /// The hold window is still running.
    #[error("hold has not expired yet, expires at {expires_at}")]
    HoldNotExpired { expires_at: DateTime<Utc> },

    /// The client confirmation window is still running.
    #[error("client confirmation window has not elapsed, deadline {deadline}")]
    ConfirmationNotElapsed { deadline: DateTime<Utc> },

    /// Partial refunds carry an explicit amount.
    #[error("partial refund requires an explicit refund amount")]
    RefundAmountRequired,

    /// Refund amount outside the valid range.
    #[error("refund amount {amount} must be positive and below total {total}")]
    InvalidRefundAmount { amount: Money, total: Money },

    /// Split-adjustment resolutions carry the replacement amounts.
    #[error("split adjustment requires replacement recipient amounts")]
    AdjustmentRequired,

    /// Adjusted amounts must still cover the whole commission.
    #[error("adjusted recipient amounts sum to {actual}, expected {expected}")]
    AdjustmentSumMismatch { expected: Money, actual: Money },

    /// Referenced milestone does not exist.
    #[error("milestone step {step_no} not found")]
    MilestoneNotFound { step_no: u32 },

    /// Milestone step numbers must be unique per deal.
    #[error("duplicate milestone step {step_no}")]
    DuplicateMilestoneStep { step_no: u32 },

    /// Milestone shares must cover the whole commission.
    #[error("milestone percentages sum to {sum} basis points, expected 10000")]
    MilestoneSumMismatch { sum: u32 },

    /// A dated milestone needs its release date.
    #[error("milestone step {step_no} has a date trigger but no release date")]
    MilestoneDateMissing { step_no: u32 },

    /// Release trigger condition not yet met.
    #[error("milestone {step_no} trigger {trigger} not met")]
    TriggerNotMet { step_no: u32, trigger: ReleaseTrigger },

    /// Only deals cancelled before signing may be reopened.
    #[error("cannot reopen: deal was cancelled from {cancelled_from}")]
    ReopenNotAllowed { cancelled_from: DealStatus },

    /// Signing must be complete before the deal advances.
    #[error("not all required parties have signed")]
    SignaturesIncomplete,

    /// Commission must be positive.
    #[error("total commission must be positive, got {0}")]
    InvalidCommission(Money),
}
