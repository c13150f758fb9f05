//! Deal commands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AggregateId, PartyId};

use crate::command::Command;

use super::{Deal, DisputeResolution, Money, NewDeal, SplitRecipient};

macro_rules! deal_command {
    ($name:ident) => {
        impl Command for $name {
            type Aggregate = Deal;

            fn aggregate_id(&self) -> AggregateId {
                self.deal_id
            }
        }
    };
}

/// Correlation metadata stamped on the resulting ledger facts, typically
/// the id of the bank event that triggered the command.
pub type CommandMetadata = HashMap<String, serde_json::Value>;

/// Command to create a new deal.
#[derive(Debug, Clone)]
pub struct CreateDeal {
    /// The deal ID to create.
    pub deal_id: AggregateId,

    /// The deal input, including its recipient rules.
    pub input: NewDeal,
}

impl CreateDeal {
    /// Creates a new CreateDeal command with a generated deal ID.
    pub fn new(input: NewDeal) -> Self {
        Self {
            deal_id: AggregateId::new(),
            input,
        }
    }
}

deal_command!(CreateDeal);

/// Command to send a deal out for signature collection.
#[derive(Debug, Clone)]
pub struct SubmitForSigning {
    pub deal_id: AggregateId,
}

deal_command!(SubmitForSigning);

/// Command to record that signing is complete.
#[derive(Debug, Clone)]
pub struct MarkSigned {
    pub deal_id: AggregateId,

    /// Whether the e-signature collaborator confirmed every required
    /// party signed.
    pub all_signed: bool,
}

deal_command!(MarkSigned);

/// Command to record a provider-side beneficiary registration.
#[derive(Debug, Clone)]
pub struct RegisterRecipient {
    pub deal_id: AggregateId,
    pub party_id: PartyId,
    pub beneficiary_ref: String,
}

deal_command!(RegisterRecipient);

/// Command to attach the invoice. Direct-payment deals carry no
/// provider deal reference or payment link.
#[derive(Debug, Clone)]
pub struct AttachInvoice {
    pub deal_id: AggregateId,
    pub provider_deal_id: Option<String>,
    pub payment_url: Option<String>,
    pub link_expires_at: Option<DateTime<Utc>>,
}

deal_command!(AttachInvoice);

/// Command to replace an expired payment link.
#[derive(Debug, Clone)]
pub struct RegeneratePaymentLink {
    pub deal_id: AggregateId,
    pub payment_url: String,
    pub link_expires_at: Option<DateTime<Utc>>,
}

deal_command!(RegeneratePaymentLink);

/// Command to re-issue the invoice after a failed payment.
#[derive(Debug, Clone)]
pub struct RetryInvoice {
    pub deal_id: AggregateId,
    pub provider_deal_id: Option<String>,
    pub payment_url: Option<String>,
    pub link_expires_at: Option<DateTime<Utc>>,
}

deal_command!(RetryInvoice);

/// Command to record the provider's payment-started notification.
#[derive(Debug, Clone)]
pub struct RecordPaymentPending {
    pub deal_id: AggregateId,
    pub metadata: CommandMetadata,
}

deal_command!(RecordPaymentPending);

/// Command to record receipt of the client's payment.
#[derive(Debug, Clone)]
pub struct RecordPaymentReceived {
    pub deal_id: AggregateId,
    pub amount: Money,
    pub transaction_id: String,

    /// End of the dispute window.
    pub hold_expires_at: DateTime<Utc>,

    pub metadata: CommandMetadata,
}

deal_command!(RecordPaymentReceived);

/// Command to record a failed payment attempt.
#[derive(Debug, Clone)]
pub struct RecordPaymentFailed {
    pub deal_id: AggregateId,
    pub reason: String,
    pub metadata: CommandMetadata,
}

deal_command!(RecordPaymentFailed);

/// Command to ask the client for the completion acknowledgment.
#[derive(Debug, Clone)]
pub struct RequestClientConfirmation {
    pub deal_id: AggregateId,

    /// Deadline after which the release happens without the client.
    pub deadline: DateTime<Utc>,
}

deal_command!(RequestClientConfirmation);

/// Command to record the client's completion signature.
#[derive(Debug, Clone)]
pub struct RecordActSigned {
    pub deal_id: AggregateId,
}

deal_command!(RecordActSigned);

/// Command to auto-release once the confirmation window elapsed.
#[derive(Debug, Clone)]
pub struct AutoReleaseConfirmation {
    pub deal_id: AggregateId,
    pub now: DateTime<Utc>,
}

deal_command!(AutoReleaseConfirmation);

/// Command to mark the hold window as expired.
#[derive(Debug, Clone)]
pub struct MarkHoldExpired {
    pub deal_id: AggregateId,
    pub now: DateTime<Utc>,

    /// Skips the deadline check for manual early release.
    pub force: bool,
}

deal_command!(MarkHoldExpired);

/// Command to start the provider-side disbursement.
#[derive(Debug, Clone)]
pub struct BeginPayout {
    pub deal_id: AggregateId,
}

deal_command!(BeginPayout);

/// Command to record completed disbursement and close the deal.
#[derive(Debug, Clone)]
pub struct CompletePayout {
    pub deal_id: AggregateId,
    pub metadata: CommandMetadata,
}

deal_command!(CompletePayout);

/// Command to open a dispute.
#[derive(Debug, Clone)]
pub struct OpenDispute {
    pub deal_id: AggregateId,

    /// The participant opening the dispute.
    pub initiator: PartyId,

    pub reason: String,

    /// Deadline for the agency review level.
    pub level_deadline: DateTime<Utc>,
}

deal_command!(OpenDispute);

/// Command to escalate the open dispute to platform review.
#[derive(Debug, Clone)]
pub struct EscalateDispute {
    pub deal_id: AggregateId,
    pub level_deadline: DateTime<Utc>,
}

deal_command!(EscalateDispute);

/// Command to resolve the open dispute.
#[derive(Debug, Clone)]
pub struct ResolveDispute {
    pub deal_id: AggregateId,
    pub resolution: DisputeResolution,

    /// Required for partial refunds.
    pub refund_amount: Option<Money>,

    /// Required for split adjustments.
    pub adjusted_recipients: Option<Vec<SplitRecipient>>,
}

deal_command!(ResolveDispute);

/// Command to withdraw the open dispute.
#[derive(Debug, Clone)]
pub struct CancelDispute {
    pub deal_id: AggregateId,
}

deal_command!(CancelDispute);

/// Command to record a milestone payment.
#[derive(Debug, Clone)]
pub struct MarkMilestonePaid {
    pub deal_id: AggregateId,
    pub step_no: u32,

    /// When the milestone hold becomes eligible for release.
    pub release_scheduled_at: Option<DateTime<Utc>>,

    pub metadata: CommandMetadata,
}

deal_command!(MarkMilestonePaid);

/// Command to release a held milestone.
#[derive(Debug, Clone)]
pub struct ReleaseMilestone {
    pub deal_id: AggregateId,
    pub step_no: u32,
    pub now: DateTime<Utc>,

    /// Overrides the trigger check for manual release.
    pub force: bool,
}

deal_command!(ReleaseMilestone);

/// Command to cancel an unreleased milestone.
#[derive(Debug, Clone)]
pub struct CancelMilestone {
    pub deal_id: AggregateId,
    pub step_no: u32,
}

deal_command!(CancelMilestone);

/// Command to cancel a deal.
#[derive(Debug, Clone)]
pub struct CancelDeal {
    pub deal_id: AggregateId,
    pub reason: String,

    /// Who cancelled, None for system cancellation.
    pub cancelled_by: Option<PartyId>,
}

deal_command!(CancelDeal);

/// Command to return an early-cancelled deal to draft.
#[derive(Debug, Clone)]
pub struct ReopenDeal {
    pub deal_id: AggregateId,
}

deal_command!(ReopenDeal);
