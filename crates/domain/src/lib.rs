//! Settlement core for the commission-payment system.
//!
//! This crate provides:
//! - [`Lifecycle`] — the table-driven state machine engine shared by deal,
//!   milestone, dispute and payout statuses
//! - [`split`] — the pure commission split calculator
//! - The event-sourced [`Deal`] aggregate with its events, commands and
//!   [`DealService`]
//! - [`Aggregate`] / [`DomainEvent`] traits and the [`CommandHandler`]
//!   executing validated commands against the ledger

pub mod aggregate;
pub mod command;
pub mod deal;
pub mod error;
pub mod machine;
pub mod split;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use deal::{
    AttachInvoice, AutoReleaseConfirmation, BeginPayout, CancelDeal, CancelDispute,
    CancelMilestone, CommandMetadata, CompletePayout, CreateDeal, Deal, DealError, DealEvent,
    DealService, DealStatus, DisputeRecord, DisputeResolution, DisputeStatus, EscalateDispute,
    EscalationLevel, MarkHoldExpired, MarkMilestonePaid, MarkSigned, Milestone, MilestoneSpec,
    MilestoneStatus, Money, NewDeal, OpenDispute, PaymentModel, PayoutStatus, Percent,
    RecipientRole, RecipientSpec, RecordActSigned, RecordPaymentFailed, RecordPaymentPending,
    RecordPaymentReceived, RegeneratePaymentLink, RegisterRecipient, ReleaseMilestone,
    ReleaseTrigger, ReopenDeal, RequestClientConfirmation, ResolveDispute, RetryInvoice,
    SplitRecipient, SplitRule, SubmitForSigning,
};
pub use error::DomainError;
pub use machine::{InvalidTransition, Lifecycle};
pub use split::SplitError;
