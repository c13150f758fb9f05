//! Settlement orchestration for the commission-payment system.
//!
//! Wires the deal aggregate to its external collaborators:
//! - [`DealOrchestrator`] — sequences every settlement operation across
//!   the ledger, the payment provider and the e-signature service
//! - [`DisputeManager`] — dispute lifecycle with refund side-effects
//! - [`SettlementEventHandler`] — applies provider webhook facts
//! - [`SettlementSweeper`] — drives all time-based transitions
//!
//! Provider calls that must happen before a state change always run
//! first; a failure leaves the deal where it was, so every operation is
//! safe to retry end to end.

pub mod dispute;
pub mod error;
pub mod esign;
pub mod esp;
pub mod handler;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;

pub use dispute::DisputeManager;
pub use error::{OrchestrationError, Result};
pub use esign::{ESignService, InMemoryESignService};
pub use esp::{
    EspClient, EspError, InMemoryEspClient, ProviderDealStatus, ProviderInvoice, RetryPolicy,
    SplitInstruction,
};
pub use handler::SettlementEventHandler;
pub use notify::{FiscalReceipts, InMemoryFiscalReceipts, InMemoryNotifier, Notifier};
pub use orchestrator::{
    DealOrchestrator, Reconciliation, ReleaseOutcome, SettlementConfig,
};
pub use scheduler::{SettlementSweeper, SweepReport};
