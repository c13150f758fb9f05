//! Read models for the settlement query side.
//!
//! - [`Projection`] trait for folding ledger facts into read models
//! - [`ProjectionProcessor`] for feeding events from the ledger to projections
//! - [`SettlementQueueView`]: the sweep worklist (expired holds, elapsed
//!   confirmation windows, due milestones, overdue disputes)
//! - [`DealBoardView`]: denormalized deal summaries for the API

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{DealBoardView, DealSummary, QueueEntry, SettlementQueueView};
