//! Shared identifier types used across the settlement workspace.

mod types;

pub use types::{AggregateId, IdempotencyKey, PartyId, TaxId, TaxIdError};
