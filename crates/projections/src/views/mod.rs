//! Read model views for the query side.

pub mod deal_board;
pub mod settlement_queue;

pub use deal_board::{DealBoardView, DealSummary, RecipientSummary};
pub use settlement_queue::{MilestoneHold, QueueEntry, SettlementQueueView};
