//! HTTP route handlers.

pub mod deals;
pub mod health;
pub mod metrics;
pub mod webhooks;
