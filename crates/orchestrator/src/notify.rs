//! Notification and fiscal-receipt collaborators.
//!
//! Both are downstream of settlement decisions: a notification failure is
//! logged and never blocks a transition, and a fiscal receipt failure never
//! rolls back a release.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::{DealStatus, Money};

/// Notified on every deal status transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deal_transitioned(
        &self,
        deal_id: AggregateId,
        status: DealStatus,
    ) -> Result<(), String>;
}

/// Issues fiscal receipts after a successful release. Fire-and-forget.
#[async_trait]
pub trait FiscalReceipts: Send + Sync {
    async fn issue_receipt(&self, deal_id: AggregateId, amount: Money) -> Result<(), String>;
}

/// In-memory notifier recording every transition it saw.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<(AggregateId, DealStatus)>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<(AggregateId, DealStatus)> {
        self.sent.read().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn deal_transitioned(
        &self,
        deal_id: AggregateId,
        status: DealStatus,
    ) -> Result<(), String> {
        if *self.fail.read().unwrap() {
            return Err("notification channel down".to_string());
        }
        self.sent.write().unwrap().push((deal_id, status));
        Ok(())
    }
}

/// In-memory fiscal receipt recorder.
#[derive(Clone, Default)]
pub struct InMemoryFiscalReceipts {
    issued: Arc<RwLock<Vec<(AggregateId, Money)>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryFiscalReceipts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    pub fn issued(&self) -> Vec<(AggregateId, Money)> {
        self.issued.read().unwrap().clone()
    }
}

#[async_trait]
impl FiscalReceipts for InMemoryFiscalReceipts {
    async fn issue_receipt(&self, deal_id: AggregateId, amount: Money) -> Result<(), String> {
        if *self.fail.read().unwrap() {
            return Err("fiscal service down".to_string());
        }
        self.issued.write().unwrap().push((deal_id, amount));
        Ok(())
    }
}
