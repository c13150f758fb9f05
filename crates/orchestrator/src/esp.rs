//! Escrow/split-payment provider client.
//!
//! The provider holds the client's money in a nominal account, splits it
//! according to the instructions given at deal creation and disburses on
//! release. All calls are keyed by the local deal id, so a timed-out call
//! is safe to retry without double-charging.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TaxId};
use domain::Money;
use thiserror::Error;

/// A provider call failure.
#[derive(Debug, Error)]
#[error("provider call '{call}' failed: {reason}")]
pub struct EspError {
    pub call: &'static str,
    pub reason: String,
    /// Timeouts and 5xx-class failures are retryable; rejections are not.
    pub retryable: bool,
}

impl EspError {
    pub fn transient(call: &'static str, reason: impl Into<String>) -> Self {
        Self {
            call,
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn rejected(call: &'static str, reason: impl Into<String>) -> Self {
        Self {
            call,
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// One split line sent to the provider at deal creation.
#[derive(Debug, Clone)]
pub struct SplitInstruction {
    /// Beneficiary reference from recipient registration.
    pub recipient_ref: String,
    pub amount: Money,
}

/// Provider-side deal and payment link.
#[derive(Debug, Clone)]
pub struct ProviderInvoice {
    pub provider_deal_id: String,
    pub payment_url: String,
    /// QR payload for point-of-sale payment, when the provider issues one.
    pub qr_payload: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Deal status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderDealStatus {
    Created,
    Paid,
    Released,
    Cancelled,
}

/// Client for the escrow/split-payment provider.
#[async_trait]
pub trait EspClient: Send + Sync {
    /// Registers a beneficiary, returning the provider's reference.
    async fn create_recipient(&self, tax_id: &TaxId, name: &str) -> Result<String, EspError>;

    /// Creates a provider-side deal with its split instructions and
    /// payment link. Idempotent on `order_id`.
    async fn create_deal(
        &self,
        order_id: AggregateId,
        amount: Money,
        splits: &[SplitInstruction],
        expiry: Option<DateTime<Utc>>,
    ) -> Result<ProviderInvoice, EspError>;

    /// Fetches the provider's view of a deal, for reconciliation.
    async fn get_deal_status(&self, provider_deal_id: &str) -> Result<ProviderDealStatus, EspError>;

    /// Cancels a deal; refunds the client if money already arrived.
    async fn cancel_deal(&self, provider_deal_id: &str) -> Result<(), EspError>;

    /// Releases held funds to the registered recipients.
    async fn release_deal(&self, provider_deal_id: &str) -> Result<(), EspError>;

    /// Issues a fresh payment link for an existing deal.
    async fn regenerate_payment_link(
        &self,
        provider_deal_id: &str,
    ) -> Result<ProviderInvoice, EspError>;
}

/// Bounded retry with exponential backoff for idempotent provider calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Runs an idempotent call, retrying transient failures with backoff.
    /// Non-retryable failures surface immediately.
    pub async fn run<T, F, Fut>(&self, f: F) -> Result<T, EspError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, EspError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.retryable && attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(
                        call = err.call,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient provider failure, backing off"
                    );
                    metrics::counter!("esp_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ProviderDeal {
    invoice: ProviderInvoice,
    status: ProviderDealStatus,
    link_serial: u32,
}

#[derive(Debug, Default)]
struct InMemoryEspState {
    recipients: HashMap<String, (TaxId, String)>,
    deals: HashMap<String, ProviderDeal>,
    deal_by_order: HashMap<AggregateId, String>,
    next_recipient: u32,
    next_deal: u32,
    fail_on_create_recipient: bool,
    fail_on_create_deal: bool,
    fail_on_release: bool,
    fail_on_cancel: bool,
    /// Number of upcoming calls that fail with a retryable error before
    /// the client recovers.
    transient_failures: u32,
    calls: HashMap<&'static str, u32>,
}

/// In-memory provider for tests and local development.
#[derive(Clone, Default)]
pub struct InMemoryEspClient {
    state: Arc<RwLock<InMemoryEspState>>,
}

impl InMemoryEspClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_on_create_recipient(&self, fail: bool) {
        self.lock().fail_on_create_recipient = fail;
    }

    pub fn set_fail_on_create_deal(&self, fail: bool) {
        self.lock().fail_on_create_deal = fail;
    }

    pub fn set_fail_on_release(&self, fail: bool) {
        self.lock().fail_on_release = fail;
    }

    pub fn set_fail_on_cancel(&self, fail: bool) {
        self.lock().fail_on_cancel = fail;
    }

    /// Makes the next `count` calls fail with a retryable error.
    pub fn set_transient_failures(&self, count: u32) {
        self.lock().transient_failures = count;
    }

    /// Number of times a given call was made.
    pub fn call_count(&self, call: &'static str) -> u32 {
        self.lock().calls.get(call).copied().unwrap_or(0)
    }

    /// Number of registered recipients.
    pub fn recipient_count(&self) -> usize {
        self.lock().recipients.len()
    }

    /// Provider-side status of a deal, if it exists.
    pub fn deal_status(&self, provider_deal_id: &str) -> Option<ProviderDealStatus> {
        self.lock().deals.get(provider_deal_id).map(|d| d.status)
    }

    /// Simulates the client paying: flips the provider deal to Paid.
    pub fn simulate_payment(&self, provider_deal_id: &str) {
        if let Some(deal) = self.lock().deals.get_mut(provider_deal_id) {
            deal.status = ProviderDealStatus::Paid;
        }
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryEspState> {
        self.state.write().unwrap()
    }

    fn record_call(
        state: &mut InMemoryEspState,
        call: &'static str,
    ) -> Result<(), EspError> {
        *state.calls.entry(call).or_insert(0) += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(EspError::transient(call, "simulated timeout"));
        }
        Ok(())
    }
}

#[async_trait]
impl EspClient for InMemoryEspClient {
    async fn create_recipient(&self, tax_id: &TaxId, name: &str) -> Result<String, EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "create_recipient")?;

        if state.fail_on_create_recipient {
            return Err(EspError::rejected("create_recipient", "registration refused"));
        }

        state.next_recipient += 1;
        let recipient_ref = format!("BEN-{:04}", state.next_recipient);
        state
            .recipients
            .insert(recipient_ref.clone(), (tax_id.clone(), name.to_string()));
        Ok(recipient_ref)
    }

    async fn create_deal(
        &self,
        order_id: AggregateId,
        amount: Money,
        splits: &[SplitInstruction],
        expiry: Option<DateTime<Utc>>,
    ) -> Result<ProviderInvoice, EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "create_deal")?;

        if state.fail_on_create_deal {
            return Err(EspError::transient("create_deal", "provider unavailable"));
        }

        let split_total: i64 = splits.iter().map(|s| s.amount.minor_units()).sum();
        if split_total != amount.minor_units() {
            return Err(EspError::rejected(
                "create_deal",
                format!("splits sum to {split_total}, expected {}", amount.minor_units()),
            ));
        }

        // Idempotent by order id: a retried call gets the same deal back
        if let Some(existing) = state.deal_by_order.get(&order_id) {
            let deal = state.deals[existing].clone();
            return Ok(deal.invoice);
        }

        state.next_deal += 1;
        let provider_deal_id = format!("ESPD-{:04}", state.next_deal);
        let invoice = ProviderInvoice {
            provider_deal_id: provider_deal_id.clone(),
            payment_url: format!("https://esp.example/pay/{provider_deal_id}"),
            qr_payload: Some(format!("esp:{provider_deal_id}")),
            expires_at: expiry,
        };
        state.deals.insert(
            provider_deal_id.clone(),
            ProviderDeal {
                invoice: invoice.clone(),
                status: ProviderDealStatus::Created,
                link_serial: 1,
            },
        );
        state.deal_by_order.insert(order_id, provider_deal_id);
        Ok(invoice)
    }

    async fn get_deal_status(
        &self,
        provider_deal_id: &str,
    ) -> Result<ProviderDealStatus, EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "get_deal_status")?;

        state
            .deals
            .get(provider_deal_id)
            .map(|d| d.status)
            .ok_or_else(|| EspError::rejected("get_deal_status", "unknown deal"))
    }

    async fn cancel_deal(&self, provider_deal_id: &str) -> Result<(), EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "cancel_deal")?;

        if state.fail_on_cancel {
            return Err(EspError::transient("cancel_deal", "provider unavailable"));
        }

        let deal = state
            .deals
            .get_mut(provider_deal_id)
            .ok_or_else(|| EspError::rejected("cancel_deal", "unknown deal"))?;
        deal.status = ProviderDealStatus::Cancelled;
        Ok(())
    }

    async fn release_deal(&self, provider_deal_id: &str) -> Result<(), EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "release_deal")?;

        if state.fail_on_release {
            return Err(EspError::transient("release_deal", "provider unavailable"));
        }

        let deal = state
            .deals
            .get_mut(provider_deal_id)
            .ok_or_else(|| EspError::rejected("release_deal", "unknown deal"))?;
        deal.status = ProviderDealStatus::Released;
        Ok(())
    }

    async fn regenerate_payment_link(
        &self,
        provider_deal_id: &str,
    ) -> Result<ProviderInvoice, EspError> {
        let mut state = self.lock();
        Self::record_call(&mut state, "regenerate_payment_link")?;

        let deal = state
            .deals
            .get_mut(provider_deal_id)
            .ok_or_else(|| EspError::rejected("regenerate_payment_link", "unknown deal"))?;
        deal.link_serial += 1;
        deal.invoice.payment_url =
            format!("https://esp.example/pay/{provider_deal_id}/{}", deal.link_serial);
        Ok(deal.invoice.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tax_id() -> TaxId {
        TaxId::parse("1234567890").unwrap()
    }

    #[tokio::test]
    async fn create_deal_is_idempotent_by_order_id() {
        let esp = InMemoryEspClient::new();
        let order_id = AggregateId::new();
        let recipient_ref = esp.create_recipient(&tax_id(), "Agent").await.unwrap();
        let splits = vec![SplitInstruction {
            recipient_ref,
            amount: Money::from_minor_units(100_000),
        }];

        let first = esp
            .create_deal(order_id, Money::from_minor_units(100_000), &splits, None)
            .await
            .unwrap();
        let second = esp
            .create_deal(order_id, Money::from_minor_units(100_000), &splits, None)
            .await
            .unwrap();

        assert_eq!(first.provider_deal_id, second.provider_deal_id);
    }

    #[tokio::test]
    async fn mismatched_splits_rejected() {
        let esp = InMemoryEspClient::new();
        let splits = vec![SplitInstruction {
            recipient_ref: "BEN-0001".into(),
            amount: Money::from_minor_units(90_000),
        }];

        let err = esp
            .create_deal(
                AggregateId::new(),
                Money::from_minor_units(100_000),
                &splits,
                None,
            )
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn retry_policy_recovers_from_transient_failures() {
        let esp = InMemoryEspClient::new();
        esp.set_transient_failures(2);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };

        let tid = tax_id();
        let recipient_ref = policy
            .run(|| esp.create_recipient(&tid, "Agent"))
            .await
            .unwrap();

        assert!(recipient_ref.starts_with("BEN-"));
        assert_eq!(esp.call_count("create_recipient"), 3);
    }

    #[tokio::test]
    async fn retry_policy_gives_up_after_max_attempts() {
        let esp = InMemoryEspClient::new();
        esp.set_transient_failures(5);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        };

        let tid = tax_id();
        let err = policy
            .run(|| esp.create_recipient(&tid, "Agent"))
            .await
            .unwrap_err();

        assert!(err.retryable);
        assert_eq!(esp.call_count("create_recipient"), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let esp = InMemoryEspClient::new();
        esp.set_fail_on_create_recipient(true);
        let policy = RetryPolicy::default();

        let tid = tax_id();
        let err = policy
            .run(|| esp.create_recipient(&tid, "Agent"))
            .await
            .unwrap_err();

        assert!(!err.retryable);
        assert_eq!(esp.call_count("create_recipient"), 1);
    }

    #[tokio::test]
    async fn release_and_cancel_flip_status() {
        let esp = InMemoryEspClient::new();
        let recipient_ref = esp.create_recipient(&tax_id(), "Agent").await.unwrap();
        let splits = vec![SplitInstruction {
            recipient_ref,
            amount: Money::from_minor_units(50_000),
        }];
        let invoice = esp
            .create_deal(AggregateId::new(), Money::from_minor_units(50_000), &splits, None)
            .await
            .unwrap();

        esp.simulate_payment(&invoice.provider_deal_id);
        assert_eq!(
            esp.deal_status(&invoice.provider_deal_id),
            Some(ProviderDealStatus::Paid)
        );

        esp.release_deal(&invoice.provider_deal_id).await.unwrap();
        assert_eq!(
            esp.get_deal_status(&invoice.provider_deal_id).await.unwrap(),
            ProviderDealStatus::Released
        );
    }
}
