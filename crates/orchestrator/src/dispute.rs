//! Dispute management.
//!
//! A dispute freezes the deal: no release, no hold expiry, no milestone
//! movement until it is resolved or withdrawn. The manager layers the
//! provider-side refund work on top of the aggregate's dispute rules and
//! drives time-based escalation from agency to platform review.

use chrono::{Duration, Utc};
use common::{AggregateId, PartyId};
use domain::{
    CancelDispute, CommandResult, Deal, DealService, DisputeResolution, EscalateDispute, Money,
    OpenDispute, ResolveDispute, SplitRecipient,
};
use ledger::Ledger;

use crate::error::{OrchestrationError, Result};
use crate::esp::{EspClient, RetryPolicy};
use crate::notify::Notifier;
use crate::orchestrator::SettlementConfig;

/// Orchestrates the dispute lifecycle and its provider side-effects.
pub struct DisputeManager<L, E, N>
where
    L: Ledger,
    E: EspClient,
    N: Notifier,
{
    service: DealService<L>,
    esp: E,
    notifier: N,
    level_window: Duration,
    retry: RetryPolicy,
}

impl<L, E, N> DisputeManager<L, E, N>
where
    L: Ledger,
    E: EspClient,
    N: Notifier,
{
    pub fn new(ledger: L, esp: E, notifier: N, config: &SettlementConfig) -> Self {
        Self {
            service: DealService::new(ledger),
            esp,
            notifier,
            level_window: config.dispute_level_window,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn notify(&self, deal_id: AggregateId, deal: &Deal) {
        if let Err(reason) = self.notifier.deal_transitioned(deal_id, deal.status()).await {
            tracing::warn!(%deal_id, reason, "dispute notification failed");
        }
    }

    /// Opens a dispute, locking the deal until it is resolved.
    ///
    /// Only a deal participant may open one; the aggregate enforces
    /// that. Agency review gets the configured window before the sweep
    /// escalates to platform.
    #[tracing::instrument(skip(self, reason))]
    pub async fn open(
        &self,
        deal_id: AggregateId,
        initiator: PartyId,
        reason: String,
    ) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .open_dispute(OpenDispute {
                deal_id,
                initiator,
                reason,
                level_deadline: Utc::now() + self.level_window,
            })
            .await?;
        metrics::counter!("disputes_opened_total").increment(1);
        self.notify(deal_id, &result.aggregate).await;
        Ok(result)
    }

    /// Escalates the open dispute to platform review.
    #[tracing::instrument(skip(self))]
    pub async fn escalate(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .escalate_dispute(EscalateDispute {
                deal_id,
                level_deadline: Utc::now() + self.level_window,
            })
            .await?;
        metrics::counter!("disputes_escalated_total").increment(1);
        Ok(result)
    }

    /// Resolves the open dispute.
    ///
    /// A full refund cancels the provider-side deal (returning the money
    /// to the client) before the local resolution is recorded; if the
    /// provider call fails the refund is deferred to manual processing
    /// and the resolution still lands, so the deal never stays locked on
    /// a provider outage. Unlocking the deal is the aggregate's final
    /// effect of the resolution event.
    #[tracing::instrument(skip(self, adjusted_recipients), fields(resolution = %resolution))]
    pub async fn resolve(
        &self,
        deal_id: AggregateId,
        resolution: DisputeResolution,
        refund_amount: Option<Money>,
        adjusted_recipients: Option<Vec<SplitRecipient>>,
    ) -> Result<CommandResult<Deal>> {
        if resolution == DisputeResolution::FullRefund {
            let deal = self.require_deal(deal_id).await?;
            if let Some(provider_deal_id) = deal.provider_deal_id() {
                let provider_deal_id = provider_deal_id.to_string();
                if let Err(err) = self
                    .retry
                    .run(|| self.esp.cancel_deal(&provider_deal_id))
                    .await
                {
                    tracing::warn!(
                        %deal_id,
                        error = %err,
                        "provider refund failed, deferred to manual processing"
                    );
                    metrics::counter!("refunds_deferred_total").increment(1);
                }
            }
        }
        if resolution == DisputeResolution::PartialRefund {
            // The provider has no partial-refund call; finance handles
            // the client leg manually off the resolution record.
            tracing::info!(%deal_id, ?refund_amount, "partial refund requires manual transfer");
        }

        let result = self
            .service
            .resolve_dispute(ResolveDispute {
                deal_id,
                resolution,
                refund_amount,
                adjusted_recipients,
            })
            .await?;
        metrics::counter!("disputes_resolved_total", "resolution" => resolution.to_string())
            .increment(1);
        self.notify(deal_id, &result.aggregate).await;
        Ok(result)
    }

    /// Withdraws the open dispute; the deal resumes where it was locked.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .cancel_dispute(CancelDispute { deal_id })
            .await?;
        self.notify(deal_id, &result.aggregate).await;
        Ok(result)
    }

    async fn require_deal(&self, deal_id: AggregateId) -> Result<Deal> {
        self.service
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| OrchestrationError::Validation(format!("deal {deal_id} not found")))
    }
}
