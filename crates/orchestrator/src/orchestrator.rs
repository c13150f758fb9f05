//! The deal settlement orchestrator.
//!
//! Sequences each settlement operation across the domain aggregate and
//! the external collaborators (payment provider, e-signature service,
//! notifications, fiscal receipts). Domain state only advances after the
//! provider side-effect it depends on has succeeded, so a crash between
//! the two leaves the deal in the earlier state and the operation can be
//! retried end to end.

use chrono::{DateTime, Duration, Utc};
use common::{AggregateId, PartyId};
use domain::{
    AttachInvoice, AutoReleaseConfirmation, BeginPayout, CancelDeal, CancelMilestone,
    CommandMetadata, CommandResult, CompletePayout, CreateDeal, Deal, DealService, DealStatus,
    DomainError, MarkHoldExpired, MarkMilestonePaid, MarkSigned, Money, NewDeal, PaymentModel,
    Percent, RecipientRole, RecipientSpec, RecordActSigned, RecordPaymentFailed,
    RecordPaymentPending,
    RecordPaymentReceived, RegeneratePaymentLink, RegisterRecipient, ReleaseMilestone,
    ReleaseTrigger, ReopenDeal, RequestClientConfirmation, RetryInvoice, SplitRule,
    SubmitForSigning,
};
use ledger::Ledger;

use crate::error::{OrchestrationError, Result};
use crate::esign::ESignService;
use crate::esp::{EspClient, ProviderDealStatus, RetryPolicy, SplitInstruction};
use crate::notify::{FiscalReceipts, Notifier};

/// Timing knobs for the settlement flow.
#[derive(Debug, Clone, Copy)]
pub struct SettlementConfig {
    /// How long funds sit in hold after payment before release.
    pub hold_duration: Duration,

    /// How long the client has to sign the completion act before
    /// settlement auto-releases.
    pub confirmation_window: Duration,

    /// Validity of a freshly issued payment link.
    pub link_ttl: Duration,

    /// How long a dispute may sit at one review level before the sweep
    /// escalates it.
    pub dispute_level_window: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            hold_duration: Duration::days(5),
            confirmation_window: Duration::days(7),
            link_ttl: Duration::hours(24),
            dispute_level_window: Duration::hours(24),
        }
    }
}

/// Result of a release attempt.
///
/// Release is best-effort: when the provider call fails after retries the
/// deal stays `payout_ready` and the sweep picks it up again later.
#[derive(Debug)]
pub enum ReleaseOutcome {
    /// Funds released and the deal closed.
    Released(CommandResult<Deal>),

    /// The provider call failed; the deal remains `payout_ready`.
    Deferred { reason: String },
}

/// Read-only comparison of local deal state against the provider's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub local: DealStatus,
    pub provider: ProviderDealStatus,
    pub consistent: bool,
}

/// Orchestrates settlement operations end to end.
pub struct DealOrchestrator<L, E, G, N, F>
where
    L: Ledger,
    E: EspClient,
    G: ESignService,
    N: Notifier,
    F: FiscalReceipts,
{
    service: DealService<L>,
    esp: E,
    esign: G,
    notifier: N,
    fiscal: F,
    config: SettlementConfig,
    retry: RetryPolicy,
}

impl<L, E, G, N, F> DealOrchestrator<L, E, G, N, F>
where
    L: Ledger,
    E: EspClient,
    G: ESignService,
    N: Notifier,
    F: FiscalReceipts,
{
    pub fn new(
        ledger: L,
        esp: E,
        esign: G,
        notifier: N,
        fiscal: F,
        config: SettlementConfig,
    ) -> Self {
        Self {
            service: DealService::new(ledger),
            esp,
            esign,
            notifier,
            fiscal,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn service(&self) -> &DealService<L> {
        &self.service
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Loads a deal, returning None if it doesn't exist.
    pub async fn get_deal(&self, deal_id: AggregateId) -> Result<Option<Deal>> {
        Ok(self.service.get_deal(deal_id).await?)
    }

    async fn require_deal(&self, deal_id: AggregateId) -> Result<Deal> {
        self.service
            .get_deal(deal_id)
            .await?
            .ok_or_else(|| OrchestrationError::Validation(format!("deal {deal_id} not found")))
    }

    /// Notification failures never fail the operation that triggered them.
    async fn notify(&self, deal_id: AggregateId, status: DealStatus) {
        if let Err(reason) = self.notifier.deal_transitioned(deal_id, status).await {
            tracing::warn!(%deal_id, %status, reason, "transition notification failed");
        }
    }

    /// Creates a new deal in draft.
    ///
    /// An empty recipient list means a solo deal: the creator takes the
    /// whole commission as agent.
    #[tracing::instrument(skip(self, input), fields(creator = %input.creator))]
    pub async fn create_deal(&self, mut input: NewDeal) -> Result<CommandResult<Deal>> {
        if input.recipients.is_empty() {
            input.recipients.push(RecipientSpec::new(
                RecipientRole::Agent,
                input.creator,
                "Deal creator",
                SplitRule::Percent(Percent::FULL),
            ));
        }
        let cmd = CreateDeal::new(input);
        let deal_id = cmd.deal_id;
        let result = self.service.create_deal(cmd).await?;
        metrics::counter!("deals_created_total").increment(1);
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Sends the deal out for signature collection.
    #[tracing::instrument(skip(self))]
    pub async fn submit_for_signing(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .submit_for_signing(SubmitForSigning { deal_id })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Checks signature completion with the e-signature service and
    /// records it.
    #[tracing::instrument(skip(self))]
    pub async fn mark_signed(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let all_signed = self.esign.all_required_parties_signed(deal_id).await?;
        let result = self
            .service
            .mark_signed(MarkSigned {
                deal_id,
                all_signed,
            })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Creates the invoice.
    ///
    /// Provider-split deals register every unregistered recipient with
    /// the provider first; if any registration fails the whole operation
    /// aborts and nothing is persisted. Provider deal creation is
    /// idempotent on the deal id, so a retry after a partial failure
    /// picks up where it left off. Direct-payment deals are invoiced by
    /// the agency itself and never touch the provider.
    #[tracing::instrument(skip(self))]
    pub async fn create_invoice(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let deal = self.require_deal(deal_id).await?;
        deal_status_allows_invoice(&deal)?;

        if deal.payment_model() == PaymentModel::LegacyDirect {
            let result = self
                .service
                .attach_invoice(AttachInvoice {
                    deal_id,
                    provider_deal_id: None,
                    payment_url: None,
                    link_expires_at: None,
                })
                .await?;
            metrics::counter!("invoices_created_total").increment(1);
            self.notify(deal_id, result.aggregate.status()).await;
            return Ok(result);
        }

        let mut registrations = Vec::new();
        for recipient in deal.recipients() {
            if recipient.beneficiary_ref.is_some() {
                continue;
            }
            let tax_id = recipient.tax_id.as_ref().ok_or_else(|| {
                OrchestrationError::RecipientNotRegistrable {
                    party_id: recipient.party_id,
                    reason: "missing tax identifier".to_string(),
                }
            })?;
            let beneficiary_ref = self
                .retry
                .run(|| self.esp.create_recipient(tax_id, &recipient.name))
                .await?;
            registrations.push((recipient.party_id, beneficiary_ref));
        }
        for (party_id, beneficiary_ref) in registrations {
            self.service
                .register_recipient(RegisterRecipient {
                    deal_id,
                    party_id,
                    beneficiary_ref,
                })
                .await?;
        }

        let deal = self.require_deal(deal_id).await?;
        let splits = split_instructions(&deal)?;
        let expiry = Utc::now() + self.config.link_ttl;
        let invoice = self
            .retry
            .run(|| {
                self.esp
                    .create_deal(deal_id, deal.total_commission(), &splits, Some(expiry))
            })
            .await?;

        let result = self
            .service
            .attach_invoice(AttachInvoice {
                deal_id,
                provider_deal_id: Some(invoice.provider_deal_id),
                payment_url: Some(invoice.payment_url),
                link_expires_at: invoice.expires_at,
            })
            .await?;
        metrics::counter!("invoices_created_total").increment(1);
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Issues a fresh payment link for an invoiced deal.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_payment_link(
        &self,
        deal_id: AggregateId,
    ) -> Result<CommandResult<Deal>> {
        let deal = self.require_deal(deal_id).await?;
        let provider_deal_id = require_provider_deal(&deal)?.to_string();
        let invoice = self
            .retry
            .run(|| self.esp.regenerate_payment_link(&provider_deal_id))
            .await?;
        let result = self
            .service
            .regenerate_payment_link(RegeneratePaymentLink {
                deal_id,
                payment_url: invoice.payment_url,
                link_expires_at: invoice.expires_at,
            })
            .await?;
        Ok(result)
    }

    /// Re-issues the invoice after a failed payment attempt.
    #[tracing::instrument(skip(self))]
    pub async fn retry_invoice(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let deal = self.require_deal(deal_id).await?;
        if deal.payment_model() == PaymentModel::LegacyDirect {
            let result = self
                .service
                .retry_invoice(RetryInvoice {
                    deal_id,
                    provider_deal_id: None,
                    payment_url: None,
                    link_expires_at: None,
                })
                .await?;
            self.notify(deal_id, result.aggregate.status()).await;
            return Ok(result);
        }
        let provider_deal_id = require_provider_deal(&deal)?.to_string();
        let invoice = self
            .retry
            .run(|| self.esp.regenerate_payment_link(&provider_deal_id))
            .await?;
        let result = self
            .service
            .retry_invoice(RetryInvoice {
                deal_id,
                provider_deal_id: Some(provider_deal_id),
                payment_url: Some(invoice.payment_url),
                link_expires_at: invoice.expires_at,
            })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Records the provider's payment-started notification.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn record_payment_pending(
        &self,
        deal_id: AggregateId,
        metadata: CommandMetadata,
    ) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .record_payment_pending(RecordPaymentPending { deal_id, metadata })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Records receipt of the client's payment; the hold window starts
    /// now.
    #[tracing::instrument(skip(self, metadata), fields(amount = %amount))]
    pub async fn record_payment_received(
        &self,
        deal_id: AggregateId,
        amount: Money,
        transaction_id: String,
        metadata: CommandMetadata,
    ) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .record_payment_received(RecordPaymentReceived {
                deal_id,
                amount,
                transaction_id,
                hold_expires_at: Utc::now() + self.config.hold_duration,
                metadata,
            })
            .await?;
        metrics::counter!("payments_received_total").increment(1);
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Records a failed payment attempt.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn record_payment_failed(
        &self,
        deal_id: AggregateId,
        reason: String,
        metadata: CommandMetadata,
    ) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .record_payment_failed(RecordPaymentFailed {
                deal_id,
                reason,
                metadata,
            })
            .await?;
        metrics::counter!("payments_failed_total").increment(1);
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Generates the completion act and asks the client to sign it.
    #[tracing::instrument(skip(self))]
    pub async fn request_client_confirmation(
        &self,
        deal_id: AggregateId,
    ) -> Result<CommandResult<Deal>> {
        let act_url = self.esign.request_completion_act(deal_id).await?;
        tracing::info!(%deal_id, act_url, "completion act requested");
        let result = self
            .service
            .request_client_confirmation(RequestClientConfirmation {
                deal_id,
                deadline: Utc::now() + self.config.confirmation_window,
            })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Records the client's completion-act signature; the deal becomes
    /// ready for payout.
    #[tracing::instrument(skip(self))]
    pub async fn record_act_signed(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .record_act_signed(RecordActSigned { deal_id })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Auto-releases a deal whose confirmation window elapsed without a
    /// signature, then attempts the payout.
    #[tracing::instrument(skip(self))]
    pub async fn auto_release_confirmation(
        &self,
        deal_id: AggregateId,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome> {
        let result = self
            .service
            .auto_release_confirmation(AutoReleaseConfirmation { deal_id, now })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        self.release(deal_id).await
    }

    /// Marks an elapsed hold window as expired and attempts the payout.
    ///
    /// `force` allows manual release before the window elapses.
    #[tracing::instrument(skip(self))]
    pub async fn release_after_hold(
        &self,
        deal_id: AggregateId,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<ReleaseOutcome> {
        let result = self
            .service
            .mark_hold_expired(MarkHoldExpired {
                deal_id,
                now,
                force,
            })
            .await?;
        self.notify(deal_id, result.aggregate.status()).await;
        self.release(deal_id).await
    }

    /// Releases a payout-ready deal.
    ///
    /// The provider release runs first: only once the money has actually
    /// moved does the deal advance through `payout_in_progress` to
    /// `closed`. A provider failure leaves the deal `payout_ready` and
    /// is reported as a deferral, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, deal_id: AggregateId) -> Result<ReleaseOutcome> {
        let deal = self.require_deal(deal_id).await?;
        if deal.status() != DealStatus::PayoutReady {
            return Err(OrchestrationError::Validation(format!(
                "deal {deal_id} is {}, not payout_ready",
                deal.status()
            )));
        }

        if let Some(provider_deal_id) = deal.provider_deal_id() {
            let provider_deal_id = provider_deal_id.to_string();
            if let Err(err) = self
                .retry
                .run(|| self.esp.release_deal(&provider_deal_id))
                .await
            {
                tracing::warn!(%deal_id, error = %err, "provider release failed, deferring");
                metrics::counter!("releases_deferred_total").increment(1);
                return Ok(ReleaseOutcome::Deferred {
                    reason: err.to_string(),
                });
            }
        }

        let started = self.service.begin_payout(BeginPayout { deal_id }).await?;
        self.notify(deal_id, started.aggregate.status()).await;
        let result = self
            .service
            .complete_payout(CompletePayout {
                deal_id,
                metadata: CommandMetadata::default(),
            })
            .await?;
        metrics::counter!("deals_released_total").increment(1);
        self.notify(deal_id, result.aggregate.status()).await;

        if let Err(reason) = self
            .fiscal
            .issue_receipt(deal_id, result.aggregate.total_commission())
            .await
        {
            tracing::warn!(%deal_id, reason, "fiscal receipt issuance failed");
        }
        Ok(ReleaseOutcome::Released(result))
    }

    /// Records a milestone payment and schedules its release.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn mark_milestone_paid(
        &self,
        deal_id: AggregateId,
        step_no: u32,
        metadata: CommandMetadata,
    ) -> Result<CommandResult<Deal>> {
        let deal = self.require_deal(deal_id).await?;
        let milestone = deal.milestone(step_no).ok_or_else(|| {
            OrchestrationError::Validation(format!("milestone step {step_no} not found"))
        })?;
        let release_scheduled_at = match milestone.trigger {
            ReleaseTrigger::Immediate => Some(Utc::now()),
            ReleaseTrigger::ShortHold => Some(Utc::now() + self.config.hold_duration),
            ReleaseTrigger::Confirmation | ReleaseTrigger::Date => None,
        };
        let result = self
            .service
            .mark_milestone_paid(MarkMilestonePaid {
                deal_id,
                step_no,
                release_scheduled_at,
                metadata,
            })
            .await?;
        Ok(result)
    }

    /// Releases a held milestone.
    #[tracing::instrument(skip(self))]
    pub async fn release_milestone(
        &self,
        deal_id: AggregateId,
        step_no: u32,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<CommandResult<Deal>> {
        let result = self
            .service
            .release_milestone(ReleaseMilestone {
                deal_id,
                step_no,
                now,
                force,
            })
            .await?;
        metrics::counter!("milestones_released_total").increment(1);
        Ok(result)
    }

    /// Cancels an unreleased milestone.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_milestone(
        &self,
        deal_id: AggregateId,
        step_no: u32,
    ) -> Result<CommandResult<Deal>> {
        Ok(self
            .service
            .cancel_milestone(CancelMilestone { deal_id, step_no })
            .await?)
    }

    /// Cancels a deal.
    ///
    /// The local transition is validated before anything touches the
    /// provider: a cancel the allow-table rejects must not trigger a
    /// provider-side refund. Once a provider-side deal exists it is
    /// cancelled (and the client refunded) first; if that call fails the
    /// local deal is left untouched so the cancellation can be retried.
    /// Cancelling an already-cancelled deal is a no-op.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_deal(
        &self,
        deal_id: AggregateId,
        reason: String,
        cancelled_by: Option<PartyId>,
    ) -> Result<CommandResult<Deal>> {
        let deal = self.require_deal(deal_id).await?;
        if deal.status() != DealStatus::Cancelled {
            // Dry-run the command against current state before the refund.
            deal.cancel(&reason, cancelled_by)
                .map_err(DomainError::from)?;
            if let Some(provider_deal_id) = deal.provider_deal_id() {
                let provider_deal_id = provider_deal_id.to_string();
                self.retry
                    .run(|| self.esp.cancel_deal(&provider_deal_id))
                    .await?;
            }
        }
        let result = self
            .service
            .cancel_deal(CancelDeal {
                deal_id,
                reason,
                cancelled_by,
            })
            .await?;
        if !result.events.is_empty() {
            metrics::counter!("deals_cancelled_total").increment(1);
            self.notify(deal_id, result.aggregate.status()).await;
        }
        Ok(result)
    }

    /// Returns an early-cancelled deal to draft.
    #[tracing::instrument(skip(self))]
    pub async fn reopen_deal(&self, deal_id: AggregateId) -> Result<CommandResult<Deal>> {
        let result = self.service.reopen_deal(ReopenDeal { deal_id }).await?;
        self.notify(deal_id, result.aggregate.status()).await;
        Ok(result)
    }

    /// Compares local deal state against the provider's, without
    /// mutating either. Drift is logged for manual follow-up.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, deal_id: AggregateId) -> Result<Reconciliation> {
        let deal = self.require_deal(deal_id).await?;
        let provider_deal_id = require_provider_deal(&deal)?.to_string();
        let provider = self
            .retry
            .run(|| self.esp.get_deal_status(&provider_deal_id))
            .await?;
        let local = deal.status();
        let consistent = statuses_consistent(local, provider);
        if !consistent {
            tracing::warn!(%deal_id, %local, ?provider, "deal state drifted from provider");
            metrics::counter!("reconciliation_drift_total").increment(1);
        }
        Ok(Reconciliation {
            local,
            provider,
            consistent,
        })
    }
}

fn deal_status_allows_invoice(deal: &Deal) -> Result<()> {
    match deal.status() {
        DealStatus::Signed => Ok(()),
        other => Err(OrchestrationError::Validation(format!(
            "invoice requires a signed deal, deal is {other}"
        ))),
    }
}

fn require_provider_deal(deal: &Deal) -> Result<&str> {
    deal.provider_deal_id().ok_or_else(|| {
        OrchestrationError::Validation("deal has no provider-side counterpart".to_string())
    })
}

fn split_instructions(deal: &Deal) -> Result<Vec<SplitInstruction>> {
    deal.recipients()
        .iter()
        .map(|r| {
            let recipient_ref = r.beneficiary_ref.clone().ok_or_else(|| {
                OrchestrationError::RecipientNotRegistrable {
                    party_id: r.party_id,
                    reason: "no beneficiary reference".to_string(),
                }
            })?;
            Ok(SplitInstruction {
                recipient_ref,
                amount: r.calculated_amount,
            })
        })
        .collect()
}

fn statuses_consistent(local: DealStatus, provider: ProviderDealStatus) -> bool {
    use DealStatus::*;
    match provider {
        ProviderDealStatus::Created => !matches!(local, Closed | Refunded),
        ProviderDealStatus::Paid => !matches!(
            local,
            Draft | AwaitingSignatures | Signed | Invoiced | Closed | Refunded
        ),
        ProviderDealStatus::Released => matches!(local, PayoutReady | PayoutInProgress | Closed),
        ProviderDealStatus::Cancelled => matches!(local, Cancelled | Refunded | Draft),
    }
}
