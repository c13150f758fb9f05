//! Deal service providing a high-level API for deal operations.

use common::AggregateId;
use ledger::Ledger;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    AttachInvoice, AutoReleaseConfirmation, BeginPayout, CancelDeal, CancelDispute,
    CancelMilestone, CompletePayout, CreateDeal, Deal, EscalateDispute, MarkHoldExpired,
    MarkMilestonePaid, MarkSigned, OpenDispute, RecordActSigned, RecordPaymentFailed,
    RecordPaymentPending, RecordPaymentReceived, RegeneratePaymentLink, RegisterRecipient,
    ReleaseMilestone, ReopenDeal, RequestClientConfirmation, ResolveDispute, RetryInvoice,
    SubmitForSigning,
};

/// Service for managing deals.
///
/// Wraps the command handler: loads the deal by replay, runs the command
/// against current state and appends the resulting facts with an
/// optimistic version check. Concurrent writers on the same deal lose
/// with a conflict error and must re-read.
pub struct DealService<L: Ledger> {
    handler: CommandHandler<L, Deal>,
}

impl<L: Ledger> DealService<L> {
    /// Creates a new deal service backed by the given ledger.
    pub fn new(ledger: L) -> Self {
        Self {
            handler: CommandHandler::new(ledger),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<L, Deal> {
        &self.handler
    }

    /// Loads a deal, returning None if it doesn't exist.
    pub async fn get_deal(&self, deal_id: AggregateId) -> Result<Option<Deal>, DomainError> {
        self.handler.load_existing(deal_id).await
    }

    /// Creates a new deal in draft with its calculated split.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn create_deal(&self, cmd: CreateDeal) -> Result<CommandResult<Deal>, DomainError> {
        let deal_id = cmd.deal_id;
        let input = cmd.input;

        self.handler
            .execute(deal_id, |deal| deal.create(deal_id, input))
            .await
    }

    /// Sends a deal out for signature collection.
    #[tracing::instrument(skip(self))]
    pub async fn submit_for_signing(
        &self,
        cmd: SubmitForSigning,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.submit_for_signing())
            .await
    }

    /// Records that every required party has signed.
    #[tracing::instrument(skip(self))]
    pub async fn mark_signed(&self, cmd: MarkSigned) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.mark_signed(cmd.all_signed))
            .await
    }

    /// Records a provider-side beneficiary registration.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn register_recipient(
        &self,
        cmd: RegisterRecipient,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.register_recipient(cmd.party_id, &cmd.beneficiary_ref)
            })
            .await
    }

    /// Attaches the provider-side deal and payment link.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn attach_invoice(
        &self,
        cmd: AttachInvoice,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.attach_invoice(
                    cmd.provider_deal_id.as_deref(),
                    cmd.payment_url.as_deref(),
                    cmd.link_expires_at,
                )
            })
            .await
    }

    /// Replaces an expired payment link.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn regenerate_payment_link(
        &self,
        cmd: RegeneratePaymentLink,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.regenerate_link(&cmd.payment_url, cmd.link_expires_at)
            })
            .await
    }

    /// Re-issues the invoice after a failed payment.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn retry_invoice(
        &self,
        cmd: RetryInvoice,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.retry_invoice(
                    cmd.provider_deal_id.as_deref(),
                    cmd.payment_url.as_deref(),
                    cmd.link_expires_at,
                )
            })
            .await
    }

    /// Records the provider's payment-started notification.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn record_payment_pending(
        &self,
        cmd: RecordPaymentPending,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute_with_metadata(cmd.deal_id, cmd.metadata, |deal| {
                deal.record_payment_pending()
            })
            .await
    }

    /// Records receipt of the client's payment; the deal enters its hold
    /// window and all recipients flip to payout hold.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn record_payment_received(
        &self,
        cmd: RecordPaymentReceived,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute_with_metadata(cmd.deal_id, cmd.metadata, |deal| {
                deal.record_payment_received(cmd.amount, &cmd.transaction_id, cmd.hold_expires_at)
            })
            .await
    }

    /// Records a failed payment attempt.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn record_payment_failed(
        &self,
        cmd: RecordPaymentFailed,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute_with_metadata(cmd.deal_id, cmd.metadata, |deal| {
                deal.record_payment_failed(&cmd.reason)
            })
            .await
    }

    /// Asks the client to sign the completion acknowledgment.
    #[tracing::instrument(skip(self))]
    pub async fn request_client_confirmation(
        &self,
        cmd: RequestClientConfirmation,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.request_client_confirmation(cmd.deadline)
            })
            .await
    }

    /// Records the client's completion signature.
    #[tracing::instrument(skip(self))]
    pub async fn record_act_signed(
        &self,
        cmd: RecordActSigned,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.record_act_signed())
            .await
    }

    /// Auto-releases when the confirmation window elapsed.
    #[tracing::instrument(skip(self))]
    pub async fn auto_release_confirmation(
        &self,
        cmd: AutoReleaseConfirmation,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.auto_release_confirmation(cmd.now))
            .await
    }

    /// Marks the hold window as expired.
    #[tracing::instrument(skip(self))]
    pub async fn mark_hold_expired(
        &self,
        cmd: MarkHoldExpired,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.mark_hold_expired(cmd.now, cmd.force))
            .await
    }

    /// Starts the provider-side disbursement.
    #[tracing::instrument(skip(self))]
    pub async fn begin_payout(&self, cmd: BeginPayout) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.begin_payout())
            .await
    }

    /// Records completed disbursement; closes the deal.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn complete_payout(
        &self,
        cmd: CompletePayout,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute_with_metadata(cmd.deal_id, cmd.metadata, |deal| deal.complete_payout())
            .await
    }

    /// Opens a dispute, locking the deal.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn open_dispute(
        &self,
        cmd: OpenDispute,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.open_dispute(cmd.initiator, &cmd.reason, cmd.level_deadline)
            })
            .await
    }

    /// Escalates the open dispute to platform review.
    #[tracing::instrument(skip(self))]
    pub async fn escalate_dispute(
        &self,
        cmd: EscalateDispute,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.escalate_dispute(cmd.level_deadline))
            .await
    }

    /// Resolves the open dispute.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id, resolution = %cmd.resolution))]
    pub async fn resolve_dispute(
        &self,
        cmd: ResolveDispute,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.resolve_dispute(cmd.resolution, cmd.refund_amount, cmd.adjusted_recipients)
            })
            .await
    }

    /// Withdraws the open dispute.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_dispute(
        &self,
        cmd: CancelDispute,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.cancel_dispute())
            .await
    }

    /// Records a milestone payment.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id, step_no = cmd.step_no))]
    pub async fn mark_milestone_paid(
        &self,
        cmd: MarkMilestonePaid,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute_with_metadata(cmd.deal_id, cmd.metadata, |deal| {
                deal.mark_milestone_paid(cmd.step_no, cmd.release_scheduled_at)
            })
            .await
    }

    /// Releases a held milestone.
    #[tracing::instrument(skip(self))]
    pub async fn release_milestone(
        &self,
        cmd: ReleaseMilestone,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.release_milestone(cmd.step_no, cmd.now, cmd.force)
            })
            .await
    }

    /// Cancels an unreleased milestone.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_milestone(
        &self,
        cmd: CancelMilestone,
    ) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.cancel_milestone(cmd.step_no))
            .await
    }

    /// Cancels a deal. Cancelling twice is a no-op.
    #[tracing::instrument(skip(self, cmd), fields(deal_id = %cmd.deal_id))]
    pub async fn cancel_deal(&self, cmd: CancelDeal) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| {
                deal.cancel(&cmd.reason, cmd.cancelled_by)
            })
            .await
    }

    /// Returns an early-cancelled deal to draft.
    #[tracing::instrument(skip(self))]
    pub async fn reopen_deal(&self, cmd: ReopenDeal) -> Result<CommandResult<Deal>, DomainError> {
        self.handler
            .execute(cmd.deal_id, |deal| deal.reopen())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deal::{
        DealStatus, Money, NewDeal, PaymentModel, Percent, RecipientRole, RecipientSpec, SplitRule,
    };
    use chrono::{Duration, Utc};
    use common::PartyId;
    use ledger::InMemoryLedger;

    fn service() -> DealService<InMemoryLedger> {
        DealService::new(InMemoryLedger::new())
    }

    fn input(creator: PartyId) -> NewDeal {
        NewDeal {
            creator,
            payment_model: PaymentModel::ProviderSplit,
            total_price: Money::from_minor_units(5_000_000),
            total_commission: Money::from_minor_units(100_000),
            recipients: vec![RecipientSpec::new(
                RecipientRole::Agent,
                creator,
                "Solo Agent",
                SplitRule::Percent(Percent::FULL),
            )],
            milestones: vec![],
        }
    }

    #[tokio::test]
    async fn full_lifecycle_through_service() {
        let svc = service();
        let creator = PartyId::new();
        let cmd = CreateDeal::new(input(creator));
        let deal_id = cmd.deal_id;

        svc.create_deal(cmd).await.unwrap();
        svc.submit_for_signing(SubmitForSigning { deal_id }).await.unwrap();
        svc.mark_signed(MarkSigned {
            deal_id,
            all_signed: true,
        })
        .await
        .unwrap();
        svc.attach_invoice(AttachInvoice {
            deal_id,
            provider_deal_id: Some("prov-1".into()),
            payment_url: Some("https://pay.example/1".into()),
            link_expires_at: None,
        })
        .await
        .unwrap();
        svc.record_payment_received(RecordPaymentReceived {
            deal_id,
            amount: Money::from_minor_units(100_000),
            transaction_id: "txn-1".into(),
            hold_expires_at: Utc::now() - Duration::minutes(1),
            metadata: Default::default(),
        })
        .await
        .unwrap();
        svc.mark_hold_expired(MarkHoldExpired {
            deal_id,
            now: Utc::now(),
            force: false,
        })
        .await
        .unwrap();
        svc.begin_payout(BeginPayout { deal_id }).await.unwrap();
        let result = svc
            .complete_payout(CompletePayout {
                deal_id,
                metadata: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(result.aggregate.status(), DealStatus::Closed);
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_and_nothing_persisted() {
        let svc = service();
        let creator = PartyId::new();
        let cmd = CreateDeal::new(input(creator));
        let deal_id = cmd.deal_id;
        svc.create_deal(cmd).await.unwrap();

        let err = svc
            .begin_payout(BeginPayout { deal_id })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Deal(_)));

        let deal = svc.get_deal(deal_id).await.unwrap().unwrap();
        assert_eq!(deal.status(), DealStatus::Draft);
    }

    #[tokio::test]
    async fn get_deal_returns_none_for_unknown() {
        let svc = service();
        assert!(svc.get_deal(AggregateId::new()).await.unwrap().is_none());
    }
}
