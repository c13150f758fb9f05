//! Integration tests for the Deal aggregate.
//!
//! These tests verify the full settlement lifecycle including fact
//! persistence, aggregate reconstruction and concurrency handling.

use chrono::{Duration, Utc};
use common::{AggregateId, PartyId};
use domain::{
    AttachInvoice, BeginPayout, CancelDeal, CompletePayout, CreateDeal, DealService, DealStatus,
    DisputeResolution, DomainError, MarkHoldExpired, MarkSigned, Money, NewDeal, OpenDispute,
    PaymentModel, PayoutStatus, Percent, RecipientRole, RecipientSpec, RecordActSigned,
    RecordPaymentFailed, RecordPaymentReceived, ReopenDeal, RequestClientConfirmation,
    ResolveDispute, RetryInvoice, SplitRule, SubmitForSigning,
};
use ledger::{InMemoryLedger, Ledger, LedgerError, Version};

/// Helper to create a test deal service
fn create_service() -> DealService<InMemoryLedger> {
    DealService::new(InMemoryLedger::new())
}

fn sixty_forty(agent: PartyId, agency: PartyId) -> NewDeal {
    NewDeal {
        creator: agent,
        payment_model: PaymentModel::ProviderSplit,
        total_price: Money::from_minor_units(12_000_000),
        total_commission: Money::from_minor_units(100_000),
        recipients: vec![
            RecipientSpec::new(
                RecipientRole::Agent,
                agent,
                "Agent",
                SplitRule::Percent(Percent::from_percent(60)),
            ),
            RecipientSpec::new(
                RecipientRole::Agency,
                agency,
                "Agency",
                SplitRule::Percent(Percent::from_percent(40)),
            ),
        ],
        milestones: vec![],
    }
}

async fn deal_in_hold(
    service: &DealService<InMemoryLedger>,
    agent: PartyId,
    agency: PartyId,
) -> AggregateId {
    let cmd = CreateDeal::new(sixty_forty(agent, agency));
    let deal_id = cmd.deal_id;
    service.create_deal(cmd).await.unwrap();
    service
        .submit_for_signing(SubmitForSigning { deal_id })
        .await
        .unwrap();
    service
        .mark_signed(MarkSigned {
            deal_id,
            all_signed: true,
        })
        .await
        .unwrap();
    service
        .attach_invoice(AttachInvoice {
            deal_id,
            provider_deal_id: Some("prov-1".into()),
            payment_url: Some("https://pay.example/1".into()),
            link_expires_at: None,
        })
        .await
        .unwrap();
    service
        .record_payment_received(RecordPaymentReceived {
            deal_id,
            amount: Money::from_minor_units(100_000),
            transaction_id: "txn-1".into(),
            hold_expires_at: Utc::now() + Duration::days(5),
            metadata: Default::default(),
        })
        .await
        .unwrap();
    deal_id
}

mod deal_lifecycle {
    use super::*;

    #[tokio::test]
    async fn complete_settlement_lifecycle() {
        let service = create_service();
        let agent = PartyId::new();
        let agency = PartyId::new();

        let cmd = CreateDeal::new(sixty_forty(agent, agency));
        let deal_id = cmd.deal_id;
        let result = service.create_deal(cmd).await.unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::Draft);
        assert_eq!(result.new_version, Version::first());
        assert_eq!(
            result.aggregate.recipients()[0].calculated_amount,
            Money::from_minor_units(60_000)
        );

        service
            .submit_for_signing(SubmitForSigning { deal_id })
            .await
            .unwrap();
        service
            .mark_signed(MarkSigned {
                deal_id,
                all_signed: true,
            })
            .await
            .unwrap();
        let result = service
            .attach_invoice(AttachInvoice {
                deal_id,
                provider_deal_id: Some("prov-9".into()),
                payment_url: Some("https://pay.example/9".into()),
                link_expires_at: None,
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::Invoiced);

        let result = service
            .record_payment_received(RecordPaymentReceived {
                deal_id,
                amount: Money::from_minor_units(100_000),
                transaction_id: "txn-9".into(),
                hold_expires_at: Utc::now() - Duration::minutes(1),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::HoldPeriod);
        assert!(result
            .aggregate
            .recipients()
            .iter()
            .all(|r| r.payout_status == PayoutStatus::Hold));

        // Two-sided completion: client signs the act
        service
            .request_client_confirmation(RequestClientConfirmation {
                deal_id,
                deadline: Utc::now() + Duration::days(7),
            })
            .await
            .unwrap();
        let result = service
            .record_act_signed(RecordActSigned { deal_id })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::PayoutReady);

        service.begin_payout(BeginPayout { deal_id }).await.unwrap();
        let result = service
            .complete_payout(CompletePayout {
                deal_id,
                metadata: Default::default(),
            })
            .await
            .unwrap();

        assert_eq!(result.aggregate.status(), DealStatus::Closed);
        assert!(result
            .aggregate
            .recipients()
            .iter()
            .all(|r| r.payout_status == PayoutStatus::Released));
    }

    #[tokio::test]
    async fn payment_failure_retries_through_new_invoice() {
        let service = create_service();
        let agent = PartyId::new();
        let cmd = CreateDeal::new(sixty_forty(agent, PartyId::new()));
        let deal_id = cmd.deal_id;
        service.create_deal(cmd).await.unwrap();
        service
            .submit_for_signing(SubmitForSigning { deal_id })
            .await
            .unwrap();
        service
            .mark_signed(MarkSigned {
                deal_id,
                all_signed: true,
            })
            .await
            .unwrap();
        service
            .attach_invoice(AttachInvoice {
                deal_id,
                provider_deal_id: Some("prov-1".into()),
                payment_url: Some("https://pay.example/1".into()),
                link_expires_at: None,
            })
            .await
            .unwrap();

        let result = service
            .record_payment_failed(RecordPaymentFailed {
                deal_id,
                reason: "card declined".into(),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::PaymentFailed);

        let result = service
            .retry_invoice(RetryInvoice {
                deal_id,
                provider_deal_id: Some("prov-2".into()),
                payment_url: Some("https://pay.example/2".into()),
                link_expires_at: None,
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::Invoiced);
        assert_eq!(result.aggregate.provider_deal_id(), Some("prov-2"));
    }

    #[tokio::test]
    async fn aggregate_reconstructs_from_ledger() {
        let service = create_service();
        let agent = PartyId::new();
        let agency = PartyId::new();
        let deal_id = deal_in_hold(&service, agent, agency).await;

        // Fresh load replays every fact
        let deal = service.get_deal(deal_id).await.unwrap().unwrap();
        assert_eq!(deal.status(), DealStatus::HoldPeriod);
        assert_eq!(deal.transaction_id(), Some("txn-1"));
        assert_eq!(deal.recipients().len(), 2);
    }
}

mod dispute_flow {
    use super::*;

    #[tokio::test]
    async fn dispute_locks_deal_until_resolved() {
        let service = create_service();
        let agent = PartyId::new();
        let agency = PartyId::new();
        let deal_id = deal_in_hold(&service, agent, agency).await;

        service
            .open_dispute(OpenDispute {
                deal_id,
                initiator: agent,
                reason: "keys never handed over".into(),
                level_deadline: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();

        // Release is rejected while locked, regardless of elapsed time
        let err = service
            .mark_hold_expired(MarkHoldExpired {
                deal_id,
                now: Utc::now() + Duration::days(30),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Deal(domain::DealError::DisputeLocked { .. })
        ));

        let result = service
            .resolve_dispute(ResolveDispute {
                deal_id,
                resolution: DisputeResolution::NoRefund,
                refund_amount: None,
                adjusted_recipients: None,
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::HoldPeriod);
        assert!(!result.aggregate.dispute_locked());

        // Unlocked again: forced release goes through
        let result = service
            .mark_hold_expired(MarkHoldExpired {
                deal_id,
                now: Utc::now(),
                force: true,
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::PayoutReady);
    }

    #[tokio::test]
    async fn full_refund_terminates_deal() {
        let service = create_service();
        let agent = PartyId::new();
        let deal_id = deal_in_hold(&service, agent, PartyId::new()).await;

        service
            .open_dispute(OpenDispute {
                deal_id,
                initiator: agent,
                reason: "deal fell through".into(),
                level_deadline: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();
        let result = service
            .resolve_dispute(ResolveDispute {
                deal_id,
                resolution: DisputeResolution::FullRefund,
                refund_amount: None,
                adjusted_recipients: None,
            })
            .await
            .unwrap();

        assert_eq!(result.aggregate.status(), DealStatus::Refunded);
        assert!(result.aggregate.is_terminal());
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancel_reopen_round_trip() {
        let service = create_service();
        let agent = PartyId::new();
        let cmd = CreateDeal::new(sixty_forty(agent, PartyId::new()));
        let deal_id = cmd.deal_id;
        service.create_deal(cmd).await.unwrap();

        let result = service
            .cancel_deal(CancelDeal {
                deal_id,
                reason: "client backed out".into(),
                cancelled_by: Some(agent),
            })
            .await
            .unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::Cancelled);

        // Idempotent second cancel appends nothing
        let version = result.new_version;
        let result = service
            .cancel_deal(CancelDeal {
                deal_id,
                reason: "again".into(),
                cancelled_by: Some(agent),
            })
            .await
            .unwrap();
        assert!(result.events.is_empty());
        assert_eq!(result.new_version, version);

        let result = service.reopen_deal(ReopenDeal { deal_id }).await.unwrap();
        assert_eq!(result.aggregate.status(), DealStatus::Draft);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn conflicting_writers_lose_with_conflict_error() {
        let ledger = InMemoryLedger::new();
        let service = DealService::new(ledger.clone());
        let agent = PartyId::new();
        let agency = PartyId::new();
        let deal_id = deal_in_hold(&service, agent, agency).await;

        // Two sessions race: a manual release and a dispute open. Both
        // loaded the same version; only one append can win.
        let release = service.handler().load(deal_id).await.unwrap();
        let disputing = service.handler().load(deal_id).await.unwrap();
        assert_eq!(release.version(), disputing.version());

        service
            .open_dispute(OpenDispute {
                deal_id,
                initiator: agent,
                reason: "racing".into(),
                level_deadline: Utc::now() + Duration::hours(24),
            })
            .await
            .unwrap();

        // The stale writer appends with the old expected version
        use domain::{Aggregate, DomainEvent};
        let stale_events = release.mark_hold_expired(Utc::now(), true).unwrap();
        let envelope = ledger::EventEnvelope::builder()
            .aggregate_id(deal_id)
            .aggregate_type("Deal")
            .event_type(stale_events[0].event_type())
            .version(release.version().next())
            .payload(&stale_events[0])
            .unwrap()
            .build();
        let err = ledger
            .append(
                vec![envelope],
                ledger::AppendOptions::expect_version(release.version()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConcurrencyConflict { .. }));

        // The winner's lock survives
        let deal = service.get_deal(deal_id).await.unwrap().unwrap();
        assert!(deal.dispute_locked());
    }
}
