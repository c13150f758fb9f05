//! Maps verified provider webhook events onto settlement commands.

use async_trait::async_trait;
use common::AggregateId;
use domain::{CommandMetadata, DealService, DealStatus, Money, ReleaseTrigger};
use ledger::Ledger;
use uuid::Uuid;
use webhook::{Disposition, EventHandler, HandlerError, ProviderEvent};

use crate::orchestrator::SettlementConfig;

/// Webhook dispatch into the deal aggregate.
///
/// The handler only applies facts the provider reports; it never calls
/// back out to the provider. Redeliveries that arrive after the fact was
/// already applied are treated as handled, so an at-least-once provider
/// never wedges a deal in the dead letter queue.
pub struct SettlementEventHandler<L: Ledger> {
    service: DealService<L>,
    config: SettlementConfig,
}

impl<L: Ledger> SettlementEventHandler<L> {
    pub fn new(ledger: L, config: SettlementConfig) -> Self {
        Self {
            service: DealService::new(ledger),
            config,
        }
    }

    /// Every appended event carries where it came from.
    fn metadata(event: &ProviderEvent) -> CommandMetadata {
        let mut metadata = CommandMetadata::new();
        metadata.insert("source".to_string(), "webhook".into());
        metadata.insert(
            "idempotency_key".to_string(),
            event.idempotency_key.as_str().into(),
        );
        if let Some(external_id) = &event.external_id {
            metadata.insert("provider_event_id".to_string(), external_id.as_str().into());
        }
        metadata
    }

    /// The provider echoes back our order id, which is the deal id.
    fn deal_id(event: &ProviderEvent) -> Result<AggregateId, HandlerError> {
        let raw = event
            .payload_str("order_id")
            .or_else(|| event.payload_str("orderId"))
            .ok_or_else(|| HandlerError::new("event carries no order reference"))?;
        let uuid = Uuid::parse_str(raw)
            .map_err(|_| HandlerError::new(format!("malformed order reference {raw:?}")))?;
        Ok(AggregateId::from_uuid(uuid))
    }

    async fn on_payment_pending(
        &self,
        deal_id: AggregateId,
        event: &ProviderEvent,
    ) -> Result<Disposition, HandlerError> {
        let current = self.load(deal_id).await?;
        if current != DealStatus::Invoiced {
            // Paid or failed already arrived; nothing left to record.
            return Ok(Disposition::Handled);
        }
        self.service
            .record_payment_pending(domain::RecordPaymentPending {
                deal_id,
                metadata: Self::metadata(event),
            })
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?;
        Ok(Disposition::Handled)
    }

    async fn on_payment_received(
        &self,
        deal_id: AggregateId,
        event: &ProviderEvent,
    ) -> Result<Disposition, HandlerError> {
        let transaction_id = event
            .payload_str("transaction_id")
            .or_else(|| event.payload_str("transactionId"))
            .ok_or_else(|| {
                HandlerError::for_deal("paid event carries no transaction id", deal_id)
            })?
            .to_string();
        let amount = event
            .payload
            .get("amount")
            .and_then(|v| v.as_i64())
            .map(Money::from_minor_units)
            .ok_or_else(|| HandlerError::for_deal("paid event carries no amount", deal_id))?;

        let deal = self.load_deal(deal_id).await?;
        if deal.transaction_id() == Some(transaction_id.as_str()) {
            // Redelivery of a payment we already applied.
            return Ok(Disposition::Handled);
        }
        self.service
            .record_payment_received(domain::RecordPaymentReceived {
                deal_id,
                amount,
                transaction_id,
                hold_expires_at: chrono::Utc::now() + self.config.hold_duration,
                metadata: Self::metadata(event),
            })
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?;
        Ok(Disposition::Handled)
    }

    async fn on_payment_failed(
        &self,
        deal_id: AggregateId,
        event: &ProviderEvent,
    ) -> Result<Disposition, HandlerError> {
        let reason = event
            .payload_str("reason")
            .or_else(|| event.payload_str("error"))
            .unwrap_or("payment failed")
            .to_string();
        let current = self.load(deal_id).await?;
        if current == DealStatus::PaymentFailed {
            return Ok(Disposition::Handled);
        }
        self.service
            .record_payment_failed(domain::RecordPaymentFailed {
                deal_id,
                reason,
                metadata: Self::metadata(event),
            })
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?;
        Ok(Disposition::Handled)
    }

    async fn on_released(
        &self,
        deal_id: AggregateId,
        event: &ProviderEvent,
    ) -> Result<Disposition, HandlerError> {
        let current = self.load(deal_id).await?;
        if current == DealStatus::Closed {
            return Ok(Disposition::Handled);
        }
        self.service
            .complete_payout(domain::CompletePayout {
                deal_id,
                metadata: Self::metadata(event),
            })
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?;
        Ok(Disposition::Handled)
    }

    async fn on_milestone_paid(
        &self,
        deal_id: AggregateId,
        event: &ProviderEvent,
    ) -> Result<Disposition, HandlerError> {
        let step_no = event
            .payload
            .get("step_no")
            .or_else(|| event.payload.get("stepNo"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                HandlerError::for_deal("milestone event carries no step number", deal_id)
            })? as u32;

        let deal = self.load_deal(deal_id).await?;
        let milestone = deal.milestone(step_no).ok_or_else(|| {
            HandlerError::for_deal(format!("milestone step {step_no} not found"), deal_id)
        })?;
        if milestone.status != domain::MilestoneStatus::Pending {
            return Ok(Disposition::Handled);
        }
        let release_scheduled_at = match milestone.trigger {
            ReleaseTrigger::Immediate => Some(chrono::Utc::now()),
            ReleaseTrigger::ShortHold => Some(chrono::Utc::now() + self.config.hold_duration),
            ReleaseTrigger::Confirmation | ReleaseTrigger::Date => None,
        };
        self.service
            .mark_milestone_paid(domain::MarkMilestonePaid {
                deal_id,
                step_no,
                release_scheduled_at,
                metadata: Self::metadata(event),
            })
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?;
        Ok(Disposition::Handled)
    }

    async fn load_deal(&self, deal_id: AggregateId) -> Result<domain::Deal, HandlerError> {
        self.service
            .get_deal(deal_id)
            .await
            .map_err(|e| HandlerError::for_deal(e.to_string(), deal_id))?
            .ok_or_else(|| HandlerError::for_deal("deal not found", deal_id))
    }

    async fn load(&self, deal_id: AggregateId) -> Result<DealStatus, HandlerError> {
        Ok(self.load_deal(deal_id).await?.status())
    }
}

#[async_trait]
impl<L: Ledger> EventHandler for SettlementEventHandler<L> {
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    async fn handle(&self, event: &ProviderEvent) -> Result<Disposition, HandlerError> {
        match event.event_type.as_str() {
            "deal.payment_pending" => {
                let deal_id = Self::deal_id(event)?;
                self.on_payment_pending(deal_id, event).await
            }
            "deal.paid" => {
                let deal_id = Self::deal_id(event)?;
                self.on_payment_received(deal_id, event).await
            }
            "deal.payment_failed" => {
                let deal_id = Self::deal_id(event)?;
                self.on_payment_failed(deal_id, event).await
            }
            "deal.released" => {
                let deal_id = Self::deal_id(event)?;
                self.on_released(deal_id, event).await
            }
            "milestone.paid" => {
                let deal_id = Self::deal_id(event)?;
                self.on_milestone_paid(deal_id, event).await
            }
            _ => Ok(Disposition::Unrecognized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::PartyId;
    use domain::{
        CreateDeal, NewDeal, PaymentModel, Percent, RecipientRole, RecipientSpec, SplitRule,
    };
    use ledger::InMemoryLedger;
    use serde_json::json;

    fn config() -> SettlementConfig {
        SettlementConfig::default()
    }

    async fn invoiced_deal(ledger: &InMemoryLedger) -> AggregateId {
        let service = DealService::new(ledger.clone());
        let creator = PartyId::new();
        let cmd = CreateDeal::new(NewDeal {
            creator,
            payment_model: PaymentModel::ProviderSplit,
            total_price: Money::from_minor_units(5_000_000),
            total_commission: Money::from_minor_units(150_000),
            recipients: vec![RecipientSpec::new(
                RecipientRole::Agent,
                creator,
                "Agent",
                SplitRule::Percent(Percent::FULL),
            )],
            milestones: vec![],
        });
        let deal_id = cmd.deal_id;
        service.create_deal(cmd).await.unwrap();
        service
            .submit_for_signing(domain::SubmitForSigning { deal_id })
            .await
            .unwrap();
        service
            .mark_signed(domain::MarkSigned {
                deal_id,
                all_signed: true,
            })
            .await
            .unwrap();
        service
            .attach_invoice(domain::AttachInvoice {
                deal_id,
                provider_deal_id: Some("prov-1".into()),
                payment_url: Some("https://pay.example/1".into()),
                link_expires_at: None,
            })
            .await
            .unwrap();
        deal_id
    }

    fn paid_event(deal_id: AggregateId, txn: &str) -> ProviderEvent {
        let body = json!({
            "event_id": "evt-1",
            "event": "deal.paid",
            "deal_id": "prov-1",
            "order_id": deal_id.to_string(),
            "transaction_id": txn,
            "amount": 150_000,
        });
        ProviderEvent::parse(body.to_string().as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn paid_event_moves_deal_into_hold() {
        let ledger = InMemoryLedger::new();
        let deal_id = invoiced_deal(&ledger).await;
        let handler = SettlementEventHandler::new(ledger.clone(), config());

        let disposition = handler.handle(&paid_event(deal_id, "txn-9")).await.unwrap();
        assert_eq!(disposition, Disposition::Handled);

        let deal = DealService::new(ledger)
            .get_deal(deal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deal.status(), DealStatus::HoldPeriod);
        assert_eq!(deal.transaction_id(), Some("txn-9"));
    }

    #[tokio::test]
    async fn paid_event_without_transaction_id_fails() {
        let ledger = InMemoryLedger::new();
        let deal_id = invoiced_deal(&ledger).await;
        let handler = SettlementEventHandler::new(ledger.clone(), config());

        let body = json!({
            "event": "deal.paid",
            "order_id": deal_id.to_string(),
            "amount": 150_000,
        });
        let event = ProviderEvent::parse(body.to_string().as_bytes()).unwrap();
        let err = handler.handle(&event).await.unwrap_err();
        assert!(err.message.contains("transaction id"));
        assert_eq!(err.deal_id, Some(deal_id));

        let deal = DealService::new(ledger)
            .get_deal(deal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deal.status(), DealStatus::Invoiced);
    }

    #[tokio::test]
    async fn redelivered_paid_event_is_handled_without_new_facts() {
        let ledger = InMemoryLedger::new();
        let deal_id = invoiced_deal(&ledger).await;
        let handler = SettlementEventHandler::new(ledger.clone(), config());

        handler.handle(&paid_event(deal_id, "txn-9")).await.unwrap();
        let before = ledger.event_count().await;
        let disposition = handler.handle(&paid_event(deal_id, "txn-9")).await.unwrap();

        assert_eq!(disposition, Disposition::Handled);
        assert_eq!(ledger.event_count().await, before);
    }

    #[tokio::test]
    async fn unknown_event_type_is_unrecognized() {
        let ledger = InMemoryLedger::new();
        let handler = SettlementEventHandler::new(ledger, config());
        let event = ProviderEvent::parse(br#"{"event":"kyc.updated"}"#).unwrap();

        let disposition = handler.handle(&event).await.unwrap();
        assert_eq!(disposition, Disposition::Unrecognized);
    }

    #[tokio::test]
    async fn event_without_order_reference_fails() {
        let ledger = InMemoryLedger::new();
        let handler = SettlementEventHandler::new(ledger, config());
        let event = ProviderEvent::parse(br#"{"event":"deal.paid","amount":1}"#).unwrap();

        let err = handler.handle(&event).await.unwrap_err();
        assert!(err.message.contains("order reference"));
    }

    #[tokio::test]
    async fn failed_event_records_reason() {
        let ledger = InMemoryLedger::new();
        let deal_id = invoiced_deal(&ledger).await;
        let handler = SettlementEventHandler::new(ledger.clone(), config());

        let body = json!({
            "event": "deal.payment_failed",
            "order_id": deal_id.to_string(),
            "reason": "insufficient funds",
        });
        let event = ProviderEvent::parse(body.to_string().as_bytes()).unwrap();
        handler.handle(&event).await.unwrap();

        let deal = DealService::new(ledger)
            .get_deal(deal_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deal.status(), DealStatus::PaymentFailed);
    }
}
