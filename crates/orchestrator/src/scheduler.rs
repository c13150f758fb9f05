//! Time-driven settlement sweep.
//!
//! Periodically scans the settlement queue read model for deals whose
//! clocks have run out: elapsed holds, overdue client confirmations, due
//! milestones and disputes stuck at agency review. Each item is handled
//! in isolation, so one failing deal never blocks the rest of the sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ledger::Ledger;
use projections::{ProjectionProcessor, SettlementQueueView};

use crate::dispute::DisputeManager;
use crate::esign::ESignService;
use crate::esp::EspClient;
use crate::notify::{FiscalReceipts, Notifier};
use crate::orchestrator::{DealOrchestrator, ReleaseOutcome};

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub holds_released: usize,
    pub confirmations_auto_released: usize,
    pub milestones_released: usize,
    pub disputes_escalated: usize,
    /// Releases the provider refused; they stay queued for the next pass.
    pub deferred: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The background sweeper driving all time-based transitions.
pub struct SettlementSweeper<L, E, G, N, F>
where
    L: Ledger,
    E: EspClient,
    G: ESignService,
    N: Notifier,
    F: FiscalReceipts,
{
    processor: ProjectionProcessor<L>,
    queue: SettlementQueueView,
    orchestrator: Arc<DealOrchestrator<L, E, G, N, F>>,
    disputes: Arc<DisputeManager<L, E, N>>,
}

impl<L, E, G, N, F> SettlementSweeper<L, E, G, N, F>
where
    L: Ledger,
    E: EspClient,
    G: ESignService,
    N: Notifier,
    F: FiscalReceipts,
{
    /// Creates a sweeper over its own queue projection.
    ///
    /// The queue view is registered with the processor and caught up
    /// from the ledger at the start of every pass.
    pub fn new(
        ledger: L,
        orchestrator: Arc<DealOrchestrator<L, E, G, N, F>>,
        disputes: Arc<DisputeManager<L, E, N>>,
    ) -> Self {
        let queue = SettlementQueueView::new();
        let mut processor = ProjectionProcessor::new(ledger);
        processor.register(Box::new(queue.clone()));
        Self {
            processor,
            queue,
            orchestrator,
            disputes,
        }
    }

    pub fn queue(&self) -> &SettlementQueueView {
        &self.queue
    }

    /// Runs a single sweep pass at the given instant.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        if let Err(err) = self.processor.run_catch_up().await {
            tracing::error!(error = %err, "queue catch-up failed, skipping sweep pass");
            report.failures += 1;
            return report;
        }

        for deal_id in self.queue.expired_holds(now).await {
            match self.orchestrator.release_after_hold(deal_id, now, false).await {
                Ok(ReleaseOutcome::Released(_)) => report.holds_released += 1,
                Ok(ReleaseOutcome::Deferred { reason }) => {
                    tracing::warn!(%deal_id, reason, "release deferred");
                    report.deferred += 1;
                }
                Err(err) => {
                    tracing::error!(%deal_id, error = %err, "hold release failed");
                    report.failures += 1;
                }
            }
        }

        for deal_id in self.queue.expired_confirmations(now).await {
            match self
                .orchestrator
                .auto_release_confirmation(deal_id, now)
                .await
            {
                Ok(ReleaseOutcome::Released(_)) => report.confirmations_auto_released += 1,
                Ok(ReleaseOutcome::Deferred { reason }) => {
                    tracing::warn!(%deal_id, reason, "auto-release deferred");
                    report.deferred += 1;
                }
                Err(err) => {
                    tracing::error!(%deal_id, error = %err, "confirmation auto-release failed");
                    report.failures += 1;
                }
            }
        }

        for (deal_id, step_no) in self.queue.due_milestones(now).await {
            match self
                .orchestrator
                .release_milestone(deal_id, step_no, now, false)
                .await
            {
                Ok(_) => report.milestones_released += 1,
                Err(err) => {
                    tracing::error!(%deal_id, step_no, error = %err, "milestone release failed");
                    report.failures += 1;
                }
            }
        }

        for deal_id in self.queue.overdue_disputes(now).await {
            match self.disputes.escalate(deal_id).await {
                Ok(_) => report.disputes_escalated += 1,
                Err(err) => {
                    tracing::error!(%deal_id, error = %err, "dispute escalation failed");
                    report.failures += 1;
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(?report, "sweep pass complete");
        }
        metrics::counter!("sweep_passes_total").increment(1);
        report
    }

    /// Runs the sweep on a fixed interval until the task is aborted.
    pub async fn run(&self, every: std::time::Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.run_once(Utc::now()).await;
        }
    }
}
