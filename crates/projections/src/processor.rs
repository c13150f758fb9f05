//! Feeds ledger facts to registered projections.

use futures_util::StreamExt;
use ledger::{EventEnvelope, Ledger};

use crate::Result;
use crate::projection::Projection;

/// Delivers ledger events to projections.
///
/// Supports catch-up (replay everything a projection has not yet seen),
/// single-event delivery for the write path, and full rebuild.
pub struct ProjectionProcessor<L: Ledger> {
    ledger: L,
    projections: Vec<Box<dyn Projection>>,
}

impl<L: Ledger> ProjectionProcessor<L> {
    /// Creates a new processor reading from the given ledger.
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            projections: Vec::new(),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams all ledger facts and delivers each to every projection that
    /// has not already seen it.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let mut stream = self.ledger.stream_all().await?;
        let mut event_index: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            event_index += 1;

            for projection in &self.projections {
                let pos = projection.position().await;
                if pos.events_processed < event_index {
                    projection.handle(&event).await?;
                    metrics::counter!("projections_events_processed").increment(1);
                }
            }
        }

        tracing::info!(events_processed = event_index, "catch-up complete");

        Ok(())
    }

    /// Delivers a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets all projections and replays the whole ledger.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}
