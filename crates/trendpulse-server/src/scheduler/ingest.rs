//! Scheduled ingestion runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use trendpulse_engine::Engine;
use trendpulse_ingest::{
    run_ingestion, CheckpointStore, EventSource, IngestError, IngestReport, IngestionClient,
};

/// One ingestion pipeline, run at most once at a time.
pub struct IngestJob<S> {
    client: IngestionClient<S>,
    checkpoints: Arc<dyn CheckpointStore>,
    engine: Arc<Engine>,
    shutdown: watch::Receiver<bool>,
    running: AtomicBool,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: EventSource> IngestJob<S> {
    pub fn new(
        client: IngestionClient<S>,
        checkpoints: Arc<dyn CheckpointStore>,
        engine: Arc<Engine>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            checkpoints,
            engine,
            shutdown,
            running: AtomicBool::new(false),
        }
    }

    /// Drains the upstream feed into the engine.
    ///
    /// Returns `None` without doing anything when a previous run is still in
    /// progress. Failures are logged here and deferred to the next schedule.
    pub async fn run_once(&self) -> Option<Result<IngestReport, IngestError>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tracing::info!("scheduler: previous ingest run still in progress; skipping");
            return None;
        }
        let _guard = RunGuard(&self.running);

        tracing::info!(source = %self.client.source_name(), "scheduler: starting ingest run");
        let result = run_ingestion(
            &self.client,
            self.checkpoints.as_ref(),
            self.engine.as_ref(),
            self.shutdown.clone(),
        )
        .await;

        match &result {
            Ok(report) => tracing::info!(
                pages = report.pages,
                delivered = report.events_delivered,
                accepted = report.events_accepted,
                rejected = report.events_rejected,
                malformed = report.malformed_pages,
                reached_tail = report.reached_tail,
                "scheduler: ingest run complete"
            ),
            Err(IngestError::Cancelled) => {
                tracing::info!("scheduler: ingest run cancelled by shutdown");
            }
            Err(e @ IngestError::IngestionUnavailable { .. }) => {
                tracing::error!(error = %e, "scheduler: upstream unavailable; deferring to next run");
            }
            Err(e) => tracing::error!(error = %e, "scheduler: ingest run failed"),
        }
        Some(result)
    }
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod tests;
