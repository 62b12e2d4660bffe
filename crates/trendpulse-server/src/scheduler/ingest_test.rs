use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use trendpulse_core::MentionEvent;
use trendpulse_ingest::{
    BackoffPolicy, Cursor, EventSource, IngestError, IngestionClient, MemoryCheckpointStore, Page,
    RateLimiter,
};

use super::IngestJob;
use crate::test_support::{at, mentions, test_engine, TestEngine};

/// Two pages: `events`, then an empty tail. The first fetch waits on `gate`
/// when one is set.
struct GatedSource {
    gate: Option<Arc<Notify>>,
    events: Vec<MentionEvent>,
}

#[async_trait]
impl EventSource for GatedSource {
    fn name(&self) -> &str {
        "gated"
    }

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, IngestError> {
        match cursor {
            None => {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                Ok(Page {
                    events: self.events.clone(),
                    next_cursor: Some(Cursor("p2".to_string())),
                    rejected: 0,
                })
            }
            Some(_) => Ok(Page::default()),
        }
    }
}

fn job(
    test: &TestEngine,
    gate: Option<Arc<Notify>>,
    shutdown: watch::Receiver<bool>,
) -> (IngestJob<GatedSource>, Arc<MemoryCheckpointStore>) {
    let source = GatedSource {
        gate,
        events: mentions("wide-leg-denim", at(10, 0), 10),
    };
    let limiter = Arc::new(RateLimiter::new(
        100,
        Duration::from_secs(1),
        Duration::from_secs(5),
    ));
    let checkpoints = Arc::new(MemoryCheckpointStore::new());
    let job = IngestJob::new(
        IngestionClient::new(source, limiter, BackoffPolicy::immediate(1)),
        checkpoints.clone(),
        Arc::clone(&test.engine),
        shutdown,
    );
    (job, checkpoints)
}

#[tokio::test]
async fn run_feeds_engine_and_checkpoints_first_page() {
    let test = test_engine(at(10, 45)).await;
    let (_tx, rx) = watch::channel(false);
    let (job, checkpoints) = job(&test, None, rx);

    let report = job
        .run_once()
        .await
        .expect("not skipped")
        .expect("run succeeds");

    assert_eq!(report.events_delivered, 10);
    assert!(report.reached_tail);
    assert_eq!(test.engine.metrics().events_accepted, 10);
    assert_eq!(
        checkpoints.current("gated").await,
        Some(Cursor("p2".to_string()))
    );
}

#[tokio::test]
async fn overlapping_run_is_skipped() {
    let test = test_engine(at(10, 45)).await;
    let (_tx, rx) = watch::channel(false);
    let gate = Arc::new(Notify::new());
    let (job, _) = job(&test, Some(Arc::clone(&gate)), rx);
    let job = Arc::new(job);

    let first = tokio::spawn({
        let job = Arc::clone(&job);
        async move { job.run_once().await }
    });
    while !job.running.load(Ordering::Acquire) {
        tokio::task::yield_now().await;
    }

    assert!(job.run_once().await.is_none(), "second run must be skipped");

    gate.notify_one();
    let result = first.await.expect("task joins").expect("first run was not skipped");
    assert!(result.is_ok());
    assert!(!job.running.load(Ordering::Acquire), "flag cleared after run");

    gate.notify_one();
    assert!(job.run_once().await.is_some(), "next scheduled run proceeds");
}

#[tokio::test]
async fn shutdown_cancels_run() {
    let test = test_engine(at(10, 45)).await;
    let (tx, rx) = watch::channel(false);
    let (job, checkpoints) = job(&test, None, rx);
    tx.send(true).expect("receiver alive");

    let result = job.run_once().await.expect("not skipped");
    assert!(matches!(result, Err(IngestError::Cancelled)));
    assert!(checkpoints.current("gated").await.is_none());
    assert!(!job.running.load(Ordering::Acquire));
}
