use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;
use trendpulse_core::{MentionEvent, SinkError};

use super::*;
use crate::checkpoint::MemoryCheckpointStore;

fn mention(post_id: &str) -> MentionEvent {
    MentionEvent {
        raw_entity_guess: "wide-leg denim".to_owned(),
        platform_post_id: post_id.to_owned(),
        observed_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        engagement_weight: 1.0,
        kind_hint: None,
        confidence: None,
    }
}

fn page(ids: &[&str], next: Option<&str>) -> Page {
    Page {
        events: ids.iter().map(|id| mention(id)).collect(),
        next_cursor: next.map(|c| Cursor(c.to_owned())),
        rejected: 0,
    }
}

fn key(cursor: Option<&Cursor>) -> String {
    cursor.map_or_else(|| "<start>".to_owned(), |c| c.0.clone())
}

enum Step {
    Serve(Page),
    Malformed(Option<&'static str>),
    Hang,
}

/// Scripted source: each cursor maps to a step, optionally preceded by a
/// number of transient 503 failures. Every fetch records the checkpoint the
/// store held at that moment.
struct ScriptedSource {
    steps: HashMap<String, Step>,
    failures_left: Mutex<HashMap<String, u32>>,
    checkpoints: Arc<MemoryCheckpointStore>,
    fetch_log: Mutex<Vec<(String, Option<Cursor>)>>,
}

impl ScriptedSource {
    fn new(checkpoints: Arc<MemoryCheckpointStore>) -> Self {
        Self {
            steps: HashMap::new(),
            failures_left: Mutex::new(HashMap::new()),
            checkpoints,
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    fn step(mut self, cursor: &str, step: Step) -> Self {
        self.steps.insert(cursor.to_owned(), step);
        self
    }

    fn failing(self, cursor: &str, times: u32) -> Self {
        self.failures_left
            .try_lock()
            .unwrap()
            .insert(cursor.to_owned(), times);
        self
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, IngestError> {
        let key = key(cursor);
        let seen = self.checkpoints.current("scripted").await;
        self.fetch_log.lock().await.push((key.clone(), seen));

        {
            let mut failures = self.failures_left.lock().await;
            if let Some(left) = failures.get_mut(&key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(IngestError::UpstreamStatus { status: 503 });
                }
            }
        }

        match self.steps.get(&key) {
            Some(Step::Serve(p)) => Ok(p.clone()),
            Some(Step::Malformed(next)) => Err(IngestError::MalformedPage {
                cursor: cursor.map(|c| c.0.clone()),
                next_cursor: next.map(|n| Cursor(n.to_owned())),
                reason: "events is not an array".to_owned(),
            }),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(IngestError::UpstreamStatus { status: 404 }),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    received: Mutex<Vec<MentionEvent>>,
    fail: AtomicBool,
}

#[async_trait]
impl MentionSink for RecordingSink {
    async fn accept(&self, events: Vec<MentionEvent>) -> Result<usize, SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError("aggregation store unavailable".to_owned()));
        }
        let count = events.len();
        self.received.lock().await.extend(events);
        Ok(count)
    }
}

fn client(source: ScriptedSource, attempts: u32) -> IngestionClient<ScriptedSource> {
    let limiter = Arc::new(RateLimiter::new(
        1_000,
        Duration::from_secs(1),
        Duration::from_secs(1),
    ));
    IngestionClient::new(source, limiter, BackoffPolicy::immediate(attempts))
}

fn cursor(c: &str) -> Option<Cursor> {
    Some(Cursor(c.to_owned()))
}

fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn drains_all_pages_and_checkpoints_each() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1", "p2"], Some("c1"))))
        .step("c1", Step::Serve(page(&["p3"], Some("c2"))))
        .step("c2", Step::Serve(page(&["p4"], None)));
    let client = client(source, 3);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.events_delivered, 4);
    assert_eq!(report.events_accepted, 4);
    assert!(report.reached_tail);
    assert_eq!(report.checkpoint, cursor("c2"));
    assert_eq!(store.current("scripted").await, cursor("c2"));
    assert_eq!(sink.received.lock().await.len(), 4);
}

#[tokio::test]
async fn transient_failures_on_second_page_keep_first_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Serve(page(&["p2", "p3"], None)))
        .failing("c1", 3);
    let client = client(source, 4);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    let log = client.source.fetch_log.lock().await.clone();
    let page_two: Vec<_> = log.iter().filter(|(k, _)| k == "c1").collect();
    assert_eq!(page_two.len(), 4, "three failures plus one success");
    for (_, seen) in page_two {
        assert_eq!(*seen, cursor("c1"), "checkpoint must hold at page one");
    }

    assert_eq!(report.events_delivered, 3);
    assert_eq!(store.current("scripted").await, cursor("c1"));
}

#[tokio::test]
async fn exhausted_retries_leave_checkpoint_at_last_accepted_page() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Serve(page(&["p2"], None)))
        .failing("c1", 10);
    let client = client(source, 3);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let err = run_ingestion(&client, &*store, &sink, rx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::IngestionUnavailable { attempts: 3, .. }));
    assert_eq!(store.current("scripted").await, cursor("c1"));
    assert_eq!(sink.received.lock().await.len(), 1);
}

#[tokio::test]
async fn sink_failure_does_not_advance_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))));
    let client = client(source, 1);
    let sink = RecordingSink::default();
    sink.fail.store(true, Ordering::SeqCst);
    let (_tx, rx) = no_shutdown();

    let err = run_ingestion(&client, &*store, &sink, rx)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Sink(_)));
    assert!(store.current("scripted").await.is_none());
}

#[tokio::test]
async fn malformed_page_with_successor_is_skipped() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Malformed(Some("c2")))
        .step("c2", Step::Serve(page(&["p2"], None)));
    let client = client(source, 3);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    assert_eq!(report.malformed_pages, 1);
    assert_eq!(report.pages, 2);
    assert!(report.reached_tail);
    assert_eq!(store.current("scripted").await, cursor("c2"));
    let fetches_of_bad_page = client
        .source
        .fetch_log
        .lock()
        .await
        .iter()
        .filter(|(k, _)| k == "c1")
        .count();
    assert_eq!(fetches_of_bad_page, 1, "malformed pages are not retried");
}

#[tokio::test]
async fn malformed_page_without_successor_stops_the_run() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Malformed(None));
    let client = client(source, 3);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    assert_eq!(report.malformed_pages, 1);
    assert!(!report.reached_tail);
    assert_eq!(store.current("scripted").await, cursor("c1"));
}

#[tokio::test]
async fn resumes_from_stored_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    store
        .save("scripted", &Cursor("c1".to_owned()))
        .await
        .unwrap();
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Serve(page(&["p2"], None)));
    let client = client(source, 1);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    assert_eq!(report.pages, 1);
    let received = sink.received.lock().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].platform_post_id, "p2");
}

#[tokio::test]
async fn page_cap_bounds_a_single_run() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Serve(page(&["p2"], Some("c2"))))
        .step("c2", Step::Serve(page(&["p3"], None)));
    let client = client(source, 1).with_max_pages_per_run(2);
    let sink = RecordingSink::default();
    let (_tx, rx) = no_shutdown();

    let report = run_ingestion(&client, &*store, &sink, rx).await.unwrap();

    assert_eq!(report.pages, 2);
    assert!(!report.reached_tail);
    assert_eq!(store.current("scripted").await, cursor("c2"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_fetch_keeps_last_checkpoint() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], Some("c1"))))
        .step("c1", Step::Hang);
    let client = client(source, 1);
    let sink = RecordingSink::default();
    let (tx, rx) = watch::channel(false);

    let run = run_ingestion(&client, &*store, &sink, rx);
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(run, cancel);

    assert!(matches!(result, Err(IngestError::Cancelled)));
    assert_eq!(store.current("scripted").await, cursor("c1"));
    assert_eq!(sink.received.lock().await.len(), 1);
}

#[tokio::test]
async fn already_cancelled_run_fetches_nothing() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let source = ScriptedSource::new(Arc::clone(&store))
        .step("<start>", Step::Serve(page(&["p1"], None)));
    let client = client(source, 1);
    let sink = RecordingSink::default();
    let (_tx, rx) = watch::channel(true);

    let result = run_ingestion(&client, &*store, &sink, rx).await;

    assert!(matches!(result, Err(IngestError::Cancelled)));
    assert!(client.source.fetch_log.lock().await.is_empty());
}
