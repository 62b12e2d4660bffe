//! Paged ingestion loop.
//!
//! Pages are fetched one at a time through the shared rate limiter, handed to
//! the sink, and the cursor is checkpointed only after the sink accepted the
//! page. A crash or cancellation between fetch and checkpoint therefore
//! re-delivers that page on the next run; sinks deduplicate by post id.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use trendpulse_core::MentionSink;

use crate::checkpoint::CheckpointStore;
use crate::error::IngestError;
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::source::{Cursor, EventSource, Page};

const DEFAULT_MAX_PAGES_PER_RUN: usize = 1_000;

/// Rate-limited, retrying wrapper around an [`EventSource`].
pub struct IngestionClient<S> {
    source: S,
    limiter: Arc<RateLimiter>,
    policy: BackoffPolicy,
    max_pages_per_run: usize,
}

impl<S: EventSource> IngestionClient<S> {
    #[must_use]
    pub fn new(source: S, limiter: Arc<RateLimiter>, policy: BackoffPolicy) -> Self {
        Self {
            source,
            limiter,
            policy,
            max_pages_per_run: DEFAULT_MAX_PAGES_PER_RUN,
        }
    }

    /// Caps the number of pages a single [`run_ingestion`] call will fetch.
    #[must_use]
    pub fn with_max_pages_per_run(mut self, max_pages: usize) -> Self {
        self.max_pages_per_run = max_pages.max(1);
        self
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetches one page, taking a rate-limiter token before every attempt.
    ///
    /// # Errors
    ///
    /// - [`IngestError::RateLimitTimeout`] if no token was granted in time.
    /// - [`IngestError::IngestionUnavailable`] once transient failures
    ///   exhaust the attempt limit.
    /// - [`IngestError::MalformedPage`] and terminal statuses immediately.
    pub async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, IngestError> {
        retry_with_backoff(&self.policy, move || async move {
            self.limiter.acquire().await?;
            self.source.fetch_page(cursor).await
        })
        .await
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages: usize,
    /// Events handed to the sink.
    pub events_delivered: usize,
    /// Events the sink reported as newly counted.
    pub events_accepted: usize,
    /// Events dropped at the validation boundary.
    pub events_rejected: usize,
    pub malformed_pages: usize,
    pub checkpoint: Option<Cursor>,
    /// `true` when the run stopped at the end of the feed rather than on
    /// the page cap or a malformed page without a successor.
    pub reached_tail: bool,
}

/// Drains the source from its last checkpoint until the feed tail.
///
/// A malformed page whose envelope still names a successor is skipped and its
/// successor checkpointed; one without a successor ends the run. The final
/// page (no `next_cursor`) is not checkpointed past, so the tail is re-polled
/// on the next run.
///
/// # Errors
///
/// Returns the first non-recoverable error. The checkpoint then still points
/// at the last page the sink accepted. [`IngestError::Cancelled`] is returned
/// when `shutdown` flips to `true` mid-run.
pub async fn run_ingestion<S: EventSource>(
    client: &IngestionClient<S>,
    checkpoints: &dyn CheckpointStore,
    sink: &dyn MentionSink,
    mut shutdown: watch::Receiver<bool>,
) -> Result<IngestReport, IngestError> {
    let source = client.source_name().to_owned();
    let mut cursor = checkpoints.load(&source).await?;
    let mut report = IngestReport {
        checkpoint: cursor.clone(),
        ..IngestReport::default()
    };

    tracing::info!(
        source = %source,
        cursor = cursor.as_ref().map_or("<start>", |c| c.0.as_str()),
        "ingest: run starting"
    );

    while report.pages < client.max_pages_per_run {
        if *shutdown.borrow() {
            return Err(IngestError::Cancelled);
        }

        let fetched = cancellable(&mut shutdown, client.fetch_page(cursor.as_ref())).await?;
        let page = match fetched {
            Ok(page) => page,
            Err(IngestError::MalformedPage {
                next_cursor,
                reason,
                ..
            }) => {
                report.malformed_pages += 1;
                let Some(next) = next_cursor else {
                    tracing::warn!(
                        source = %source,
                        reason = %reason,
                        "ingest: malformed page without successor, stopping"
                    );
                    break;
                };
                tracing::warn!(
                    source = %source,
                    reason = %reason,
                    next = %next,
                    "ingest: skipping malformed page"
                );
                checkpoints.save(&source, &next).await?;
                report.checkpoint = Some(next.clone());
                cursor = Some(next);
                continue;
            }
            Err(err) => return Err(err),
        };

        report.pages += 1;
        report.events_rejected += page.rejected;
        report.events_delivered += page.events.len();

        let accepted = cancellable(&mut shutdown, sink.accept(page.events)).await??;
        report.events_accepted += accepted;

        match page.next_cursor {
            Some(next) => {
                checkpoints.save(&source, &next).await?;
                report.checkpoint = Some(next.clone());
                cursor = Some(next);
            }
            None => {
                report.reached_tail = true;
                break;
            }
        }
    }

    tracing::info!(
        source = %source,
        pages = report.pages,
        delivered = report.events_delivered,
        accepted = report.events_accepted,
        rejected = report.events_rejected,
        malformed = report.malformed_pages,
        reached_tail = report.reached_tail,
        "ingest: run complete"
    );

    Ok(report)
}

/// Races `work` against the shutdown flag. A dropped sender never cancels.
async fn cancellable<T>(
    shutdown: &mut watch::Receiver<bool>,
    work: impl Future<Output = T>,
) -> Result<T, IngestError> {
    tokio::select! {
        biased;
        () = cancelled(shutdown) => Err(IngestError::Cancelled),
        out = work => Ok(out),
    }
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
