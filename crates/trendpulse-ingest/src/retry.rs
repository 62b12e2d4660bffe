//! Retry with capped exponential back-off and jitter for upstream calls.
//!
//! [`retry_with_backoff`] retries transient failures (network errors, 429,
//! 5xx). Everything else, including rate-limiter timeouts and malformed pages,
//! is returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::error::IngestError;

/// Back-off schedule for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// A policy that retries immediately, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// jittered by ±20% and never above `cap`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let computed = self.base.saturating_mul(1u32 << exponent);
        let jitter = rand::random::<f64>() * 0.4 + 0.8;
        computed.mul_f64(jitter).min(self.cap)
    }
}

/// Returns `true` for errors worth retrying after a back-off delay.
///
/// **Retriable:** timeouts, connection failures, HTTP 429 and 5xx.
///
/// **Not retriable:** other 4xx statuses, malformed pages, rate-limiter
/// timeouts, sink and checkpoint failures, cancellation.
pub(crate) fn is_retriable(err: &IngestError) -> bool {
    match err {
        IngestError::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status().is_some_and(|s| s.is_server_error())
        }
        IngestError::UpstreamStatus { status } => *status >= 500,
        IngestError::RateLimited { .. } => true,
        IngestError::MalformedPage { .. }
        | IngestError::RateLimitTimeout { .. }
        | IngestError::IngestionUnavailable { .. }
        | IngestError::Checkpoint(_)
        | IngestError::Sink(_)
        | IngestError::Cancelled
        | IngestError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` up to `policy.max_attempts` times.
///
/// Non-retriable errors are returned unchanged. When every attempt failed
/// transiently the last error is folded into
/// [`IngestError::IngestionUnavailable`]. A `Retry-After` hint from a 429 is
/// honoured when it is longer than the computed delay, still bounded by the cap.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    mut operation: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_retriable(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                tracing::error!(
                    attempt,
                    error = %err,
                    "upstream: giving up after transient failures"
                );
                return Err(IngestError::IngestionUnavailable {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
            Err(err) => {
                let mut delay = policy.delay_for(attempt);
                if let IngestError::RateLimited { retry_after_secs } = &err {
                    delay = delay
                        .max(Duration::from_secs(*retry_after_secs))
                        .min(policy.cap);
                }
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms,
                    error = %err,
                    "upstream: transient error, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn malformed() -> IngestError {
        IngestError::MalformedPage {
            cursor: None,
            next_cursor: None,
            reason: "events is not an array".to_owned(),
        }
    }

    #[test]
    fn server_errors_and_429_are_retriable() {
        assert!(is_retriable(&IngestError::UpstreamStatus { status: 503 }));
        assert!(is_retriable(&IngestError::RateLimited {
            retry_after_secs: 1
        }));
    }

    #[test]
    fn client_errors_and_bad_pages_are_not_retriable() {
        assert!(!is_retriable(&IngestError::UpstreamStatus { status: 404 }));
        assert!(!is_retriable(&malformed()));
        assert!(!is_retriable(&IngestError::RateLimitTimeout { waited_ms: 10 }));
    }

    #[test]
    fn delay_grows_exponentially_within_jitter_and_cap() {
        let policy = BackoffPolicy::default();
        for _ in 0..50 {
            let first = policy.delay_for(1);
            assert!(first >= Duration::from_millis(800) && first <= Duration::from_millis(1_200));
            let third = policy.delay_for(3);
            assert!(third >= Duration::from_millis(3_200) && third <= Duration::from_millis(4_800));
            assert!(policy.delay_for(10) <= Duration::from_secs(30));
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&BackoffPolicy::immediate(4), || {
            let c = Arc::clone(&c);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 4 {
                    Err(IngestError::UpstreamStatus { status: 502 })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn exhausted_attempts_become_ingestion_unavailable() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&BackoffPolicy::immediate(3), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(IngestError::UpstreamStatus { status: 500 })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(IngestError::IngestionUnavailable { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn does_not_retry_malformed_page() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&BackoffPolicy::immediate(5), || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(malformed())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "malformed pages must not be retried");
        assert!(matches!(result, Err(IngestError::MalformedPage { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn honours_retry_after_up_to_the_cap() {
        let policy = BackoffPolicy {
            max_attempts: 2,
            base: Duration::from_millis(10),
            cap: Duration::from_secs(5),
        };
        let start = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&policy, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(IngestError::RateLimited {
                        retry_after_secs: 60,
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
    }
}
