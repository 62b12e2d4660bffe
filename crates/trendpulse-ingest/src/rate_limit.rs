//! Token-bucket rate limiter shared by every outbound upstream call.
//!
//! Tokens refill continuously at `capacity / period`. A ledger of recent grant
//! instants additionally caps grants at `capacity` within any rolling
//! `period`, so a full bucket after an idle stretch cannot be drained and then
//! immediately refilled into a double burst.
//!
//! The limiter reads `tokio::time::Instant`, so tests can drive it with a
//! paused clock.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::IngestError;

/// Snapshot of the limiter's remaining allowance.
#[derive(Debug, Clone, Copy)]
pub struct RateBudget {
    pub tokens_remaining: u32,
    /// When the next token becomes available. Equal to "now" when a token is
    /// available immediately.
    pub refill_at: Instant,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    grants: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    period: Duration,
    acquire_timeout: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Creates a limiter allowing `capacity` requests per `period`, starting full.
    ///
    /// `capacity` is clamped to at least 1 and `period` to at least 1ms.
    #[must_use]
    pub fn new(capacity: u32, period: Duration, acquire_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            period: period.max(Duration::from_millis(1)),
            acquire_timeout,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
                grants: VecDeque::with_capacity(capacity as usize),
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for a token, giving up after the configured acquire timeout.
    ///
    /// Waiters are served in lock order; the limiter never grants more than
    /// `capacity` tokens within any rolling `period`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::RateLimitTimeout`] if no token became available
    /// before the timeout elapsed.
    pub async fn acquire(&self) -> Result<(), IngestError> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                match self.take(&mut state, Instant::now()) {
                    None => return Ok(()),
                    Some(wait) => wait,
                }
            };

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = u64::try_from(now.duration_since(started).as_millis())
                    .unwrap_or(u64::MAX);
                tracing::warn!(waited_ms, "rate limiter: acquire timed out");
                return Err(IngestError::RateLimitTimeout { waited_ms });
            }

            tokio::time::sleep(wait.min(deadline - now)).await;
        }
    }

    /// Takes a token only if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.take(&mut state, Instant::now()).is_none()
    }

    /// Reports the current allowance without consuming anything.
    pub async fn budget(&self) -> RateBudget {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        self.refill(&mut state, now);

        let wait = self.wait_needed(&state, now);
        let ledger_room = self.capacity.saturating_sub(grant_count(&state));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole_tokens = state.tokens.floor() as u32;

        RateBudget {
            tokens_remaining: whole_tokens.min(ledger_room),
            refill_at: now + wait,
        }
    }

    /// Grants a token (returning `None`) or reports how long to wait.
    fn take(&self, state: &mut BucketState, now: Instant) -> Option<Duration> {
        self.refill(state, now);
        let wait = self.wait_needed(state, now);
        if wait.is_zero() {
            state.tokens -= 1.0;
            state.grants.push_back(now);
            None
        } else {
            // Float rounding can leave a sub-millisecond remainder; never spin.
            Some(wait.max(Duration::from_millis(1)))
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        let capacity = f64::from(self.capacity);
        let refilled = elapsed * capacity / self.period.as_secs_f64();
        state.tokens = (state.tokens + refilled).min(capacity);
        state.last_refill = now;

        while let Some(&oldest) = state.grants.front() {
            if now.duration_since(oldest) >= self.period {
                state.grants.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_needed(&self, state: &BucketState, now: Instant) -> Duration {
        let token_wait = if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            let rate = f64::from(self.capacity) / self.period.as_secs_f64();
            Duration::from_secs_f64((1.0 - state.tokens) / rate)
        };

        let ledger_wait = if grant_count(state) >= self.capacity {
            state.grants.front().map_or(Duration::ZERO, |&oldest| {
                (oldest + self.period).saturating_duration_since(now)
            })
        } else {
            Duration::ZERO
        };

        token_wait.max(ledger_wait)
    }
}

fn grant_count(state: &BucketState) -> u32 {
    u32::try_from(state.grants.len()).unwrap_or(u32::MAX)
}
