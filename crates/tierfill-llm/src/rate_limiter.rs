//! Sliding-window request throttle with a backoff state machine.
//!
//! Two independent gates must both be open before a request may go out:
//!
//! 1. **Backoff window** -- set by [`RateLimiter::record_rate_limit_hit`]
//!    whenever the remote endpoint signals throttling, and cleared by a
//!    single [`RateLimiter::record_success`].
//! 2. **Request ceiling** -- at most `requests_per_minute` timestamps may be
//!    recorded in the trailing 60 seconds.
//!
//! # Algorithm
//!
//! Each granted request's `Instant` is appended to a deque. On every check,
//! timestamps older than the window are pruned from the front. If the deque
//! is full, the caller sleeps until the oldest timestamp ages out and then
//! re-checks, rather than sleeping for a guessed interval.
//!
//! Time is read from the tokio clock, so the limiter runs unchanged on a
//! paused test clock.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use tierfill_types::{BackoffStrategy, RateLimitPolicy};

/// Length of the rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

// ── RateGate ─────────────────────────────────────────────────────────────

/// The throttling seam consumed by
/// [`RemoteCompletionProvider`](crate::provider::RemoteCompletionProvider).
///
/// [`RateLimiter`] is the implementation; tests wrap it to observe calls.
#[async_trait]
pub trait RateGate: Send + Sync {
    /// Wait until a request may be sent, then record it.
    async fn acquire(&self);

    /// Register a throttling signal. Returns the new backoff window.
    fn record_rate_limit_hit(&self) -> Duration;

    /// Register a successful request.
    fn record_success(&self);

    /// Time left in the current backoff window (zero when not backing off).
    fn backoff_remaining(&self) -> Duration;
}

// ── RateLimiterState ─────────────────────────────────────────────────────

/// Point-in-time view of a [`RateLimiter`], for observability and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterState {
    /// Requests recorded in the trailing window.
    pub requests_in_window: usize,
    /// Configured ceiling (0 = unlimited).
    pub requests_per_minute: u32,
    /// Time left in the backoff window.
    pub backoff_remaining: Duration,
    /// Consecutive throttling signals since the last success.
    pub consecutive_hits: u32,
    /// Whether a backoff window is active.
    pub is_backing_off: bool,
    /// When the last request was granted.
    pub last_request: Option<Instant>,
    /// How long an `acquire()` issued now would wait.
    pub wait_time: Duration,
}

// ── RateLimiter ──────────────────────────────────────────────────────────

struct LimiterInner {
    /// Grant times within the window, oldest first.
    timestamps: VecDeque<Instant>,
    consecutive_hits: u32,
    backoff_until: Option<Instant>,
    last_request: Option<Instant>,
}

impl LimiterInner {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn backoff_remaining(&self, now: Instant) -> Duration {
        self.backoff_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Wait required before a request may be granted at `now`.
    /// Assumes `prune(now)` has run.
    fn wait_time(&self, now: Instant, ceiling: u32) -> Duration {
        let backoff = self.backoff_remaining(now);
        let window = if ceiling > 0 && self.timestamps.len() >= ceiling as usize {
            self.timestamps
                .front()
                .map(|oldest| (*oldest + RATE_WINDOW).saturating_duration_since(now))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };
        backoff.max(window)
    }
}

/// Sliding-window limiter with escalating backoff.
///
/// Thread-safe via an internal `Mutex`; the lock is never held across an
/// `.await`.
pub struct RateLimiter {
    requests_per_minute: u32,
    strategy: BackoffStrategy,
    initial_backoff: Duration,
    max_backoff: Duration,
    inner: Mutex<LimiterInner>,
}

impl RateLimiter {
    /// Create a limiter from a policy.
    pub fn new(policy: &RateLimitPolicy) -> Self {
        Self {
            requests_per_minute: policy.requests_per_minute,
            strategy: policy.backoff_strategy,
            initial_backoff: policy.initial_backoff(),
            max_backoff: policy.max_backoff(),
            inner: Mutex::new(LimiterInner {
                timestamps: VecDeque::new(),
                consecutive_hits: 0,
                backoff_until: None,
                last_request: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend until both the backoff window and the request ceiling allow a
    /// request, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.lock();
                let now = Instant::now();
                inner.prune(now);
                let wait = inner.wait_time(now, self.requests_per_minute);
                if wait.is_zero() {
                    inner.timestamps.push_back(now);
                    inner.last_request = Some(now);
                    return;
                }
                wait
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                ceiling = self.requests_per_minute,
                "rate limiter waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Register a throttling signal and open a new backoff window.
    pub fn record_rate_limit_hit(&self) -> Duration {
        let mut inner = self.lock();
        inner.consecutive_hits = inner.consecutive_hits.saturating_add(1);
        let backoff = compute_backoff(
            self.strategy,
            self.initial_backoff,
            self.max_backoff,
            inner.consecutive_hits,
        );
        inner.backoff_until = Some(Instant::now() + backoff);
        debug!(
            hits = inner.consecutive_hits,
            backoff_ms = backoff.as_millis() as u64,
            "rate limit hit recorded"
        );
        backoff
    }

    /// Clear the hit counter and backoff window.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_hits = 0;
        inner.backoff_until = None;
    }

    /// Time left in the current backoff window.
    pub fn backoff_remaining(&self) -> Duration {
        self.lock().backoff_remaining(Instant::now())
    }

    /// Snapshot of the current state. The wait time is recomputed on each call.
    pub fn state(&self) -> RateLimiterState {
        let inner = self.lock();
        let now = Instant::now();
        let requests_in_window = inner
            .timestamps
            .iter()
            .filter(|ts| now.duration_since(**ts) < RATE_WINDOW)
            .count();
        let backoff_remaining = inner.backoff_remaining(now);

        let window_wait = if self.requests_per_minute > 0
            && requests_in_window >= self.requests_per_minute as usize
        {
            inner
                .timestamps
                .iter()
                .find(|ts| now.duration_since(**ts) < RATE_WINDOW)
                .map(|oldest| (*oldest + RATE_WINDOW).saturating_duration_since(now))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        RateLimiterState {
            requests_in_window,
            requests_per_minute: self.requests_per_minute,
            backoff_remaining,
            consecutive_hits: inner.consecutive_hits,
            is_backing_off: !backoff_remaining.is_zero(),
            last_request: inner.last_request,
            wait_time: backoff_remaining.max(window_wait),
        }
    }
}

#[async_trait]
impl RateGate for RateLimiter {
    async fn acquire(&self) {
        RateLimiter::acquire(self).await;
    }

    fn record_rate_limit_hit(&self) -> Duration {
        RateLimiter::record_rate_limit_hit(self)
    }

    fn record_success(&self) {
        RateLimiter::record_success(self);
    }

    fn backoff_remaining(&self) -> Duration {
        RateLimiter::backoff_remaining(self)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .field("strategy", &self.strategy)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .finish()
    }
}

/// Backoff window after `hits` consecutive throttling signals.
///
/// `hits` is 1 for the first signal.
pub fn compute_backoff(
    strategy: BackoffStrategy,
    initial: Duration,
    max: Duration,
    hits: u32,
) -> Duration {
    let hits = hits.max(1);
    let raw = match strategy {
        BackoffStrategy::Exponential => {
            let factor = 2u32.saturating_pow(hits - 1);
            initial.saturating_mul(factor)
        }
        BackoffStrategy::Linear => initial.saturating_mul(hits),
        BackoffStrategy::Fixed => initial,
    };
    raw.min(max)
}
