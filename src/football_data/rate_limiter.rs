//! Token-bucket admission control with a minimum spacing between grants.
//!
//! The bucket holds up to `capacity` tokens and refills continuously at
//! `capacity / refill_period` tokens per second. A grant needs one whole token
//! *and* at least `min_spacing` since the previous grant. A remote 429 can
//! additionally defer all grants until a given instant.
//!
//! Time is read from `tokio::time::Instant`, so tests drive the limiter on a
//! paused clock.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Absorbs float error from continuous refill.
const TOKEN_EPSILON: f64 = 1e-9;

/// Longest any single deferral or admission wait may last; longer requests
/// are clamped so instant arithmetic cannot overflow.
pub const MAX_DEFERRAL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub refill_period: Duration,
    pub min_spacing: Duration,
}

impl Default for RateLimiterConfig {
    /// football-data.org free tier: 10 calls per minute, 6s apart.
    fn default() -> Self {
        RateLimiterConfig {
            capacity: 10,
            refill_period: Duration::from_secs(60),
            min_spacing: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_acquire: Option<Instant>,
    deferred_until: Option<Instant>,
}

/// Point-in-time view of the limiter for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStatus {
    pub available_tokens: f64,
    pub capacity: u32,
    pub refill_period_secs: f64,
    pub min_spacing_secs: f64,
    pub wait_time_secs: f64,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        RateLimiter {
            config,
            state: Mutex::new(BucketState {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
                last_acquire: None,
                deferred_until: None,
            }),
        }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    fn refill_rate(&self) -> f64 {
        let period = self.config.refill_period.as_secs_f64();
        if period <= 0.0 {
            return f64::INFINITY;
        }
        self.config.capacity as f64 / period
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        let capacity = self.config.capacity as f64;
        state.tokens = (state.tokens + elapsed * self.refill_rate()).min(capacity);
        state.last_refill = now;
    }

    /// Time until a grant becomes possible from `state` at `now` (zero if
    /// one is possible right away).
    fn wait_from(&self, state: &BucketState, now: Instant) -> Duration {
        let token_wait = if state.tokens + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64((1.0 - state.tokens) / self.refill_rate())
                .unwrap_or(Duration::MAX)
                .max(Duration::from_nanos(1))
        };
        let spacing_wait = state
            .last_acquire
            .map(|t| (t + self.config.min_spacing).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        let deferred_wait = state
            .deferred_until
            .map(|t| t.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        token_wait.max(spacing_wait).max(deferred_wait)
    }

    /// Single non-blocking attempt. On refusal returns how long to wait.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        let wait = self.wait_from(&state, now);
        if wait.is_zero() {
            state.tokens = (state.tokens - 1.0).max(0.0);
            state.last_acquire = Some(now);
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Wait up to `timeout` for a grant. Returns `false` once the budget is
    /// spent without one; that is a normal "try later" outcome.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout.min(MAX_DEFERRAL);
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            let now = Instant::now();
            if now >= deadline {
                warn!("Rate limit wait budget ({:?}) exhausted", timeout);
                return false;
            }
            let sleep_for = wait.min(deadline - now);
            debug!("Rate limiter: waiting {:.2}s", sleep_for.as_secs_f64());
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// How long a caller would currently have to wait for a grant.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut state = *self.state.lock();
        self.refill(&mut state, now);
        self.wait_from(&state, now)
    }

    /// Block every grant until `backoff` from now has passed (remote 429).
    /// Clamped to [`MAX_DEFERRAL`].
    pub fn defer(&self, backoff: Duration) {
        let until = Instant::now() + backoff.min(MAX_DEFERRAL);
        let mut state = self.state.lock();
        state.deferred_until = Some(state.deferred_until.map_or(until, |t| t.max(until)));
    }

    pub fn status(&self) -> RateLimiterStatus {
        let now = Instant::now();
        let mut state = *self.state.lock();
        self.refill(&mut state, now);
        RateLimiterStatus {
            available_tokens: state.tokens,
            capacity: self.config.capacity,
            refill_period_secs: self.config.refill_period.as_secs_f64(),
            min_spacing_secs: self.config.min_spacing.as_secs_f64(),
            wait_time_secs: self.wait_from(&state, now).as_secs_f64(),
        }
    }
}
