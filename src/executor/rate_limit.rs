//! Token bucket rate limiting
//!
//! Tokens refill continuously at `rate_per_second` up to `burst_capacity`.
//! Each remote call consumes one token. A caller that finds the bucket empty
//! sleeps for exactly the time until the next token while holding the bucket
//! lock, so waiters are served in arrival order and no token is granted twice.

use crate::metrics::LimiterMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Slack for floating point drift when comparing token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// Outcome of [`RateLimiter::acquire`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// A token was consumed
    Granted,
    /// The wait would exceed the caller's timeout; nothing was consumed
    TimedOut,
}

impl Acquire {
    /// Whether a token was granted.
    pub fn is_granted(self) -> bool {
        matches!(self, Acquire::Granted)
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    tokens: f64,
    rate_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_second).min(self.capacity as f64);
        self.last_refill = now;
    }

    fn try_take(&mut self) -> bool {
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn time_until_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        let nanos = (missing / self.rate_per_second * 1e9).ceil() as u64;
        Duration::from_nanos(nanos.max(1))
    }
}

/// Snapshot of limiter configuration and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterStats {
    /// Configured rate (tokens per second)
    pub rate_per_second: f64,
    /// Configured burst capacity
    pub burst_capacity: u32,
    /// Tokens granted
    pub granted: u64,
    /// Grants that had to wait for a refill
    pub throttled: u64,
    /// Acquisitions that gave up on their timeout
    pub timed_out: u64,
}

impl LimiterStats {
    /// Percentage of grants that had to wait.
    pub fn throttle_rate(&self) -> f64 {
        if self.granted == 0 {
            0.0
        } else {
            self.throttled as f64 / self.granted as f64 * 100.0
        }
    }
}

/// Token bucket rate limiter shared by all workers of a batch.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    granted: AtomicU64,
    throttled: AtomicU64,
    timed_out: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter that starts with a full bucket.
    ///
    /// # Arguments
    /// * `rate_per_second` - Sustained rate, must be finite and > 0
    /// * `burst_capacity` - Maximum tokens held at once, must be >= 1
    pub fn new(rate_per_second: f64, burst_capacity: u32) -> Result<Self, RateLimitError> {
        validate(rate_per_second, burst_capacity)?;
        Ok(Self {
            bucket: Mutex::new(TokenBucket {
                capacity: burst_capacity,
                tokens: burst_capacity as f64,
                rate_per_second,
                last_refill: Instant::now(),
            }),
            granted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        })
    }

    /// Change rate and burst capacity of a live limiter.
    ///
    /// Tokens accrued under the old rate are kept, clamped to the new capacity.
    pub async fn configure(
        &self,
        rate_per_second: f64,
        burst_capacity: u32,
    ) -> Result<(), RateLimitError> {
        validate(rate_per_second, burst_capacity)?;
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.rate_per_second = rate_per_second;
        bucket.capacity = burst_capacity;
        bucket.tokens = bucket.tokens.min(burst_capacity as f64);
        info!(rate_per_second, burst_capacity, "Rate limiter reconfigured");
        Ok(())
    }

    /// Wait for a token.
    ///
    /// With `timeout`, returns [`Acquire::TimedOut`] without consuming anything
    /// as soon as it is known that no token can be had within the budget. The
    /// budget covers both queueing behind earlier waiters and the refill wait.
    /// A budget too large to represent as a deadline means no deadline.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Acquire {
        let mut metrics = LimiterMetrics::start();
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));

        let mut bucket = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.bucket.lock()).await {
                Ok(guard) => guard,
                Err(_) => return self.give_up(started),
            },
            None => self.bucket.lock().await,
        };

        let mut waited = false;
        loop {
            let now = Instant::now();
            bucket.refill(now);
            if bucket.try_take() {
                self.granted.fetch_add(1, Ordering::Relaxed);
                if waited {
                    self.throttled.fetch_add(1, Ordering::Relaxed);
                }
                metrics.record_granted(bucket.tokens);
                return Acquire::Granted;
            }

            let wait = bucket.time_until_token();
            if let Some(deadline) = deadline {
                if now.checked_add(wait).map_or(true, |ready| ready > deadline) {
                    return self.give_up(started);
                }
            }

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for token");
            waited = true;
            // The guard stays held: later callers queue behind this one.
            sleep(wait).await;
        }
    }

    /// Take a token only if one is available right now and nobody is queued.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        bucket.refill(Instant::now());
        if bucket.try_take() {
            self.granted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Return an unused token. Never exceeds capacity.
    pub async fn refund(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.tokens = (bucket.tokens + 1.0).min(bucket.capacity as f64);
    }

    /// Tokens currently available (fractional).
    pub async fn available_tokens(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now());
        bucket.tokens
    }

    /// Current configuration and counters.
    pub async fn stats(&self) -> LimiterStats {
        let bucket = self.bucket.lock().await;
        LimiterStats {
            rate_per_second: bucket.rate_per_second,
            burst_capacity: bucket.capacity,
            granted: self.granted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters.
    pub fn reset_stats(&self) {
        self.granted.store(0, Ordering::Relaxed);
        self.throttled.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
    }

    fn give_up(&self, started: Instant) -> Acquire {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            "Rate limiter acquire timed out"
        );
        Acquire::TimedOut
    }
}

fn validate(rate_per_second: f64, burst_capacity: u32) -> Result<(), RateLimitError> {
    if !(rate_per_second.is_finite() && rate_per_second > 0.0) {
        return Err(RateLimitError::InvalidRate(rate_per_second));
    }
    if burst_capacity == 0 {
        return Err(RateLimitError::InvalidBurst);
    }
    Ok(())
}

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    /// Rate is not a positive finite number
    #[error("rate must be a finite number > 0, got {0}")]
    InvalidRate(f64),

    /// Burst capacity is zero
    #[error("burst capacity must be at least 1")]
    InvalidBurst,
}
