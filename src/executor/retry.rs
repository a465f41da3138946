//! Retry policy and the generic retry loop.
//!
//! [`RetryPolicy`] is plain data: attempt ceilings per error kind plus the
//! backoff curve. [`execute_with_policy`] drives any fallible async operation
//! through it and returns the full attempt history.

use super::classify::{classify, ErrorKind, Failure};
use super::config::{
    BatchConfig, DEFAULT_BASE_BACKOFF_MS, DEFAULT_JITTER_PCT, DEFAULT_MALFORMED_MAX_ATTEMPTS,
    DEFAULT_MAX_ATTEMPTS, MAX_BACKOFF_MS,
};
use super::retry_formatter::RetryContext;
use crate::fingerprint::Fingerprint;
use crate::metrics::record_retry_backoff;
use crate::shutdown::StopSignal;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Attempt ceilings and backoff curve.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Ceiling for transient and throttled failures (initial attempt included)
    pub max_attempts: u32,
    /// Ceiling for malformed responses
    pub malformed_max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Uniform jitter, percent either side
    pub jitter_pct: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            malformed_max_attempts: DEFAULT_MALFORMED_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_pct: DEFAULT_JITTER_PCT,
        }
    }
}

impl RetryPolicy {
    /// Policy matching a batch configuration.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            malformed_max_attempts: config.malformed_max_attempts,
            base_delay: config.base_backoff_delay,
            max_delay: config.max_backoff_delay,
            jitter_pct: config.jitter_pct,
        }
    }

    /// Attempt ceiling for a kind. Auth and fatal failures get exactly one.
    pub fn max_attempts_for(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::Transient | ErrorKind::RateLimited => self.max_attempts,
            ErrorKind::MalformedResponse => self.malformed_max_attempts.min(self.max_attempts),
            ErrorKind::AuthInvalid | ErrorKind::Fatal => 1,
        }
    }

    /// Whether another attempt is allowed after `attempt` failed with `kind`.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_attempts_for(kind)
    }

    /// Un-jittered delay after `attempt` failed: `base * 2^(attempt-1)`, capped.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay after `attempt` failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.backoff_delay_with(attempt, unit)
    }

    /// Delay with a caller-supplied jitter sample in `-1.0..=1.0`.
    pub fn backoff_delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_backoff(attempt).as_secs_f64();
        let factor = 1.0 + unit.clamp(-1.0, 1.0) * f64::from(self.jitter_pct) / 100.0;
        Duration::from_secs_f64((base * factor).max(0.0)).min(self.max_delay)
    }

    /// Delay before retrying `failure`; a Retry-After hint is a lower bound.
    pub fn delay_for(&self, failure: &Failure, attempt: u32) -> Duration {
        let computed = self.backoff_delay(attempt);
        match failure.retry_after {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }
}

/// `should_retry` with an explicit ceiling and the default malformed cap.
pub fn should_retry(kind: ErrorKind, attempt: u32, max_attempts: u32) -> bool {
    RetryPolicy {
        max_attempts,
        ..RetryPolicy::default()
    }
    .should_retry(kind, attempt)
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Classified kind of the failure
    pub kind: ErrorKind,
    /// Delay slept before the next attempt; `None` for the final attempt
    pub delay_before_next_attempt: Option<Duration>,
}

/// Why the retry loop gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalFailure {
    /// Kind of the last failure
    pub kind: ErrorKind,
    /// The last failure
    pub failure: Failure,
    /// A stop was requested during backoff
    pub interrupted: bool,
}

impl TerminalFailure {
    /// Reason recorded against the item.
    pub fn reason(&self) -> String {
        if self.interrupted {
            format!("interrupted by stop signal (last error: {}: {})", self.kind, self.failure)
        } else {
            format!("{}: {}", self.kind, self.failure)
        }
    }
}

/// Result of [`execute_with_policy`] plus the attempt history.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final value or the failure that ended the loop
    pub result: Result<T, TerminalFailure>,
    /// Every failed attempt, in order
    pub history: Vec<RetryAttempt>,
    /// Attempts made, including a final successful one
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable kind, exhausts the
/// kind's ceiling, or `stop` fires during a backoff.
///
/// `op` receives the 1-based attempt number.
pub async fn execute_with_policy<T, F, Fut>(
    policy: &RetryPolicy,
    fingerprint: &Fingerprint,
    stop: Option<&StopSignal>,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let mut history = Vec::new();
    let mut attempt = 1u32;

    loop {
        let failure = match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(fingerprint = %fingerprint, attempt, "Retry succeeded");
                }
                return RetryOutcome {
                    result: Ok(value),
                    history,
                    attempts: attempt,
                };
            }
            Err(failure) => failure,
        };

        let kind = classify(&failure);
        let ceiling = policy.max_attempts_for(kind);

        if !policy.should_retry(kind, attempt) {
            let ctx = RetryContext::new(attempt, ceiling, kind, Duration::ZERO, fingerprint.as_str(), failure);
            warn!(
                fingerprint = %fingerprint,
                attempt,
                kind = %kind,
                error = %ctx.failure,
                "{}",
                ctx.format_failure()
            );
            history.push(RetryAttempt {
                attempt_number: attempt,
                kind,
                delay_before_next_attempt: None,
            });
            return RetryOutcome {
                result: Err(TerminalFailure {
                    kind,
                    failure: ctx.failure,
                    interrupted: false,
                }),
                history,
                attempts: attempt,
            };
        }

        let delay = policy.delay_for(&failure, attempt);
        let ctx = RetryContext::new(attempt + 1, ceiling, kind, delay, fingerprint.as_str(), failure);
        warn!(
            fingerprint = %fingerprint,
            attempt,
            kind = %kind,
            error = %ctx.failure,
            "{}",
            ctx.format_retry()
        );
        history.push(RetryAttempt {
            attempt_number: attempt,
            kind,
            delay_before_next_attempt: Some(delay),
        });
        record_retry_backoff(delay, attempt, kind);

        if !backoff(delay, stop).await {
            warn!(fingerprint = %fingerprint, attempt, "Stop requested during backoff");
            return RetryOutcome {
                result: Err(TerminalFailure {
                    kind,
                    failure: ctx.failure,
                    interrupted: true,
                }),
                history,
                attempts: attempt,
            };
        }

        attempt += 1;
    }
}

/// Sleep for `delay`; returns `false` if `stop` fired first.
async fn backoff(delay: Duration, stop: Option<&StopSignal>) -> bool {
    match stop {
        Some(stop) => {
            if stop.is_stop_requested() {
                return false;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = stop.stopped() => false,
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}
