//! Batch configuration defaults and validation

use std::time::Duration;

/// Default request rate (requests per second).
/// Matches the pace the web client tolerates without triggering
/// "访问频次异常" throttling responses.
pub const DEFAULT_RATE_PER_SECOND: f64 = 3.0;

/// Default token bucket burst capacity.
pub const DEFAULT_BURST_CAPACITY: u32 = 1;

/// Default attempt ceiling per item for transient and throttled failures
/// (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default attempt ceiling for malformed responses: one retry.
/// Repeating an identical request rarely fixes a payload shape mismatch.
pub const DEFAULT_MALFORMED_MAX_ATTEMPTS: u32 = 2;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;

/// Maximum computed backoff delay in milliseconds (2 minutes).
/// Server-provided Retry-After hints are not capped by this value.
pub const MAX_BACKOFF_MS: u64 = 120_000;

/// Jitter applied to computed backoff, as a percentage either side.
pub const DEFAULT_JITTER_PCT: u8 = 20;

/// Default per-call request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Upper bound on concurrent workers to avoid self-inflicted throttling.
pub const MAX_CONCURRENCY: usize = 32;

/// Longest accepted rate limiter acquire timeout (one day).
pub const MAX_ACQUIRE_TIMEOUT_SECS: u64 = 86_400;

/// Configuration consumed by [`crate::executor::BatchExecutor::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Sustained request rate (tokens per second), > 0
    pub rate_per_second: f64,
    /// Token bucket burst capacity, >= 1
    pub burst_capacity: u32,
    /// Attempt ceiling for transient and throttled failures, >= 1
    pub max_attempts: u32,
    /// Attempt ceiling for malformed responses, >= 1
    pub malformed_max_attempts: u32,
    /// Base delay for exponential backoff, > 0
    pub base_backoff_delay: Duration,
    /// Cap on computed backoff delay
    pub max_backoff_delay: Duration,
    /// Jitter percentage (0-100)
    pub jitter_pct: u8,
    /// Timeout for a single remote call, > 0
    pub request_timeout: Duration,
    /// Maximum time to wait for a rate limiter token; `None` waits indefinitely
    pub acquire_timeout: Option<Duration>,
    /// Consult and update the progress store
    pub resume_enabled: bool,
    /// Number of concurrent workers (1..=MAX_CONCURRENCY)
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rate_per_second: DEFAULT_RATE_PER_SECOND,
            burst_capacity: DEFAULT_BURST_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            malformed_max_attempts: DEFAULT_MALFORMED_MAX_ATTEMPTS,
            base_backoff_delay: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff_delay: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_pct: DEFAULT_JITTER_PCT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            acquire_timeout: None,
            resume_enabled: true,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl BatchConfig {
    /// Set the sustained rate and burst capacity
    pub fn with_rate(mut self, rate_per_second: f64, burst_capacity: u32) -> Self {
        self.rate_per_second = rate_per_second;
        self.burst_capacity = burst_capacity;
        self
    }

    /// Set the attempt ceiling for retryable failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base backoff delay
    pub fn with_base_backoff(mut self, delay: Duration) -> Self {
        self.base_backoff_delay = delay;
        self
    }

    /// Set the jitter percentage
    pub fn with_jitter_pct(mut self, jitter_pct: u8) -> Self {
        self.jitter_pct = jitter_pct;
        self
    }

    /// Set the per-call request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the rate limiter acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Enable or disable resume through the progress store
    pub fn with_resume(mut self, enabled: bool) -> Self {
        self.resume_enabled = enabled;
        self
    }

    /// Set the number of concurrent workers
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rate_per_second.is_finite() && self.rate_per_second > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "rate_per_second",
                reason: format!("must be a finite number > 0, got {}", self.rate_per_second),
            });
        }
        if self.burst_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "burst_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.malformed_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "malformed_max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.base_backoff_delay.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "base_backoff_delay",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_backoff_delay < self.base_backoff_delay {
            return Err(ConfigError::InvalidValue {
                field: "max_backoff_delay",
                reason: "must be >= base_backoff_delay".to_string(),
            });
        }
        if self.jitter_pct > 100 {
            return Err(ConfigError::InvalidValue {
                field: "jitter_pct",
                reason: format!("must be <= 100, got {}", self.jitter_pct),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(timeout) = self.acquire_timeout {
            if timeout.is_zero() || timeout > Duration::from_secs(MAX_ACQUIRE_TIMEOUT_SECS) {
                return Err(ConfigError::InvalidValue {
                    field: "acquire_timeout",
                    reason: format!("must be in 1..={MAX_ACQUIRE_TIMEOUT_SECS} seconds, got {timeout:?}"),
                });
            }
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                reason: format!("must be in 1..={MAX_CONCURRENCY}, got {}", self.concurrency),
            });
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A field is outside its allowed range
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}
