//! Batch execution with rate limiting, classified retries and resume
//!
//! # Overview
//!
//! Every item of a batch goes through the same steps:
//!
//! 1. **Resume check**: items already completed in the [`crate::resume::ProgressStore`] are skipped
//! 2. **Rate limiting**: each attempt waits for a token from [`rate_limit::RateLimiter`]
//! 3. **Call**: the [`crate::remote::RemoteCaller`] runs under the request timeout
//! 4. **Classification**: failures are mapped to an [`ErrorKind`] by [`classify`]
//! 5. **Retry**: [`retry::RetryPolicy`] decides whether and when to try again
//! 6. **Settle**: the outcome is persisted and reported in a [`result::BatchResult`]
//!
//! # Error Handling
//!
//! Failed items do not fail the run. Transient, throttled and malformed
//! failures are retried and then recorded against the item. Auth and fatal
//! failures abort the rest of the batch, which is reported through
//! [`result::BatchResult::abort`]. Only infrastructure faults return
//! [`BatchError`].
//!
//! # Components
//!
//! - [`batch`] - The executor
//! - [`classify`] - Failure taxonomy
//! - [`retry`] - Retry policy and loop
//! - [`rate_limit`] - Token bucket
//! - [`config`] - Defaults and validation
//! - [`result`] - Outcomes and the summary report

pub mod batch;
pub mod classify;
pub mod config;
pub mod progress;
pub mod rate_limit;
pub mod result;
pub mod retry;
pub mod retry_formatter;

pub use batch::{BatchExecutor, SettledEvent, SettledHook};
pub use classify::{classify, ErrorKind, Failure, TransportKind};
pub use config::{BatchConfig, ConfigError};
pub use progress::BatchProgress;
pub use rate_limit::{Acquire, LimiterStats, RateLimitError, RateLimiter};
pub use result::{BatchAbort, BatchResult, ItemOutcome, ItemStatus};
pub use retry::{
    execute_with_policy, should_retry, RetryAttempt, RetryOutcome, RetryPolicy, TerminalFailure,
};

use crate::fingerprint::FingerprintError;
use crate::resume::ProgressError;

/// Errors that stop a batch before or while it runs
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Rate limiter could not be built
    #[error("rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),

    /// An item has no usable fingerprint
    #[error("item {index} has an invalid fingerprint: {source}")]
    InvalidFingerprint {
        /// Position of the item in the input
        index: usize,
        /// Underlying error
        #[source]
        source: FingerprintError,
    },

    /// Two items in one batch share a fingerprint
    #[error("duplicate fingerprint in batch: {0}")]
    DuplicateFingerprint(String),

    /// Progress could not be read or persisted
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),
}
