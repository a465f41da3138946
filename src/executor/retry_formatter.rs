//! Retry and failure message formatting.
//!
//! Builds the user-facing lines logged while an item is being retried and the
//! summary printed when it finally fails, with remediation hints keyed on the
//! error kind and HTTP status.

use super::classify::{ErrorKind, Failure, TransportKind};
use std::time::Duration;

/// Short description of a failure for retry log lines.
pub fn describe(kind: ErrorKind, failure: &Failure) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "rate limit exceeded",
        ErrorKind::AuthInvalid => match failure.status {
            Some(401) => "authentication failed (401)",
            Some(403) => "access denied (403)",
            _ => "session rejected",
        },
        ErrorKind::Transient => match (failure.status, failure.transport) {
            (Some(500), _) => "internal server error",
            (Some(502), _) => "bad gateway",
            (Some(503), _) => "service unavailable",
            (Some(504), _) => "gateway timeout",
            (Some(_), _) => "server error",
            (None, Some(TransportKind::Timeout)) => "network timeout",
            (None, Some(TransportKind::Connect)) => "connection failed",
            (None, _) => "network error",
        },
        ErrorKind::MalformedResponse => "malformed response",
        ErrorKind::Fatal => match failure.status {
            Some(404) => "resource not found",
            Some(_) => "client error",
            None => "unrecoverable error",
        },
    }
}

/// Remediation hint for a failure.
pub fn suggestion(kind: ErrorKind, failure: &Failure) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "Requests are too frequent, lower --rate-limit or try again later",
        ErrorKind::AuthInvalid => match failure.status {
            Some(403) => "Access denied, refresh the cookies or switch proxy",
            _ => "Check that the cookies are valid and not expired",
        },
        ErrorKind::Transient => match failure.transport {
            Some(TransportKind::Timeout) => "Check your network connection or raise --timeout",
            Some(TransportKind::Connect) => "Check your network connection or use a proxy",
            _ => "The server had a problem, try again later",
        },
        ErrorKind::MalformedResponse => {
            "The response shape changed or the signature was rejected, check the signer"
        }
        ErrorKind::Fatal => match failure.status {
            Some(404) => "The item does not exist, check the URL or id",
            _ => "Review the request parameters",
        },
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Attempt ceiling for this kind
    pub max_attempts: u32,
    /// Classified kind
    pub kind: ErrorKind,
    /// Wait before the next attempt
    pub backoff_duration: Duration,
    /// Item being processed
    pub fingerprint: String,
    /// The failure itself
    pub failure: Failure,
}

impl RetryContext {
    /// Convenience constructor used by the retry loop.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        kind: ErrorKind,
        backoff_duration: Duration,
        fingerprint: impl Into<String>,
        failure: Failure,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            kind,
            backoff_duration,
            fingerprint: fingerprint.into(),
            failure,
        }
    }

    /// Standardized retry line with attempt counters and wait time.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt,
            self.max_attempts,
            describe(self.kind, &self.failure),
            self.backoff_duration.as_secs_f64(),
            self.fingerprint
        )
    }

    /// Final failure summary with suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempt{}",
                self.fingerprint,
                self.attempt,
                if self.attempt == 1 { "" } else { "s" }
            ),
            format!("  Kind: {}", self.kind),
            format!("  Last error: {}", self.failure),
            "  Suggestions:".to_string(),
        ];
        for hint in self.format_suggestions() {
            lines.push(format!("    - {hint}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the current context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![suggestion(self.kind, &self.failure).to_string()];
        if self.kind.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}
