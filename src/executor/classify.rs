//! Failure taxonomy and classification
//!
//! A [`Failure`] is what a remote caller hands back when a call does not
//! succeed. It carries whatever hints the caller could observe (HTTP status,
//! platform business code, transport error kind, missing fields). [`classify`]
//! maps every failure to exactly one [`ErrorKind`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Platform business codes that signal throttling ("访问频次异常").
pub const THROTTLE_CODES: &[i64] = &[300013, 300015];

/// Platform business codes that signal an expired or missing session.
pub const SESSION_CODES: &[i64] = &[-100, -101, -104];

const THROTTLE_WORDING: &[&str] = &["rate limit", "too many requests", "频次", "频繁"];
const AUTH_WORDING: &[&str] = &["login", "unauthorized", "session expired", "登录"];
const TRANSIENT_WORDING: &[&str] = &["timeout", "timed out", "connection", "temporar", "超时"];

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-level or server-side hiccup; retry with backoff
    Transient,
    /// The platform asked us to slow down; retry with backoff
    RateLimited,
    /// Credentials rejected; every later item would fail the same way
    AuthInvalid,
    /// A response arrived but is missing required data
    MalformedResponse,
    /// Anything else; not retried
    Fatal,
}

impl ErrorKind {
    /// All kinds, in classification priority order.
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::RateLimited,
        ErrorKind::AuthInvalid,
        ErrorKind::Transient,
        ErrorKind::MalformedResponse,
        ErrorKind::Fatal,
    ];

    /// Stable lowercase name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Fatal => "fatal",
        }
    }

    /// Whether a failure of this kind may be retried at all.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient | ErrorKind::RateLimited | ErrorKind::MalformedResponse
        )
    }

    /// Whether a failure of this kind stops the whole batch.
    pub fn aborts_batch(self) -> bool {
        matches!(self, ErrorKind::AuthInvalid | ErrorKind::Fatal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level error observed before any response arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The request or connection timed out
    Timeout,
    /// Connection refused, reset, or DNS failure
    Connect,
    /// Any other transport problem
    Other,
}

/// A failed remote call, with the hints needed to classify it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Failure {
    /// Human-readable message
    pub message: String,
    /// HTTP status, if a response was received
    pub status: Option<u16>,
    /// Platform business code from the response envelope
    pub platform_code: Option<i64>,
    /// Transport error kind, if no response was received
    pub transport: Option<TransportKind>,
    /// Kind asserted by the caller; overrides every heuristic
    pub kind_hint: Option<ErrorKind>,
    /// Required field that was missing from an otherwise valid response
    pub missing_field: Option<String>,
    /// The body could not be decoded
    pub decode_error: bool,
    /// Server-provided minimum wait before retrying
    pub retry_after: Option<Duration>,
}

impl Failure {
    /// Failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Failure whose kind is known up front.
    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(message).with_kind(kind)
    }

    /// Non-success HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    /// Transport failure (no response).
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            transport: Some(kind),
            ..Self::new(message)
        }
    }

    /// Call exceeded its request timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transport(TransportKind::Timeout, message)
    }

    /// Response decoded but lacks a required field.
    pub fn missing_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("response is missing required field `{field}`"),
            missing_field: Some(field),
            ..Self::default()
        }
    }

    /// Response body could not be decoded.
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            decode_error: true,
            ..Self::new(message)
        }
    }

    /// Attach an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a platform business code.
    pub fn with_platform_code(mut self, code: i64) -> Self {
        self.platform_code = Some(code);
        self
    }

    /// Assert the kind explicitly.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind_hint = Some(kind);
        self
    }

    /// Attach a Retry-After hint.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Classify this failure.
    pub fn kind(&self) -> ErrorKind {
        classify(self)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.platform_code) {
            (Some(status), Some(code)) => write!(f, "{} (HTTP {status}, code {code})", self.message),
            (Some(status), None) => write!(f, "{} (HTTP {status})", self.message),
            (None, Some(code)) => write!(f, "{} (code {code})", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Failure {}

/// Map a failure to exactly one [`ErrorKind`].
///
/// An explicit `kind_hint` wins. Otherwise the first matching rule applies:
///
/// 1. throttling: HTTP 429, a throttle business code, or throttle wording
/// 2. auth: HTTP 401/403, a session business code, or login wording
/// 3. transient: transport timeout/connect error, HTTP 408 or 5xx, or
///    timeout/connection wording
/// 4. malformed: a missing required field or an undecodable body
/// 5. fatal: everything else
///
/// Throttling is checked before transient failures, so a connection reset
/// reported alongside a 429 is treated as throttling.
pub fn classify(failure: &Failure) -> ErrorKind {
    if let Some(kind) = failure.kind_hint {
        return kind;
    }

    let message = failure.message.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| message.contains(w));

    if failure.status == Some(429)
        || failure
            .platform_code
            .is_some_and(|code| THROTTLE_CODES.contains(&code))
        || mentions(THROTTLE_WORDING)
    {
        return ErrorKind::RateLimited;
    }

    if matches!(failure.status, Some(401) | Some(403))
        || failure
            .platform_code
            .is_some_and(|code| SESSION_CODES.contains(&code))
        || mentions(AUTH_WORDING)
    {
        return ErrorKind::AuthInvalid;
    }

    if matches!(
        failure.transport,
        Some(TransportKind::Timeout) | Some(TransportKind::Connect)
    ) || matches!(failure.status, Some(408) | Some(500..=599))
        || mentions(TRANSIENT_WORDING)
    {
        return ErrorKind::Transient;
    }

    if failure.missing_field.is_some() || failure.decode_error {
        return ErrorKind::MalformedResponse;
    }

    ErrorKind::Fatal
}
