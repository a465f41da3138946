//! Observability metrics for batch crawling
//!
//! Counters and histograms for remote calls, classified failures, retries,
//! rate limiter waits and per-item outcomes.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate; emission is a no-op until a recorder is installed
//! - Prometheus exporter for scraping endpoint (`--metrics-addr`)

use crate::executor::ErrorKind;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "remote_calls_total",
        Unit::Count,
        "Remote calls made, labelled by outcome"
    );
    describe_histogram!(
        "remote_call_duration_seconds",
        Unit::Seconds,
        "Remote call duration in seconds"
    );
    describe_counter!(
        "classified_failures_total",
        Unit::Count,
        "Failed remote calls by error kind"
    );
    describe_counter!("retries_total", Unit::Count, "Retry attempts scheduled");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_counter!(
        "rate_limit_tokens_granted_total",
        Unit::Count,
        "Rate limiter tokens granted"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limiter token"
    );
    describe_gauge!(
        "rate_limit_tokens_available",
        Unit::Count,
        "Tokens left in the bucket after the last grant"
    );
    describe_counter!(
        "items_settled_total",
        Unit::Count,
        "Batch items settled, labelled by final status"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Timing of a single remote call.
pub struct CallMetrics {
    start_time: Instant,
    attempt: u32,
}

impl CallMetrics {
    /// Start timing a remote call
    pub fn start(attempt: u32) -> Self {
        Self {
            start_time: Instant::now(),
            attempt,
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.record("success");
    }

    /// Record a failed call and its classification
    pub fn record_failure(&self, kind: ErrorKind) {
        self.record("failure");
        counter!("classified_failures_total", "kind" => kind.as_str()).increment(1);
    }

    fn record(&self, outcome: &'static str) {
        let duration = self.start_time.elapsed();
        counter!(
            "remote_calls_total",
            "outcome" => outcome,
            "attempt" => self.attempt.to_string(),
        )
        .increment(1);
        histogram!("remote_call_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32, kind: ErrorKind) {
    counter!(
        "retries_total",
        "kind" => kind.as_str(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Rate limiter wait tracking
pub struct LimiterMetrics {
    start_time: Option<Instant>,
}

impl LimiterMetrics {
    /// Start measuring the wait for a token
    pub fn start() -> Self {
        Self {
            start_time: Some(Instant::now()),
        }
    }

    /// Record a granted token and the tokens left afterwards
    pub fn record_granted(&mut self, remaining_tokens: f64) {
        if let Some(start) = self.start_time.take() {
            let wait = start.elapsed();
            histogram!("rate_limit_wait_seconds").record(wait.as_secs_f64());
            counter!("rate_limit_tokens_granted_total").increment(1);
            gauge!("rate_limit_tokens_available").set(remaining_tokens);
        }
    }
}

/// Record the final status of a batch item
pub fn record_item_settled(status: &'static str) {
    counter!("items_settled_total", "status" => status).increment(1);
}

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}
