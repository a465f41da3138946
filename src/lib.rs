//! # XHS Crawler Library
//!
//! The resilience core of a Xiaohongshu web crawler: it drives large batches of
//! remote calls against a rate-sensitive, unreliable API without losing or
//! repeating work.
//!
//! ## Features
//!
//! - **Rate Limiting**: Token bucket shared by every worker, FIFO and timeout-aware
//! - **Classified Retries**: Failures are mapped to a closed taxonomy that decides
//!   whether to retry, how long to back off, and whether to abort the batch
//! - **Resume Capability**: Durable per-item progress with atomic writes, so an
//!   interrupted run skips what already succeeded
//! - **Graceful Shutdown**: Ctrl+C stops dequeuing while in-flight items settle
//! - **Pluggable Calls**: Anything implementing [`remote::RemoteCaller`] can be driven,
//!   including the bundled signed HTTP caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use xhs_crawler::executor::{BatchConfig, BatchExecutor};
//! use xhs_crawler::remote::{HttpCaller, StaticSigner, DEFAULT_BASE_URL};
//! use xhs_crawler::resume::ProgressStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Arc::new(StaticSigner::with_cookies("a1=...; web_session=..."));
//! let caller = HttpCaller::new(DEFAULT_BASE_URL, signer, "a1=...", std::time::Duration::from_secs(30))?;
//!
//! let store = Arc::new(ProgressStore::load("datas/.progress.json")?);
//! let executor = BatchExecutor::new().with_progress_store(store);
//!
//! let items = vec![
//!     "https://www.xiaohongshu.com/explore/64f1c2a3000000001f03a1b2".to_string(),
//! ];
//! let result = executor.run(items, &caller, &BatchConfig::default()).await?;
//! println!("{}", result.format_report());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`executor`] - Batch execution, rate limiting, classification and retry
//! - [`resume`] - Durable per-item progress store
//! - [`remote`] - Remote callers and request signing
//! - [`fingerprint`] - Stable item keys
//! - [`shutdown`] - Cooperative stop signal
//! - [`metrics`] - Prometheus metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

/// CLI command implementations
pub mod cli;

/// Batch execution with rate limiting and retries
pub mod executor;

/// Work item fingerprints
pub mod fingerprint;

/// Metrics collection and Prometheus export
pub mod metrics;

/// Remote callers and request signing
pub mod remote;

/// Resume capability for batch runs
pub mod resume;

/// Graceful shutdown shared across modules
pub mod shutdown;

// Re-export commonly used types
pub use executor::{BatchConfig, BatchExecutor, BatchResult, ErrorKind, Failure, RateLimiter};
pub use fingerprint::{Fingerprint, WorkItem};
pub use resume::ProgressStore;
