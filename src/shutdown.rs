//! Cooperative stop signal for batch runs.
//!
//! A [`StopSignal`] is shared between the Ctrl+C handler and the batch
//! executor. The executor checks it between items and while sleeping in a
//! retry backoff, so an interrupted run stops dequeuing work while every
//! in-flight item still settles and persists its outcome.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a stop signal.
pub type SharedStop = Arc<StopSignal>;

static GLOBAL_STOP: OnceCell<SharedStop> = OnceCell::new();

/// Register the process-wide stop signal so executors built later pick it up.
pub fn set_global_stop(handle: SharedStop) {
    let _ = GLOBAL_STOP.set(handle);
}

/// The registered process-wide stop signal, if any.
pub fn global_stop() -> Option<SharedStop> {
    GLOBAL_STOP.get().cloned()
}

/// One-shot flag plus wakeup for tasks waiting on it.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Create a signal that has not fired.
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new signal wrapped in [`Arc`].
    pub fn shared() -> SharedStop {
        Arc::new(Self::new())
    }

    /// Fire the signal. Waiters are woken exactly once.
    pub fn request_stop(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request_stop
        // between the check and the await is not lost.
        notified.as_mut().enable();
        if self.is_stop_requested() {
            return;
        }
        notified.await;
    }
}

/// Fire `signal` when the process receives Ctrl+C.
pub fn install_ctrl_c_handler(signal: SharedStop) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received - finishing in-flight items and saving progress");
            signal.request_stop();
        }
    });
}
