//! Periodic progress lines for long batches.
//!
//! Emits a `[PROGRESS]` line whenever another 10% of the batch has settled or
//! the update interval has passed, with throughput and an ETA.

use super::result::ItemStatus;
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Running counters for a batch.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Items in the batch
    pub total: u64,
    /// Items settled so far (any status)
    pub settled: u64,
    /// Items completed in this run
    pub completed: u64,
    /// Items failed in this run
    pub failed: u64,
    /// Items skipped as already completed
    pub skipped: u64,
    start_time: Instant,
    last_update: Instant,
    update_interval: Duration,
    min_percentage_step: f64,
    last_reported_percentage: f64,
}

impl BatchProgress {
    /// Tracker for a batch of `total` items.
    pub fn new(total: u64) -> Self {
        let now = Instant::now();
        Self {
            total,
            settled: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
            last_reported_percentage: 0.0,
        }
    }

    /// Override the time between updates.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Count a settled item.
    pub fn record(&mut self, status: ItemStatus) {
        self.settled = self.settled.saturating_add(1);
        match status {
            ItemStatus::Completed => self.completed += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::NotAttempted => {}
        }
    }

    /// Whether a progress line is due.
    pub fn should_emit_update(&self) -> bool {
        if self.settled == 0 {
            return false;
        }
        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.last_update.elapsed() >= self.update_interval
    }

    /// Reset the timer and cached percentage after emitting.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Percentage of items settled (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.settled as f64 / self.total as f64 * 100.0
    }

    /// Items per second over the items actually processed (skips excluded).
    pub fn rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let processed = self.completed + self.failed;
        if elapsed > 0.0 {
            processed as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Estimated time until every item has settled.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let rate = self.rate();
        let remaining = self.total.saturating_sub(self.settled);
        if rate > 0.0 && remaining > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        }
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![
            format!("[PROGRESS] Settled {}/{} items", self.settled, self.total),
            format!("- {:.1}% complete", self.percentage()),
            format!(
                "({} completed, {} failed, {} skipped)",
                self.completed, self.failed, self.skipped
            ),
        ];

        let rate = self.rate();
        if rate > 0.0 {
            parts.push(format!("at {rate:.2} items/sec"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
