//! Batch outcomes and the summary report

use super::classify::ErrorKind;
use super::retry::RetryAttempt;
use crate::fingerprint::Fingerprint;
use std::fmt;
use std::time::Duration;

const REPORT_RULE: &str = "============================================================";

/// Final status of one item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// The call succeeded
    Completed,
    /// Retries were exhausted or the failure was not retryable
    Failed,
    /// Already completed by an earlier run
    Skipped,
    /// Never started because the batch was aborted or stopped
    NotAttempted,
}

impl ItemStatus {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
            ItemStatus::NotAttempted => "not_attempted",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one item.
#[derive(Debug, Clone)]
pub struct ItemOutcome<T> {
    /// Item key
    pub fingerprint: Fingerprint,
    /// Final status
    pub status: ItemStatus,
    /// Remote call attempts made in this run
    pub attempts: u32,
    /// Kind of the final failure, if failed
    pub kind: Option<ErrorKind>,
    /// Why the item failed, if failed
    pub reason: Option<String>,
    /// Value returned by the caller, if completed
    pub value: Option<T>,
    /// Failed attempts in order
    pub history: Vec<RetryAttempt>,
}

impl<T> ItemOutcome<T> {
    pub(crate) fn without_attempt(fingerprint: Fingerprint, status: ItemStatus) -> Self {
        Self {
            fingerprint,
            status,
            attempts: 0,
            kind: None,
            reason: None,
            value: None,
            history: Vec::new(),
        }
    }
}

/// Why a batch stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAbort {
    /// Item whose failure triggered the abort
    pub fingerprint: Fingerprint,
    /// `AuthInvalid` or `Fatal`
    pub kind: ErrorKind,
    /// Failure description
    pub reason: String,
}

impl fmt::Display for BatchAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch aborted at {} ({}): {}",
            self.fingerprint, self.kind, self.reason
        )
    }
}

/// Summary of a batch run.
///
/// `outcomes` is in input order regardless of completion order.
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    /// One outcome per input item
    pub outcomes: Vec<ItemOutcome<T>>,
    /// Items completed in this run
    pub completed: usize,
    /// Items failed in this run
    pub failed: usize,
    /// Items already completed before the run
    pub skipped: usize,
    /// Items never started
    pub not_attempted: usize,
    /// Set when an auth or fatal failure stopped the batch
    pub abort: Option<BatchAbort>,
    /// Set when a stop signal ended the run early
    pub cancelled: bool,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl<T> BatchResult<T> {
    pub(crate) fn from_outcomes(
        outcomes: Vec<ItemOutcome<T>>,
        abort: Option<BatchAbort>,
        cancelled: bool,
        elapsed: Duration,
    ) -> Self {
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            completed: count(ItemStatus::Completed),
            failed: count(ItemStatus::Failed),
            skipped: count(ItemStatus::Skipped),
            not_attempted: count(ItemStatus::NotAttempted),
            outcomes,
            abort,
            cancelled,
            elapsed,
        }
    }

    /// Whether an auth or fatal failure stopped the batch.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Outcome for a fingerprint.
    pub fn outcome(&self, fingerprint: &str) -> Option<&ItemOutcome<T>> {
        self.outcomes
            .iter()
            .find(|o| o.fingerprint.as_str() == fingerprint)
    }

    /// Failed items in input order.
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome<T>> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::Failed)
    }

    /// Values of completed items in input order.
    pub fn values(&self) -> impl Iterator<Item = (&Fingerprint, &T)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.value.as_ref().map(|v| (&o.fingerprint, v)))
    }

    /// Human-readable summary with one entry per failed item.
    pub fn format_report(&self) -> String {
        let mut lines = vec![
            REPORT_RULE.to_string(),
            "Batch report".to_string(),
            REPORT_RULE.to_string(),
            format!(
                "Completed: {}  Failed: {}  Skipped: {}  Not attempted: {}",
                self.completed, self.failed, self.skipped, self.not_attempted
            ),
            format!("Elapsed: {:.1}s", self.elapsed.as_secs_f64()),
        ];

        if let Some(abort) = &self.abort {
            lines.push(format!("ABORTED: {abort}"));
        }
        if self.cancelled {
            lines.push("Stopped early by stop signal; rerun to resume".to_string());
        }

        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            lines.push(String::new());
            for (i, outcome) in failures.iter().enumerate() {
                lines.push(format!("Failure #{}", i + 1));
                lines.push(format!("  Item: {}", outcome.fingerprint));
                if let Some(kind) = outcome.kind {
                    lines.push(format!("  Kind: {kind}"));
                    lines.push(format!(
                        "  Recoverable: {}",
                        if kind.is_retryable() { "yes" } else { "no" }
                    ));
                }
                lines.push(format!("  Attempts: {}", outcome.attempts));
                lines.push(format!(
                    "  Reason: {}",
                    outcome.reason.as_deref().unwrap_or("N/A")
                ));
                lines.push(String::new());
            }
        }

        lines.push(REPORT_RULE.to_string());
        lines.push(format!("Total failures: {}", self.failed));
        lines.push(REPORT_RULE.to_string());
        lines.join("\n")
    }
}
