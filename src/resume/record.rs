//! Per-item progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a work item in the progress store.
///
/// Transitions only move forward: `Pending -> InProgress -> {Completed, Failed}`.
/// A `Failed` item may be dispatched again by a later run; `Completed` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Known but not yet dispatched (or demoted after a crash)
    Pending,
    /// Dispatched; outcome not yet recorded
    InProgress,
    /// Finished successfully
    Completed,
    /// Gave up; `failure_reason` says why
    Failed,
}

impl ProgressStatus {
    /// Whether the store accepts a move from `self` to `next`.
    pub fn can_transition_to(self, next: ProgressStatus) -> bool {
        use ProgressStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Failed, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProgressStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(ProgressStatus::Pending),
            "in_progress" => Ok(ProgressStatus::InProgress),
            "completed" => Ok(ProgressStatus::Completed),
            "failed" => Ok(ProgressStatus::Failed),
            other => Err(format!(
                "unknown status '{other}' (expected pending, in_progress, completed or failed)"
            )),
        }
    }
}

/// Durable state of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Current status
    pub status: ProgressStatus,
    /// Number of times the item has been dispatched
    pub attempts: u32,
    /// Time of the last transition
    pub last_updated: DateTime<Utc>,
    /// Why the item failed; present iff `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl ProgressRecord {
    /// Fresh pending record.
    pub fn pending() -> Self {
        Self {
            status: ProgressStatus::Pending,
            attempts: 0,
            last_updated: Utc::now(),
            failure_reason: None,
        }
    }

    /// Record imported as completed (legacy progress files).
    pub fn completed_at(when: DateTime<Utc>) -> Self {
        Self {
            status: ProgressStatus::Completed,
            attempts: 1,
            last_updated: when,
            failure_reason: None,
        }
    }

    /// Check the failure-reason invariant.
    pub fn is_consistent(&self) -> bool {
        (self.status == ProgressStatus::Failed) == self.failure_reason.is_some()
    }
}
