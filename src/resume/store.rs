//! Durable fingerprint -> progress mapping shared by batch workers

use super::record::{ProgressRecord, ProgressStatus};
use super::state::{ProgressError, ProgressSnapshot};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Record counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    /// Records waiting to be dispatched
    pub pending: usize,
    /// Records dispatched but not settled
    pub in_progress: usize,
    /// Records finished successfully
    pub completed: usize,
    /// Records that gave up
    pub failed: usize,
}

impl ProgressStats {
    /// Counts for a snapshot.
    pub fn of(snapshot: &ProgressSnapshot) -> Self {
        let mut stats = Self::default();
        for record in snapshot.records.values() {
            match record.status {
                ProgressStatus::Pending => stats.pending += 1,
                ProgressStatus::InProgress => stats.in_progress += 1,
                ProgressStatus::Completed => stats.completed += 1,
                ProgressStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Total number of records.
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

/// Progress store backed by a JSON file.
///
/// Every mutating call persists the full snapshot before returning. Callers
/// queue on an internal mutex, so there is a single writer at a time. A
/// mutation whose save fails leaves the in-memory state unchanged.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: Mutex<ProgressSnapshot>,
}

impl ProgressStore {
    /// Load the store at `path`, or start empty if the file does not exist.
    ///
    /// Records left `InProgress` by an interrupted run are demoted to
    /// `Pending`: their outcome is unknown, so they are dispatched again.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let path = path.as_ref().to_path_buf();
        let mut snapshot = ProgressSnapshot::load_or_recover(&path)?;

        let mut demoted = 0usize;
        for record in snapshot.records.values_mut() {
            if record.status == ProgressStatus::InProgress {
                record.status = ProgressStatus::Pending;
                demoted += 1;
            }
        }
        if demoted > 0 {
            warn!(
                demoted,
                path = %path.display(),
                "Items left in progress by a previous run will be retried"
            );
        }

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the item finished successfully in this or an earlier run.
    pub fn is_completed(&self, fingerprint: &Fingerprint) -> bool {
        self.lock()
            .records
            .get(fingerprint)
            .is_some_and(|r| r.status == ProgressStatus::Completed)
    }

    /// Current record for an item.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<ProgressRecord> {
        self.lock().records.get(fingerprint).cloned()
    }

    /// Add `Pending` records for fingerprints the store has not seen.
    ///
    /// Existing records are left alone. Persists only if something was added.
    pub fn register<'a>(
        &self,
        fingerprints: impl IntoIterator<Item = &'a Fingerprint>,
    ) -> Result<usize, ProgressError> {
        let mut added = 0usize;
        self.mutate(|snapshot| {
            for fp in fingerprints {
                if !snapshot.records.contains_key(fp) {
                    snapshot.records.insert(fp.clone(), ProgressRecord::pending());
                    added += 1;
                }
            }
            Ok(added > 0)
        })?;
        if added > 0 {
            debug!(added, "Registered pending items");
        }
        Ok(added)
    }

    /// Mark an item dispatched. Creates the record if missing and counts the
    /// dispatch in `attempts`.
    pub fn mark_in_progress(&self, fingerprint: &Fingerprint) -> Result<(), ProgressError> {
        self.mutate(|snapshot| {
            let record = snapshot
                .records
                .entry(fingerprint.clone())
                .or_insert_with(ProgressRecord::pending);
            transition(fingerprint, record, ProgressStatus::InProgress)?;
            record.attempts = record.attempts.saturating_add(1);
            record.failure_reason = None;
            Ok(true)
        })
    }

    /// Mark a dispatched item finished.
    pub fn mark_completed(&self, fingerprint: &Fingerprint) -> Result<(), ProgressError> {
        self.mutate(|snapshot| {
            let record = snapshot
                .records
                .get_mut(fingerprint)
                .ok_or_else(|| ProgressError::UnknownFingerprint(fingerprint.to_string()))?;
            transition(fingerprint, record, ProgressStatus::Completed)?;
            Ok(true)
        })
    }

    /// Mark a dispatched item failed with a reason.
    pub fn mark_failed(
        &self,
        fingerprint: &Fingerprint,
        reason: impl Into<String>,
    ) -> Result<(), ProgressError> {
        let reason = reason.into();
        self.mutate(|snapshot| {
            let record = snapshot
                .records
                .get_mut(fingerprint)
                .ok_or_else(|| ProgressError::UnknownFingerprint(fingerprint.to_string()))?;
            transition(fingerprint, record, ProgressStatus::Failed)?;
            record.failure_reason = Some(reason);
            Ok(true)
        })
    }

    /// Counts by status.
    pub fn stats(&self) -> ProgressStats {
        ProgressStats::of(&self.lock())
    }

    /// Fingerprints currently in `status`, in key order.
    pub fn fingerprints_with_status(&self, status: ProgressStatus) -> Vec<Fingerprint> {
        self.lock()
            .records
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(fp, _)| fp.clone())
            .collect()
    }

    /// Copy of the full in-memory state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    /// Creation and last-update times.
    pub fn timestamps(&self) -> (DateTime<Utc>, DateTime<Utc>, Option<DateTime<Utc>>) {
        let state = self.lock();
        (state.created_at, state.updated_at, state.cleared_at)
    }

    /// Erase every record to force a fresh run.
    pub fn clear(&self) -> Result<(), ProgressError> {
        let mut removed = 0usize;
        self.mutate(|snapshot| {
            removed = snapshot.records.len();
            snapshot.records.clear();
            snapshot.cleared_at = Some(Utc::now());
            Ok(true)
        })?;
        info!(removed, path = %self.path.display(), "Progress cleared");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a copy of the state, persist it, then commit.
    ///
    /// `f` returns whether anything changed; unchanged state is not written.
    fn mutate<F>(&self, f: F) -> Result<(), ProgressError>
    where
        F: FnOnce(&mut ProgressSnapshot) -> Result<bool, ProgressError>,
    {
        let mut state = self.lock();
        let mut next = state.clone();
        if !f(&mut next)? {
            return Ok(());
        }
        next.updated_at = Utc::now();
        next.save(&self.path)?;
        *state = next;
        Ok(())
    }
}

fn transition(
    fingerprint: &Fingerprint,
    record: &mut ProgressRecord,
    to: ProgressStatus,
) -> Result<(), ProgressError> {
    if !record.status.can_transition_to(to) {
        return Err(ProgressError::IllegalTransition {
            fingerprint: fingerprint.to_string(),
            from: record.status,
            to,
        });
    }
    record.status = to;
    record.last_updated = Utc::now();
    Ok(())
}
