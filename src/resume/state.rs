//! Progress snapshot persistence
//!
//! The whole store is serialized on every save: write to a temp file in the
//! same directory, fsync, atomically rename over the target, then fsync the
//! directory. A crash at any point leaves either the old or the new snapshot.

use super::lock::{with_exclusive, with_shared};
use super::record::{ProgressRecord, ProgressStatus};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current progress file schema version
pub const SCHEMA_VERSION: u32 = 2;

/// Maximum allowed progress file size (64 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Full persisted state of a progress store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Schema version of the file
    pub schema_version: u32,
    /// When the store was first created
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Last time the store was cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_at: Option<DateTime<Utc>>,
    /// Records keyed by fingerprint
    pub records: BTreeMap<Fingerprint, ProgressRecord>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Legacy shape: `{ "completed_ids": [...], "metadata": {...} }`.
#[derive(Debug, Deserialize)]
struct LegacySnapshot {
    completed_ids: Vec<String>,
    #[serde(default)]
    metadata: LegacyMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyMetadata {
    created_at: Option<String>,
    last_updated: Option<String>,
    cleared_at: Option<String>,
}

impl ProgressSnapshot {
    /// Empty snapshot stamped with the current time.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            cleared_at: None,
            records: BTreeMap::new(),
        }
    }

    /// Count of records in `status`.
    pub fn count(&self, status: ProgressStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    /// Check every record's invariants.
    pub fn validate(&self) -> Result<(), ProgressError> {
        if let Some((fp, record)) = self.records.iter().find(|(_, r)| !r.is_consistent()) {
            return Err(ProgressError::InvalidRecord(format!(
                "{fp}: status {} with failure_reason {:?}",
                record.status, record.failure_reason
            )));
        }
        Ok(())
    }

    /// Save to `path` atomically, holding the advisory lock.
    pub fn save(&self, path: &Path) -> Result<(), ProgressError> {
        debug!(
            path = %path.display(),
            records = self.records.len(),
            "Saving progress snapshot"
        );

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ProgressError::SerializationError(e.to_string()))?;

        with_exclusive(path, || write_atomic(path, json.as_bytes()))?;

        debug!(
            path = %path.display(),
            records = self.records.len(),
            "Progress snapshot saved"
        );
        Ok(())
    }

    /// Load the current schema from `path` without any recovery.
    ///
    /// Legacy formats are still migrated; corruption and version mismatches
    /// are reported as errors and the file is left untouched.
    pub fn read_strict(path: &Path) -> Result<Self, ProgressError> {
        with_shared(path, || {
            let contents = read_bounded(path)?;
            parse(&contents)
        })
    }

    /// Load from `path`, starting fresh when the file is absent.
    ///
    /// An unparseable file is moved aside to `<file>.corrupt` and an empty
    /// snapshot is returned. A file written by a newer schema is an error.
    pub fn load_or_recover(path: &Path) -> Result<Self, ProgressError> {
        if !path.exists() {
            info!(path = %path.display(), "No progress file found, starting fresh");
            return Ok(Self::new());
        }

        let parsed = with_shared(path, || {
            let contents = read_bounded(path)?;
            Ok(parse(&contents))
        })?;

        match parsed {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    records = snapshot.records.len(),
                    completed = snapshot.count(ProgressStatus::Completed),
                    "Progress loaded"
                );
                Ok(snapshot)
            }
            Err(err @ ProgressError::SchemaVersionMismatch { .. }) => Err(err),
            Err(err) => {
                let aside = quarantine(path)?;
                warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %err,
                    "Progress file is corrupt, starting fresh"
                );
                Ok(Self::new())
            }
        }
    }
}

fn read_bounded(path: &Path) -> Result<String, ProgressError> {
    let metadata = std::fs::metadata(path).map_err(|e| ProgressError::IoError(e.to_string()))?;
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(ProgressError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }
    std::fs::read_to_string(path).map_err(|e| ProgressError::IoError(e.to_string()))
}

fn parse(contents: &str) -> Result<ProgressSnapshot, ProgressError> {
    let value: Value = serde_json::from_str(contents)
        .map_err(|e| ProgressError::DeserializationError(e.to_string()))?;

    if value.is_array() {
        let ids: Vec<String> = serde_json::from_value(value)
            .map_err(|e| ProgressError::DeserializationError(e.to_string()))?;
        return migrate_legacy(ids, LegacyMetadata::default());
    }

    if value.get("completed_ids").is_some() {
        let legacy: LegacySnapshot = serde_json::from_value(value)
            .map_err(|e| ProgressError::DeserializationError(e.to_string()))?;
        return migrate_legacy(legacy.completed_ids, legacy.metadata);
    }

    if !value.is_object() {
        return Err(ProgressError::DeserializationError(format!(
            "unexpected top-level JSON value: {value}"
        )));
    }

    let found = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProgressError::DeserializationError("missing schema_version".to_string()))?;
    if found != u64::from(SCHEMA_VERSION) {
        warn!(
            found_version = found,
            expected_version = SCHEMA_VERSION,
            "Progress file schema version mismatch"
        );
        return Err(ProgressError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        });
    }

    let snapshot: ProgressSnapshot = serde_json::from_value(value)
        .map_err(|e| ProgressError::DeserializationError(e.to_string()))?;
    snapshot.validate()?;
    Ok(snapshot)
}

fn migrate_legacy(
    ids: Vec<String>,
    metadata: LegacyMetadata,
) -> Result<ProgressSnapshot, ProgressError> {
    let now = Utc::now();
    let created_at = parse_legacy_time(metadata.created_at.as_deref()).unwrap_or(now);
    let updated_at = parse_legacy_time(metadata.last_updated.as_deref()).unwrap_or(now);

    let mut records = BTreeMap::new();
    for id in ids {
        let fp = Fingerprint::new(&id)
            .map_err(|e| ProgressError::InvalidRecord(format!("legacy id {id:?}: {e}")))?;
        records.insert(fp, ProgressRecord::completed_at(updated_at));
    }

    info!(
        completed = records.len(),
        target_version = SCHEMA_VERSION,
        "Migrated legacy progress file"
    );

    Ok(ProgressSnapshot {
        schema_version: SCHEMA_VERSION,
        created_at,
        updated_at,
        cleared_at: parse_legacy_time(metadata.cleared_at.as_deref()),
        records,
    })
}

/// Legacy timestamps are naive ISO-8601 local times; they are taken as UTC.
fn parse_legacy_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|dt| dt.and_utc())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ProgressError> {
    let parent_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir).map_err(|e| ProgressError::IoError(e.to_string()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| ProgressError::IoError(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(bytes)
        .map_err(|e| ProgressError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ProgressError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ProgressError::IoError(format!("Failed to sync temp file: {e}")))?;

    temp_file
        .persist(path)
        .map_err(|e| ProgressError::IoError(format!("Failed to persist temp file: {e}")))?;

    // Make the rename itself durable.
    if let Err(e) = sync_dir(parent_dir) {
        warn!(
            dir = %parent_dir.display(),
            error = %e,
            "Failed to sync progress directory, last save may not survive a crash"
        );
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

fn quarantine(path: &Path) -> Result<PathBuf, ProgressError> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "progress".into());
    name.push(".corrupt");
    let aside = path.with_file_name(name);
    std::fs::rename(path, &aside).map_err(|e| ProgressError::IoError(e.to_string()))?;
    Ok(aside)
}

/// Errors related to progress persistence
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: u32,
        /// Found schema version
        found: u64,
    },

    /// Progress file too large
    #[error("progress file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// A record violates its invariants
    #[error("invalid progress record: {0}")]
    InvalidRecord(String),

    /// The requested transition would move a record backwards
    #[error("illegal transition for {fingerprint}: {from} -> {to}")]
    IllegalTransition {
        /// Item key
        fingerprint: String,
        /// Current status
        from: ProgressStatus,
        /// Requested status
        to: ProgressStatus,
    },

    /// No record exists for the fingerprint
    #[error("no progress record for {0}")]
    UnknownFingerprint(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
