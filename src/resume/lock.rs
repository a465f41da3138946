//! Advisory file locking around progress file access
//!
//! Another process running against the same progress file blocks on the
//! sidecar `<file>.lock` rather than interleaving its writes with ours.

use super::state::ProgressError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sidecar lock file for a progress file.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "progress".into());
    name.push(".lock");
    path.with_file_name(name)
}

fn open_lock_file(path: &Path) -> Result<RwLock<File>, ProgressError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ProgressError::IoError(e.to_string()))?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path(path))
        .map_err(|e| ProgressError::LockError(format!("Failed to open lock file: {e}")))?;

    Ok(RwLock::new(file))
}

/// Run `f` while holding the exclusive lock. Blocks until available.
pub fn with_exclusive<T>(
    path: &Path,
    f: impl FnOnce() -> Result<T, ProgressError>,
) -> Result<T, ProgressError> {
    let mut lock = open_lock_file(path)?;
    debug!(path = %path.display(), "Acquiring write lock for progress file");
    let _guard = lock
        .write()
        .map_err(|e| ProgressError::LockError(format!("Failed to acquire write lock: {e}")))?;
    f()
}

/// Run `f` while holding the shared lock.
pub fn with_shared<T>(
    path: &Path,
    f: impl FnOnce() -> Result<T, ProgressError>,
) -> Result<T, ProgressError> {
    let lock = open_lock_file(path)?;
    debug!(path = %path.display(), "Acquiring read lock for progress file");
    let _guard = lock
        .read()
        .map_err(|e| ProgressError::LockError(format!("Failed to acquire read lock: {e}")))?;
    f()
}
