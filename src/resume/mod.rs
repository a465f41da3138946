//! Resume capability for batch runs
//!
//! Durable per-item progress with atomic writes and file locking.

pub mod lock;
pub mod record;
pub mod state;
pub mod store;

pub use record::{ProgressRecord, ProgressStatus};
pub use state::{ProgressError, ProgressSnapshot, MAX_STATE_FILE_SIZE, SCHEMA_VERSION};
pub use store::{ProgressStats, ProgressStore};
