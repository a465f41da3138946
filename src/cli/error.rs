//! CLI error types and conversions

use crate::executor::{BatchError, ConfigError};
use crate::metrics::MetricsError;
use crate::resume::ProgressError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Batch could not run
    #[error("batch error: {0}")]
    BatchError(#[from] BatchError),

    /// Progress file error
    #[error("progress error: {0}")]
    ProgressError(#[from] ProgressError),

    /// Invalid batch settings
    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// HTTP client could not be built
    #[error("http client error: {0}")]
    HttpClientError(String),

    /// Reading items or writing results failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Output could not be serialized
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
