//! Work item fingerprints
//!
//! A fingerprint is the stable key under which an item's progress is stored.
//! It must be identical across runs for the same logical item, so URLs are
//! reduced to their trailing path segment (the note or user id) and query
//! strings such as `xsec_token` are ignored.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Stable identifier of a work item, used as the progress store key.
///
/// # Examples
///
/// ```
/// use xhs_crawler::fingerprint::Fingerprint;
///
/// let fp = Fingerprint::derive(
///     "https://www.xiaohongshu.com/explore/64f1c2a3000000001f03a1b2?xsec_token=abc",
/// ).unwrap();
/// assert_eq!(fp.as_str(), "64f1c2a3000000001f03a1b2");
///
/// let fp = Fingerprint::derive("  5a8e1f0c000000000b00d6f1 ").unwrap();
/// assert_eq!(fp.as_str(), "5a8e1f0c000000000b00d6f1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Use a raw key verbatim (after trimming whitespace).
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or contains control characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, FingerprintError> {
        let key = raw.as_ref().trim();
        if key.is_empty() {
            return Err(FingerprintError::Empty);
        }
        if key.chars().any(char::is_control) {
            return Err(FingerprintError::InvalidCharacters(key.to_string()));
        }
        Ok(Self(key.to_string()))
    }

    /// Derive a fingerprint from a work item string.
    ///
    /// `http(s)` URLs are reduced to their last non-empty path segment, other
    /// input is treated as a raw key.
    pub fn derive(input: &str) -> Result<Self, FingerprintError> {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Self::from_url(trimmed);
        }
        Self::new(trimmed)
    }

    /// Derive a fingerprint from a note or profile URL.
    pub fn from_url(url: &str) -> Result<Self, FingerprintError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| FingerprintError::InvalidUrl(format!("{url}: {e}")))?;

        let segment = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| FingerprintError::InvalidUrl(format!("{url}: no path segment")))?;

        Self::new(segment)
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner key.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Fingerprint {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Anything the batch executor can process.
///
/// The fingerprint must be unique within a batch and stable across runs.
pub trait WorkItem: Clone + Send + Sync + 'static {
    /// Compute the item's fingerprint.
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError>;
}

impl WorkItem for String {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::derive(self)
    }
}

impl WorkItem for &'static str {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::derive(self)
    }
}

impl WorkItem for Fingerprint {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Ok(self.clone())
    }
}

/// Errors that can occur while deriving a fingerprint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    /// Empty key
    #[error("fingerprint cannot be empty")]
    Empty,

    /// Key contains control characters
    #[error("fingerprint contains control characters: {0:?}")]
    InvalidCharacters(String),

    /// URL could not be parsed or has no usable path
    #[error("invalid item URL: {0}")]
    InvalidUrl(String),
}
