//! Error types for bag operations.

use thiserror::Error;

/// Errors that can occur during bag operations.
///
/// Structural problems found while probing an existing bag (missing or
/// malformed manifests, missing declaration) are reported as
/// [`CompletenessStatus`](crate::CompletenessStatus) codes instead.
#[derive(Debug, Error)]
pub enum BagError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ZIP archive error.
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Unknown checksum algorithm, empty algorithm set, unsupported
    /// archive format or encoding.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Content already exists at this bag path.
    #[error("Path already exists in bag: {0}")]
    Conflict(String),

    /// Filesystem path requested from a sealed bag.
    #[error("Sealed bag: no file access allowed for {0}")]
    Access(String),

    /// The filler was already finalized.
    #[error("Bag already finalized: cannot add {0}")]
    Finalized(String),

    /// Bag-relative path is not acceptable here.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Property name or value would not read back unchanged.
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    /// Fetch URI is not an absolute URI.
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Path is not a known fetch entry.
    #[error("Unknown payload reference: {0}")]
    UnknownReference(String),

    /// A tag file could not be parsed.
    #[error("Malformed {file}: {reason}")]
    Malformed { file: String, reason: String },

    /// Resolved content does not match the manifest.
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

impl BagError {
    pub(crate) fn malformed(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            file: file.into(),
            reason: reason.into(),
        }
    }
}
