//! Error types for prebuilts-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure (permission denied, read-only root, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The manifest file did not exist at the expected path.
    #[error("manifest not found at {path}")]
    NotFound { path: PathBuf },

    /// The manifest parsed but describes an unusable configuration.
    #[error("invalid manifest: {reason}")]
    Invalid { reason: String },

    /// A release identifier that cannot be placed into a metadata URL.
    #[error("invalid release identifier '{value}': {reason}")]
    InvalidRelease { value: String, reason: &'static str },

    /// A pinned checksum that is not a SHA-256 hex digest.
    #[error(transparent)]
    Checksum(#[from] ChecksumFormatError),
}

/// A string that is not a 64-character hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' is not a SHA-256 hex digest (expected 64 hex characters)")]
pub struct ChecksumFormatError {
    pub value: String,
}
