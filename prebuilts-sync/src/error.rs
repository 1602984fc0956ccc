//! Error types for prebuilts-sync.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use prebuilts_core::error::{ChecksumFormatError, ManifestError};

/// All errors that can arise while synchronizing one batch.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The metadata endpoint has nothing for this release identifier.
    #[error("no build metadata published for release '{release}' ({url})")]
    NotFound { release: String, url: String },

    /// The metadata document lacks a required section or field.
    #[error("malformed metadata: {reason}")]
    MalformedMetadata { reason: String },

    /// Transport failure: DNS, connect, TLS, timeout, truncated body.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// Downloaded bytes do not hash to the published checksum.
    #[error("checksum mismatch for '{artifact}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// A requested archive entry is absent (or is not a regular file).
    #[error("entry '{entry}' not found in {archive}")]
    EntryNotFound { archive: PathBuf, entry: String },

    /// An entry name or output path would escape the destination root.
    #[error("refusing path-traversal entry '{entry}'")]
    PathTraversal { entry: String },

    /// Two artifacts of one batch produce the same output file.
    #[error("output '{path}' is produced by more than one artifact")]
    OutputConflict { path: PathBuf },

    /// The archive could not be read as a zip file.
    #[error("unreadable archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Release marker JSON could not be read or written.
    #[error("release marker JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Invalid manifest or destination configuration.
    #[error("configuration error: {0}")]
    Manifest(#[from] ManifestError),

    /// Caller-initiated cancellation or deadline expiry.
    #[error("operation cancelled")]
    Cancelled,
}

impl From<ChecksumFormatError> for SyncError {
    fn from(err: ChecksumFormatError) -> Self {
        SyncError::MalformedMetadata {
            reason: err.to_string(),
        }
    }
}

impl SyncError {
    /// Failure class used for retry policy, reporting, and exit codes.
    pub fn class(&self) -> FailureClass {
        match self {
            SyncError::NotFound { .. } | SyncError::MalformedMetadata { .. } => {
                FailureClass::Metadata
            }
            SyncError::Network { .. } | SyncError::HttpStatus { .. } => FailureClass::Network,
            SyncError::ChecksumMismatch { .. } => FailureClass::Checksum,
            SyncError::EntryNotFound { .. }
            | SyncError::PathTraversal { .. }
            | SyncError::OutputConflict { .. }
            | SyncError::Archive { .. } => FailureClass::Extraction,
            SyncError::Io { .. } | SyncError::Json { .. } => FailureClass::Io,
            SyncError::Manifest(_) => FailureClass::Config,
            SyncError::Cancelled => FailureClass::Cancelled,
        }
    }
}

/// Coarse error category surfaced to users and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Config,
    Metadata,
    Network,
    Checksum,
    Extraction,
    Io,
    Cancelled,
}

impl FailureClass {
    /// Transport failures and HTTP status errors only.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Network)
    }

    /// Process exit code for a run whose worst failure is of this class.
    pub fn exit_code(self) -> i32 {
        match self {
            FailureClass::Config => 1,
            FailureClass::Metadata => 2,
            FailureClass::Network => 3,
            FailureClass::Checksum => 4,
            FailureClass::Extraction => 5,
            FailureClass::Io => 6,
            FailureClass::Cancelled => 7,
        }
    }

    /// Rank used to pick the class reported for a multi-batch failure.
    pub fn severity(self) -> u8 {
        match self {
            FailureClass::Checksum => 6,
            FailureClass::Extraction => 5,
            FailureClass::Io => 4,
            FailureClass::Config => 3,
            FailureClass::Metadata => 2,
            FailureClass::Network => 1,
            FailureClass::Cancelled => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Config => "config",
            FailureClass::Metadata => "metadata",
            FailureClass::Network => "network",
            FailureClass::Checksum => "checksum",
            FailureClass::Extraction => "extraction",
            FailureClass::Io => "io",
            FailureClass::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
