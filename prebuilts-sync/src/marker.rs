//! Release marker: which release a destination tree holds.
//!
//! Persists a [`ReleaseMarker`] JSON document at
//! `<tree>/.prebuilts-release.json`. Writes use the atomic `.tmp` + rename
//! pattern, and the marker is always the last file a sync touches.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};

pub const MARKER_FILE: &str = ".prebuilts-release.json";

/// On-disk marker payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseMarker {
    /// Identifier the tree was synced with, as given by the caller.
    pub release: String,
    /// Commit reported by the metadata document, when it names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_commit: Option<String>,
    pub synced_at: DateTime<Utc>,
    /// Managed files: `/`-separated path relative to the tree → SHA-256 hex.
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl ReleaseMarker {
    /// Whether writing `other` would change anything but the timestamp.
    pub fn same_content(&self, other: &ReleaseMarker) -> bool {
        self.release == other.release
            && self.resolved_commit == other.resolved_commit
            && self.files == other.files
    }
}

/// `<tree>/.prebuilts-release.json`
pub fn marker_path(tree: &Path) -> PathBuf {
    tree.join(MARKER_FILE)
}

/// Load the marker of `tree`, or `None` if the tree was never synced.
pub fn load(tree: &Path) -> Result<Option<ReleaseMarker>, SyncError> {
    let path = marker_path(tree);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    };
    let marker = serde_json::from_str(&contents).map_err(|e| SyncError::Json {
        path: path.clone(),
        source: e,
    })?;
    Ok(Some(marker))
}

/// Save the marker of `tree` atomically.
pub fn save(tree: &Path, marker: &ReleaseMarker) -> Result<(), SyncError> {
    let path = marker_path(tree);
    std::fs::create_dir_all(tree).map_err(|e| io_err(tree, e))?;

    let json = serde_json::to_string_pretty(marker).map_err(|e| SyncError::Json {
        path: path.clone(),
        source: e,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Marker key for a tree-relative path: normal components joined by `/`.
pub fn file_key(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
