//! Staleness signal detection for destination trees.
//!
//! Signal precedence:
//! 1. `NeverSynced` (release marker missing or empty)
//! 2. `Stale` (marker names paths outside the tree, or managed files missing)
//! 3. `Modified` (installed files changed since the marker was written)
//! 4. `Current`

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use prebuilts_core::manifest::is_contained_relative;
use prebuilts_core::{BatchKey, SyncManifest};

use crate::cancel::CancelToken;
use crate::error::{io_err, SyncError};
use crate::marker::{self, ReleaseMarker};
use crate::verify::hash_file_hex;

/// Staleness classification for one destination tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum StalenessSignal {
    NeverSynced,
    Current,
    Stale { reason: String },
    Modified { files: Vec<PathBuf> },
}

impl StalenessSignal {
    pub fn label(&self) -> &'static str {
        match self {
            StalenessSignal::NeverSynced => "never-synced",
            StalenessSignal::Current => "current",
            StalenessSignal::Stale { .. } => "stale",
            StalenessSignal::Modified { .. } => "modified",
        }
    }
}

/// Check the tree at `tree` against its release marker.
pub fn check(tree: &Path) -> Result<StalenessSignal, SyncError> {
    let Some(marker) = marker::load(tree)? else {
        return Ok(StalenessSignal::NeverSynced);
    };
    check_against(tree, &marker)
}

fn check_against(tree: &Path, marker: &ReleaseMarker) -> Result<StalenessSignal, SyncError> {
    if marker.files.is_empty() {
        return Ok(StalenessSignal::NeverSynced);
    }

    let escaping: Vec<PathBuf> = marker
        .files
        .keys()
        .map(PathBuf::from)
        .filter(|key| key.as_os_str().is_empty() || !is_contained_relative(key))
        .collect();
    if !escaping.is_empty() {
        return Ok(StalenessSignal::Stale {
            reason: format!(
                "marker lists {} path(s) outside the tree: {}",
                escaping.len(),
                preview_files(&escaping),
            ),
        });
    }

    let mut missing = Vec::new();
    for key in marker.files.keys() {
        let path = tree.join(key);
        match std::fs::metadata(&path) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => missing.push(PathBuf::from(key)),
            Err(err) => return Err(io_err(&path, err)),
        }
    }
    if !missing.is_empty() {
        return Ok(StalenessSignal::Stale {
            reason: format!(
                "missing {} managed file(s): {}",
                missing.len(),
                preview_files(&missing),
            ),
        });
    }

    let cancel = CancelToken::new();
    let mut modified = Vec::new();
    for (key, expected) in &marker.files {
        if &hash_file_hex(&tree.join(key), &cancel)? != expected {
            modified.push(PathBuf::from(key));
        }
    }
    if !modified.is_empty() {
        return Ok(StalenessSignal::Modified { files: modified });
    }

    Ok(StalenessSignal::Current)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Per-tree status row for `prebuilts status`.
#[derive(Debug, Clone, Serialize)]
pub struct TreeStatus {
    pub batch: BatchKey,
    pub path: PathBuf,
    pub release: Option<String>,
    pub resolved_commit: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub signal: StalenessSignal,
}

/// Status of every configured destination tree under `root`.
pub fn status(manifest: &SyncManifest, root: &Path) -> Result<Vec<TreeStatus>, SyncError> {
    let mut rows = Vec::new();
    for batch in manifest.destinations.keys() {
        let Some(path) = manifest.destination_root(root, *batch) else {
            continue;
        };
        let marker = marker::load(&path)?;
        let signal = match &marker {
            Some(marker) => check_against(&path, marker)?,
            None => StalenessSignal::NeverSynced,
        };
        rows.push(TreeStatus {
            batch: *batch,
            path,
            release: marker.as_ref().map(|m| m.release.clone()),
            resolved_commit: marker.as_ref().and_then(|m| m.resolved_commit.clone()),
            synced_at: marker.as_ref().map(|m| m.synced_at),
            signal,
        });
    }
    Ok(rows)
}

/// Format age from a chrono timestamp (marker `synced_at`).
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let now = Utc::now();
    let age = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

fn preview_files(paths: &[PathBuf]) -> String {
    let mut shown: Vec<String> = paths
        .iter()
        .take(3)
        .map(|p| p.display().to_string())
        .collect();
    if paths.len() > shown.len() {
        shown.push(format!("+{} more", paths.len() - shown.len()));
    }
    shown.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;

    use tempfile::TempDir;

    fn synced_tree(files: &[(&str, &[u8])]) -> TempDir {
        let tree = TempDir::new().expect("tree");
        let mut hashes = BTreeMap::new();
        for (name, content) in files {
            let path = tree.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            hashes.insert(
                name.to_string(),
                hash_file_hex(&path, &CancelToken::new()).unwrap(),
            );
        }
        marker::save(
            tree.path(),
            &ReleaseMarker {
                release: "7.1.0".into(),
                resolved_commit: None,
                synced_at: Utc::now(),
                files: hashes,
            },
        )
        .unwrap();
        tree
    }

    #[test]
    fn no_marker_is_never_synced() {
        let tree = TempDir::new().unwrap();
        assert_eq!(check(tree.path()).unwrap(), StalenessSignal::NeverSynced);
    }

    #[test]
    fn untouched_tree_is_current() {
        let tree = synced_tree(&[("bazel", b"v1")]);
        assert_eq!(check(tree.path()).unwrap(), StalenessSignal::Current);
    }

    #[test]
    fn missing_file_is_stale_not_modified() {
        let tree = synced_tree(&[("bazel", b"v1"), ("jars/a.jar", b"a")]);
        fs::remove_file(tree.path().join("jars/a.jar")).unwrap();
        fs::write(tree.path().join("bazel"), b"edited").unwrap();

        match check(tree.path()).unwrap() {
            StalenessSignal::Stale { reason } => assert!(reason.contains("jars/a.jar")),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn edited_file_is_modified() {
        let tree = synced_tree(&[("bazel", b"v1")]);
        fs::write(tree.path().join("bazel"), b"v2").unwrap();
        assert_eq!(
            check(tree.path()).unwrap(),
            StalenessSignal::Modified {
                files: vec![PathBuf::from("bazel")]
            }
        );
    }

    #[test]
    fn marker_paths_outside_the_tree_are_never_read() {
        let outer = TempDir::new().unwrap();
        let tree = outer.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(outer.path().join("secret"), b"outside").unwrap();
        let mut files = BTreeMap::new();
        files.insert(
            "../secret".to_string(),
            hash_file_hex(&outer.path().join("secret"), &CancelToken::new()).unwrap(),
        );
        marker::save(
            &tree,
            &ReleaseMarker {
                release: "7.1.0".into(),
                resolved_commit: None,
                synced_at: Utc::now(),
                files,
            },
        )
        .unwrap();

        match check(&tree).unwrap() {
            StalenessSignal::Stale { reason } => {
                assert!(reason.contains("outside the tree"), "{reason}");
                assert!(reason.contains("../secret"), "{reason}");
            }
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[test]
    fn signal_labels_are_kebab_case() {
        assert_eq!(StalenessSignal::NeverSynced.label(), "never-synced");
        assert_eq!(
            StalenessSignal::Modified { files: Vec::new() }.label(),
            "modified"
        );
    }

    #[test]
    fn status_covers_every_destination() {
        let root = TempDir::new().unwrap();
        let manifest = SyncManifest::bazel_default();
        let rows = status(&manifest, root.path()).unwrap();
        assert_eq!(rows.len(), manifest.destinations.len());
        assert!(rows
            .iter()
            .all(|row| row.signal == StalenessSignal::NeverSynced && row.release.is_none()));
    }

    #[test]
    fn format_age_buckets() {
        assert_eq!(format_seconds(5), "5s");
        assert_eq!(format_seconds(120), "2m");
        assert_eq!(format_seconds(7200), "2h");
        assert_eq!(format_seconds(3 * 86400), "3d");
        assert_eq!(
            format_datetime_age(Utc::now() - chrono::Duration::hours(5)),
            "5h"
        );
    }
}
