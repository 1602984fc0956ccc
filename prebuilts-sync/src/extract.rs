//! Allow-list extraction of verified archives into a staging tree.
//!
//! Only the named entries are ever read. Every entry name and every derived
//! output path is validated before the first byte is written.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use prebuilts_core::manifest::is_contained_relative;

use crate::error::{io_err, SyncError};

/// Extract `entries` from the zip at `archive` into `destination_root`.
///
/// Output paths are the entry names with `strip_prefix` removed, relative to
/// `destination_root`. Returns those relative paths in request order.
pub fn extract(
    archive: &Path,
    entries: &[String],
    strip_prefix: Option<&str>,
    destination_root: &Path,
) -> Result<Vec<PathBuf>, SyncError> {
    let mut planned = Vec::with_capacity(entries.len());
    let mut seen = BTreeSet::new();
    for entry in entries {
        let relative = output_path(archive, entry, strip_prefix)?;
        if !seen.insert(relative.clone()) {
            return Err(SyncError::OutputConflict { path: relative });
        }
        planned.push((entry.as_str(), relative));
    }

    let file = File::open(archive).map_err(|e| io_err(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| SyncError::Archive {
        path: archive.to_path_buf(),
        source: e,
    })?;

    let present: BTreeSet<&str> = zip.file_names().collect();
    if let Some((missing, _)) = planned.iter().find(|(name, _)| !present.contains(name)) {
        return Err(SyncError::EntryNotFound {
            archive: archive.to_path_buf(),
            entry: (*missing).to_string(),
        });
    }

    let mut extracted = Vec::with_capacity(planned.len());
    for (name, relative) in planned {
        let mut entry = match zip.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(SyncError::EntryNotFound {
                    archive: archive.to_path_buf(),
                    entry: name.to_string(),
                })
            }
            Err(e) => {
                return Err(SyncError::Archive {
                    path: archive.to_path_buf(),
                    source: e,
                })
            }
        };
        if entry.is_dir() {
            return Err(SyncError::EntryNotFound {
                archive: archive.to_path_buf(),
                entry: name.to_string(),
            });
        }
        if entry.enclosed_name().is_none() {
            return Err(SyncError::PathTraversal {
                entry: name.to_string(),
            });
        }

        let out = destination_root.join(&relative);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut outfile = File::create(&out).map_err(|e| io_err(&out, e))?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| io_err(&out, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                std::fs::set_permissions(&out, std::fs::Permissions::from_mode(mode & 0o777))
                    .map_err(|e| io_err(&out, e))?;
            }
        }

        tracing::debug!(entry = name, path = %out.display(), "extracted");
        extracted.push(relative);
    }
    Ok(extracted)
}

/// Copy a verified executable download to `destination_root/relative`, mode 0755.
pub fn install_executable(
    download: &Path,
    relative: &Path,
    destination_root: &Path,
) -> Result<PathBuf, SyncError> {
    if relative.as_os_str().is_empty() || !is_contained_relative(relative) {
        return Err(SyncError::PathTraversal {
            entry: relative.display().to_string(),
        });
    }
    let out = destination_root.join(relative);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::copy(download, &out).map_err(|e| io_err(&out, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&out, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| io_err(&out, e))?;
    }
    Ok(relative.to_path_buf())
}

/// Validate `entry` and map it to its output path relative to the destination.
fn output_path(
    archive: &Path,
    entry: &str,
    strip_prefix: Option<&str>,
) -> Result<PathBuf, SyncError> {
    check_entry_name(entry)?;
    let stripped = match strip_prefix {
        Some(prefix) => entry
            .strip_prefix(prefix)
            .ok_or_else(|| SyncError::EntryNotFound {
                archive: archive.to_path_buf(),
                entry: format!("{entry} (outside prefix '{prefix}')"),
            })?,
        None => entry,
    };
    let relative: PathBuf = Path::new(stripped.trim_start_matches('/'))
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    if relative.as_os_str().is_empty() || !is_contained_relative(&relative) {
        return Err(SyncError::PathTraversal {
            entry: entry.to_string(),
        });
    }
    Ok(relative)
}

/// Reject absolute names, drive prefixes, backslashes, and `..` segments.
fn check_entry_name(entry: &str) -> Result<(), SyncError> {
    let traversal = || SyncError::PathTraversal {
        entry: entry.to_string(),
    };
    if entry.is_empty() || entry.starts_with('/') || entry.contains('\\') || entry.contains('\0')
    {
        return Err(traversal());
    }
    if entry.split('/').any(|segment| segment == "..") {
        return Err(traversal());
    }
    let path = Path::new(entry);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(traversal());
    }
    Ok(())
}
