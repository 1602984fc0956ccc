//! Hash-gated installer that builds the next version of a tree beside it.
//!
//! ## Install protocol
//!
//! 1. [`mirror_tree`] hard-links the current tree into a sibling `next`
//!    directory on the same filesystem (copying where links are refused).
//! 2. [`install_file`] per managed file: hash the staged file and the current
//!    one. Identical content and permissions → `Unchanged`. Dry run →
//!    `WouldWrite`. Otherwise the staged file is renamed into `next` →
//!    `Written`.
//! 3. [`swap_tree`] renames the current tree aside and `next` into its place.
//!    If the second rename fails, the current tree is renamed back.
//!
//! Until step 3 the destination tree is never written, so any failure
//! leaves it exactly as it was.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::{io_err, SyncError};
use crate::verify::hash_file_hex;

// ---------------------------------------------------------------------------
// Write result
// ---------------------------------------------------------------------------

/// Outcome of installing one file. `path` is the file in the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// File was replaced or created.
    Written { path: PathBuf },
    /// Installed file already matches the staged one.
    Unchanged { path: PathBuf },
    /// `--dry-run` mode: the file *would* have been written.
    WouldWrite { path: PathBuf },
}

impl WriteResult {
    /// Written or would be written.
    pub fn is_change(&self) -> bool {
        !matches!(self, WriteResult::Unchanged { .. })
    }
}

/// One installed file: its tree-relative path, digest, and outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledFile {
    pub relative: PathBuf,
    pub sha256: String,
    pub result: WriteResult,
}

// ---------------------------------------------------------------------------
// install_file / install_tree
// ---------------------------------------------------------------------------

/// Install `staged` at `target` unless `current` already holds identical
/// content with identical permissions.
///
/// `target` is where the next tree keeps the file; `current` is the same
/// file in the live tree. Returns the outcome and the staged file's SHA-256.
pub fn install_file(
    staged: &Path,
    current: &Path,
    target: &Path,
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<(WriteResult, String), SyncError> {
    let digest = hash_file_hex(staged, cancel)?;
    let path = current.to_path_buf();

    if current.is_file()
        && hash_file_hex(current, cancel)? == digest
        && same_permissions(staged, current)?
    {
        tracing::debug!("unchanged: {}", current.display());
        return Ok((WriteResult::Unchanged { path }, digest));
    }

    if dry_run {
        tracing::info!("[dry-run] would write: {}", current.display());
        return Ok((WriteResult::WouldWrite { path }, digest));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    if std::fs::rename(staged, target).is_err() {
        let tmp = tmp_path(target);
        if let Err(e) = std::fs::copy(staged, &tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&tmp, e));
        }
        if let Err(e) = std::fs::rename(&tmp, target) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(target, e));
        }
    }

    tracing::info!("staged for install: {}", current.display());
    Ok((WriteResult::Written { path }, digest))
}

/// Install every `files` entry (relative to `staging_tree`) into `next_root`,
/// comparing against `current_root`.
///
/// Files are processed in the given order; the first error stops the install.
pub fn install_tree(
    staging_tree: &Path,
    current_root: &Path,
    next_root: &Path,
    files: &[PathBuf],
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<Vec<InstalledFile>, SyncError> {
    let mut installed = Vec::with_capacity(files.len());
    for relative in files {
        cancel.check()?;
        let (result, sha256) = install_file(
            &staging_tree.join(relative),
            &current_root.join(relative),
            &next_root.join(relative),
            dry_run,
            cancel,
        )?;
        installed.push(InstalledFile {
            relative: relative.clone(),
            sha256,
            result,
        });
    }
    Ok(installed)
}

// ---------------------------------------------------------------------------
// mirror_tree / swap_tree
// ---------------------------------------------------------------------------

/// Recreate `from` at `to`: directories are created, files hard-linked (or
/// copied), symlinks recreated. A missing `from` yields an empty `to`.
pub fn mirror_tree(from: &Path, to: &Path, cancel: &CancelToken) -> Result<(), SyncError> {
    std::fs::create_dir_all(to).map_err(|e| io_err(to, e))?;
    if !from.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(from).min_depth(1).follow_links(false) {
        cancel.check()?;
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            io_err(path, e.into())
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            link_or_copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Put `next` in place of `dest`, parking the old tree at `aside`.
pub fn swap_tree(next: &Path, dest: &Path, aside: &Path) -> Result<(), SyncError> {
    let had_tree = dest.symlink_metadata().is_ok();
    if had_tree {
        std::fs::rename(dest, aside).map_err(|e| io_err(dest, e))?;
    }
    if let Err(e) = std::fs::rename(next, dest) {
        if had_tree {
            if let Err(restore) = std::fs::rename(aside, dest) {
                tracing::error!(
                    "could not restore {} from {}: {restore}",
                    dest.display(),
                    aside.display()
                );
            }
        }
        return Err(io_err(dest, e));
    }
    Ok(())
}

fn link_or_copy(source: &Path, target: &Path) -> Result<(), SyncError> {
    if std::fs::hard_link(source, target).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| io_err(target, e))
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), SyncError> {
    let link = std::fs::read_link(source).map_err(|e| io_err(source, e))?;
    std::os::unix::fs::symlink(link, target).map_err(|e| io_err(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<(), SyncError> {
    link_or_copy(source, target)
}

/// `<path>.prebuilts.tmp`
fn tmp_path(target: &Path) -> PathBuf {
    PathBuf::from(format!("{}.prebuilts.tmp", target.display()))
}

#[cfg(unix)]
fn same_permissions(a: &Path, b: &Path) -> Result<bool, SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = |p: &Path| -> Result<u32, SyncError> {
        Ok(std::fs::metadata(p).map_err(|e| io_err(p, e))?.permissions().mode() & 0o777)
    };
    Ok(mode(a)? == mode(b)?)
}

#[cfg(not(unix))]
fn same_permissions(_a: &Path, _b: &Path) -> Result<bool, SyncError> {
    Ok(true)
}
