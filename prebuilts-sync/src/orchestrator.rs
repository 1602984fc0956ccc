//! Sync orchestration across destination trees.
//!
//! ## `sync`: run protocol
//!
//! 1. Validate the manifest, including that destinations are disjoint.
//! 2. Fetch the metadata document once (with retries), if any batch needs it.
//! 3. Run one scoped thread per batch:
//!    resolve → fetch all → verify all → extract into staging → build the
//!    next tree beside the destination → swap it into place.
//! 4. Join, remove empty parent directories this run created for failed
//!    batches, merge the batch reports, and fail with [`AggregateError`] if
//!    any batch failed. Successful batches keep their updates.
//!
//! A batch touches its destination tree only through the final rename of
//! the fully built next tree, so a failed batch leaves the tree as it was.
//! Staging lives in `<parent>/.prebuilts-staging-<tree>-*`; leftovers from an
//! interrupted run are removed when the same tree is synced again.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use prebuilts_core::{
    ArtifactKind, BatchKey, ManifestError, ReleaseIdentifier, StagedArtifact, SyncManifest,
};

use crate::cancel::CancelToken;
use crate::error::{io_err, FailureClass, SyncError};
use crate::extract::{extract, install_executable};
use crate::fetcher::HttpClient;
use crate::marker::{self, file_key, ReleaseMarker, MARKER_FILE};
use crate::report::{
    AggregateError, ArtifactReport, BatchReport, BatchState, FileAction, FileReport, Stage,
    SyncReport,
};
use crate::resolver::{descriptors_for, MetadataResolver, ReleaseMetadata};
use crate::verify::verify_staged;
use crate::writer::{install_tree, mirror_tree, swap_tree};

const STAGING_PREFIX: &str = ".prebuilts-staging-";

/// Knobs for one run. CLI flags override the manifest-derived defaults.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Relative destinations resolve against this directory.
    pub root: PathBuf,
    /// Batches to sync; empty means every batch with artifacts.
    pub batches: Vec<BatchKey>,
    pub dry_run: bool,
    /// Attempts per network operation (1 = no retry).
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Caller-initiated cancellation, including an overall deadline.
    pub cancel: CancelToken,
}

impl SyncOptions {
    pub fn from_manifest(manifest: &SyncManifest, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            batches: Vec::new(),
            dry_run: false,
            retries: manifest.retries,
            retry_backoff: Duration::from_millis(manifest.retry_backoff_ms),
            timeout: Duration::from_secs(manifest.timeout_secs),
            cancel: CancelToken::new(),
        }
    }
}

/// State shared read-only by every batch thread.
struct RunContext<'a> {
    manifest: &'a SyncManifest,
    release: &'a ReleaseIdentifier,
    options: &'a SyncOptions,
    client: HttpClient,
    metadata: Option<Result<ReleaseMetadata, SyncError>>,
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

/// Synchronize the selected destination trees to `release`.
pub fn sync(
    manifest: &SyncManifest,
    release: &ReleaseIdentifier,
    options: &SyncOptions,
) -> Result<SyncReport, AggregateError> {
    let batches = select_batches(manifest, options);
    tracing::info!(
        release = %release,
        batches = batches.len(),
        dry_run = options.dry_run,
        "starting sync"
    );

    let mut report = SyncReport {
        release: release.to_string(),
        resolved_commit: None,
        dry_run: options.dry_run,
        batches: Vec::with_capacity(batches.len()),
    };

    if let Err(err) = manifest.validate_at(&options.root) {
        let reason = err.to_string();
        for batch in &batches {
            let mut batch_report = BatchReport::new(
                *batch,
                manifest
                    .destination_root(&options.root, *batch)
                    .unwrap_or_default(),
            );
            batch_report.fail(
                None,
                &SyncError::Manifest(ManifestError::Invalid {
                    reason: reason.clone(),
                }),
            );
            report.batches.push(batch_report);
        }
        return finish(report);
    }

    let client = HttpClient::new(options.timeout, options.cancel.clone());
    let metadata = if manifest.needs_metadata(&batches) {
        Some(fetch_metadata(manifest, release, options, &client))
    } else {
        None
    };
    report.resolved_commit = metadata
        .as_ref()
        .and_then(|m| m.as_ref().ok())
        .and_then(|m| m.commit.clone());

    let ctx = RunContext {
        manifest,
        release,
        options,
        client,
        metadata,
    };

    // Recorded before any thread runs, so cleanup never races a sibling batch.
    let destinations: Vec<(BatchKey, Option<PathBuf>, Option<PathBuf>)> = batches
        .iter()
        .map(|batch| {
            let dest = manifest.destination_root(&options.root, *batch);
            let created = dest
                .as_deref()
                .and_then(|dest| first_missing_ancestor(&staging_parent(dest)));
            (*batch, dest, created)
        })
        .collect();

    let batch_reports: Vec<BatchReport> = std::thread::scope(|scope| {
        let handles: Vec<_> = destinations
            .iter()
            .map(|(batch, dest, _)| {
                let ctx = &ctx;
                let handle = scope.spawn(move || run_batch(ctx, *batch, dest.as_deref()));
                (*batch, dest, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(batch, dest, handle)| {
                handle.join().unwrap_or_else(|_| {
                    let mut crashed = BatchReport::new(batch, dest.clone().unwrap_or_default());
                    crashed.state = BatchState::Failed {
                        stage: Stage::Install,
                        class: FailureClass::Io,
                        message: "batch worker panicked".to_string(),
                    };
                    crashed
                })
            })
            .collect()
    });

    for (_, dest, created) in &destinations {
        if let (Some(dest), Some(created)) = (dest, created) {
            remove_empty_parents(&staging_parent(dest), created);
        }
    }

    report.batches = batch_reports;
    finish(report)
}

fn finish(report: SyncReport) -> Result<SyncReport, AggregateError> {
    let failures = report.failures();
    if failures.is_empty() {
        tracing::info!(
            changed = report.changed_files().len(),
            "sync complete"
        );
        Ok(report)
    } else {
        Err(AggregateError { report, failures })
    }
}

/// Requested batches in stable order, dropping those with nothing to sync.
fn select_batches(manifest: &SyncManifest, options: &SyncOptions) -> Vec<BatchKey> {
    if options.batches.is_empty() {
        return manifest.batches();
    }
    let requested: BTreeSet<BatchKey> = options.batches.iter().copied().collect();
    requested
        .into_iter()
        .filter(|batch| {
            let has_artifacts = !manifest.artifacts_for(*batch).is_empty();
            if !has_artifacts {
                tracing::warn!(batch = %batch, "no artifacts configured; skipping");
            }
            has_artifacts
        })
        .collect()
}

fn fetch_metadata(
    manifest: &SyncManifest,
    release: &ReleaseIdentifier,
    options: &SyncOptions,
    client: &HttpClient,
) -> Result<ReleaseMetadata, SyncError> {
    let template = manifest
        .metadata_url
        .clone()
        .ok_or_else(|| ManifestError::Invalid {
            reason: "metadata_url is required for metadata-sourced artifacts".to_string(),
        })?;
    let resolver = MetadataResolver::new(client.clone(), template);
    with_retries(options, &resolver.metadata_url(release), || {
        resolver.fetch_metadata(release)
    })
}

/// Run `op` up to `options.retries` times while it fails with a retryable class.
pub(crate) fn with_retries<T>(
    options: &SyncOptions,
    what: &str,
    mut op: impl FnMut() -> Result<T, SyncError>,
) -> Result<T, SyncError> {
    let attempts = options.retries.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.class().is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, attempts, what, "retrying after error: {err}");
                options.cancel.sleep(options.retry_backoff)?;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Staging directories
// ---------------------------------------------------------------------------

/// Directory holding `dest`; staging and the swap happen there.
fn staging_parent(dest: &Path) -> PathBuf {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `.prebuilts-staging-<tree name>-`
fn staging_prefix(dest: &Path, batch: BatchKey) -> String {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| batch.to_string());
    format!("{STAGING_PREFIX}{name}-")
}

/// Topmost ancestor of `dir` (itself included) that does not exist yet.
fn first_missing_ancestor(dir: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}

/// Remove `dir` and its parents up to `top` while they are empty.
fn remove_empty_parents(dir: &Path, top: &Path) {
    for ancestor in dir.ancestors() {
        if !ancestor.starts_with(top) {
            break;
        }
        match std::fs::remove_dir(ancestor) {
            Ok(()) => tracing::debug!("removed empty directory {}", ancestor.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => break,
        }
    }
}

/// Remove staging directories an interrupted run left for this tree.
fn sweep_stale_staging(parent: &Path, prefix: &str) {
    let Ok(entries) = std::fs::read_dir(parent) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            let path = entry.path();
            match std::fs::remove_dir_all(&path) {
                Ok(()) => tracing::warn!("removed stale staging directory {}", path.display()),
                Err(e) => tracing::warn!("could not remove {}: {e}", path.display()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

fn run_batch(ctx: &RunContext<'_>, batch: BatchKey, dest: Option<&Path>) -> BatchReport {
    let Some(dest) = dest else {
        let mut report = BatchReport::new(batch, PathBuf::new());
        report.fail(
            None,
            &SyncError::Manifest(ManifestError::Invalid {
                reason: format!("no destination configured for '{batch}'"),
            }),
        );
        return report;
    };

    let mut report = BatchReport::new(batch, dest.to_path_buf());
    report.transition(BatchState::Resolving);

    let metadata = match &ctx.metadata {
        Some(Ok(metadata)) => Some(metadata),
        Some(Err(err)) if ctx.manifest.needs_metadata(&[batch]) => {
            report.fail(None, err);
            return report;
        }
        _ => None,
    };

    let mut current_artifact = None;
    match execute(ctx, batch, dest, metadata, &mut report, &mut current_artifact) {
        Ok(()) => report.transition(BatchState::Done),
        Err(err) => report.fail(current_artifact.as_deref(), &err),
    }
    report
}

fn execute(
    ctx: &RunContext<'_>,
    batch: BatchKey,
    dest: &Path,
    metadata: Option<&ReleaseMetadata>,
    report: &mut BatchReport,
    current_artifact: &mut Option<String>,
) -> Result<(), SyncError> {
    let options = ctx.options;
    let cancel = &options.cancel;
    let descriptors = descriptors_for(batch, ctx.manifest.artifacts_for(batch), metadata)?;

    let prefix = staging_prefix(dest, batch);
    let staging = if options.dry_run {
        tempfile::Builder::new().prefix(&prefix).tempdir()
    } else {
        let parent = staging_parent(dest);
        std::fs::create_dir_all(&parent).map_err(|e| io_err(&parent, e))?;
        sweep_stale_staging(&parent, &prefix);
        tempfile::Builder::new().prefix(&prefix).tempdir_in(&parent)
    }
    .map_err(|e| io_err(dest, e))?;
    let downloads = staging.path().join("downloads");
    let tree = staging.path().join("tree");

    // Fetch everything first; nothing is verified or extracted yet.
    report.transition(BatchState::Fetching);
    let mut staged = Vec::with_capacity(descriptors.len());
    for (index, descriptor) in descriptors.into_iter().enumerate() {
        *current_artifact = Some(descriptor.name.clone());
        let local_path = downloads.join(format!("{index:03}.download"));
        tracing::info!(batch = %batch, artifact = %descriptor.name, url = %descriptor.source_url, "fetching");
        let bytes = with_retries(options, &descriptor.source_url, || {
            ctx.client.fetch(&descriptor.source_url, &local_path)
        })?;
        staged.push(StagedArtifact {
            descriptor,
            local_path,
            bytes,
            verified: false,
        });
    }

    report.transition(BatchState::Verifying);
    for artifact in &mut staged {
        *current_artifact = Some(artifact.descriptor.name.clone());
        verify_staged(artifact, cancel)?;
        report.artifacts.push(ArtifactReport {
            name: artifact.descriptor.name.clone(),
            url: artifact.descriptor.source_url.clone(),
            bytes: artifact.bytes,
            sha256: artifact.descriptor.expected_checksum.to_string(),
        });
    }

    report.transition(BatchState::Extracting);
    let mut files: Vec<PathBuf> = Vec::new();
    let mut seen = BTreeSet::new();
    for artifact in &staged {
        *current_artifact = Some(artifact.descriptor.name.clone());
        cancel.check()?;
        let outputs = match &artifact.descriptor.kind {
            ArtifactKind::Executable => vec![install_executable(
                &artifact.local_path,
                &artifact.descriptor.destination_path,
                &tree,
            )?],
            ArtifactKind::Zip {
                entries,
                strip_prefix,
            } => extract(
                &artifact.local_path,
                entries,
                strip_prefix.as_deref(),
                &tree.join(&artifact.descriptor.destination_path),
            )?
            .into_iter()
            .map(|relative| artifact.descriptor.destination_path.join(relative))
            .collect(),
        };
        for output in outputs {
            let key = file_key(&output);
            if key == MARKER_FILE || !seen.insert(key) {
                return Err(SyncError::OutputConflict { path: output });
            }
            files.push(output);
        }
    }

    report.transition(BatchState::Installing);
    *current_artifact = None;
    let previous = marker::load(dest)?;
    report.previous_release = previous.as_ref().map(|marker| marker.release.clone());
    if report.previous_release.as_deref() == Some(ctx.release.as_str()) {
        tracing::info!(batch = %batch, release = %ctx.release, "tree already holds this release");
    }

    let next_tree = staging.path().join("next");
    if !options.dry_run {
        mirror_tree(dest, &next_tree, cancel)?;
    }
    let installed = install_tree(&tree, dest, &next_tree, &files, options.dry_run, cancel)?;
    let mut hashes = BTreeMap::new();
    for file in &installed {
        hashes.insert(file_key(&file.relative), file.sha256.clone());
        report.files.push(FileReport {
            path: file.relative.clone(),
            action: FileAction::from(&file.result),
            sha256: file.sha256.clone(),
        });
    }

    if let Some(previous) = &previous {
        for key in previous.files.keys().filter(|key| !hashes.contains_key(*key)) {
            tracing::warn!(batch = %batch, file = %key, "file no longer managed; left in place");
        }
    }

    let next = ReleaseMarker {
        release: ctx.release.to_string(),
        resolved_commit: metadata.and_then(|m| m.commit.clone()),
        synced_at: Utc::now(),
        files: hashes,
    };
    let content_changed = installed.iter().any(|file| file.result.is_change());
    let marker_changed = previous
        .as_ref()
        .map_or(true, |previous| !previous.same_content(&next));
    if !options.dry_run && (content_changed || marker_changed) {
        cancel.check()?;
        marker::save(&next_tree, &next)?;
        swap_tree(&next_tree, dest, &staging.path().join("previous"))?;
        report.marker_written = true;
    }

    tracing::info!(
        batch = %batch,
        changed = report.changed_files().count(),
        "batch complete"
    );
    Ok(())
}
