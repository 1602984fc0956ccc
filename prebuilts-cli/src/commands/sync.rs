//! `prebuilts sync <RELEASE>`: fetch, verify, and install a release.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use prebuilts_core::{BatchKey, PlatformTarget, ReleaseIdentifier, SyncManifest};
use prebuilts_sync::{sync, CancelToken, FileAction, SyncOptions, SyncReport};

use crate::LocationArgs;

/// Arguments for `prebuilts sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Commit hash, version tag, or `latest`.
    pub release: String,

    #[command(flatten)]
    pub location: LocationArgs,

    /// Platform tree to sync (repeatable). Default: every configured platform.
    #[arg(long = "platform", short = 'p', value_name = "PLATFORM")]
    pub platforms: Vec<PlatformTarget>,

    /// Destination of the linux-x86_64 tree.
    #[arg(long, value_name = "PATH")]
    pub linux_dest: Option<PathBuf>,

    /// Destination of the darwin-x86_64 tree.
    #[arg(long, value_name = "PATH")]
    pub darwin_dest: Option<PathBuf>,

    /// Destination of the platform-agnostic tree.
    #[arg(long, value_name = "PATH")]
    pub common_dest: Option<PathBuf>,

    /// Skip the platform-agnostic tree.
    #[arg(long)]
    pub no_common: bool,

    /// Metadata URL template containing `{release}`.
    #[arg(long, env = "PREBUILTS_METADATA_URL", value_name = "URL")]
    pub metadata_url: Option<String>,

    /// Attempts per download (1 = no retry).
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Per-request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Abandon the whole run after this many seconds (exit code 7).
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Download and verify, but write nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<ExitCode> {
        let release = ReleaseIdentifier::parse(&self.release)
            .with_context(|| format!("invalid release '{}'", self.release))?;

        let mut manifest = self.location.load_manifest()?;
        self.apply_overrides(&mut manifest);
        manifest
            .validate_at(&self.location.root)
            .context("invalid configuration")?;

        let mut options = SyncOptions::from_manifest(&manifest, &self.location.root);
        options.batches = self.batches(&manifest);
        options.dry_run = self.dry_run;
        if let Some(deadline) = self.deadline {
            options.cancel = CancelToken::with_deadline(Duration::from_secs(deadline));
        }

        let (report, code) = match sync(&manifest, &release, &options) {
            Ok(report) => (report, ExitCode::SUCCESS),
            Err(err) => {
                for failure in &err.failures {
                    eprintln!("{} {failure}", "✗".red().bold());
                }
                let code = u8::try_from(err.exit_code()).unwrap_or(1);
                (err.report, ExitCode::from(code))
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_report(&report);
        }
        Ok(code)
    }

    fn apply_overrides(&self, manifest: &mut SyncManifest) {
        let dests = [
            (
                BatchKey::Platform(PlatformTarget::LinuxX86_64),
                &self.linux_dest,
            ),
            (
                BatchKey::Platform(PlatformTarget::DarwinX86_64),
                &self.darwin_dest,
            ),
            (BatchKey::Common, &self.common_dest),
        ];
        for (batch, dest) in dests {
            if let Some(dest) = dest {
                manifest.destinations.insert(batch, dest.clone());
            }
        }
        if let Some(url) = &self.metadata_url {
            manifest.metadata_url = Some(url.clone());
        }
        if let Some(retries) = self.retries {
            manifest.retries = retries;
        }
        if let Some(timeout) = self.timeout {
            manifest.timeout_secs = timeout;
        }
    }

    /// Requested platforms plus the common tree unless `--no-common`.
    fn batches(&self, manifest: &SyncManifest) -> Vec<BatchKey> {
        let mut batches: Vec<BatchKey> = if self.platforms.is_empty() {
            manifest.batches()
        } else {
            let mut selected: Vec<BatchKey> =
                self.platforms.iter().copied().map(BatchKey::from).collect();
            if !manifest.artifacts_for(BatchKey::Common).is_empty() {
                selected.push(BatchKey::Common);
            }
            selected
        };
        if self.no_common {
            batches.retain(|batch| *batch != BatchKey::Common);
        }
        batches
    }
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let commit = report
        .resolved_commit
        .as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default();
    println!("{prefix}release {}{commit}", report.release.bold());

    for batch in &report.batches {
        let changed = batch.changed_files().count();
        let unchanged = batch.files.len() - changed;
        match batch.failure() {
            Some(failure) => println!(
                "{prefix}{} '{}' failed during {} ({})",
                "✗".red().bold(),
                batch.batch,
                failure.stage,
                failure.class
            ),
            None if batch.files.is_empty() => {
                println!("{prefix}✓ '{}': nothing to do", batch.batch)
            }
            None if changed == 0
                && batch.previous_release.as_deref() == Some(report.release.as_str()) =>
            {
                println!(
                    "{prefix}✓ '{}' already at release {}",
                    batch.batch, report.release
                )
            }
            None => println!(
                "{prefix}✓ '{}' synced ({changed} written, {unchanged} unchanged)",
                batch.batch
            ),
        }
        for file in &batch.files {
            let path = batch.destination.join(&file.path);
            match file.action {
                FileAction::Written => println!("  ✎  {}", path.display()),
                FileAction::WouldWrite => println!("  ~  {}", path.display()),
                FileAction::Unchanged => println!("  ·  {}", path.display()),
            }
        }
    }
}
