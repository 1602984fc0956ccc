//! prebuilts: verified prebuilt-artifact sync CLI.
//!
//! # Usage
//!
//! ```text
//! prebuilts init [--root DIR] [--force]
//! prebuilts sync <RELEASE> [--platform P]... [--no-common] [--dry-run] [--json]
//! prebuilts status [--root DIR] [--json]
//! ```
//!
//! Exit codes: 0 ok, 1 config, 2 metadata, 3 network, 4 checksum,
//! 5 extraction, 6 local I/O, 7 cancelled.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{init::InitArgs, status::StatusArgs, sync::SyncArgs};
use prebuilts_core::{manifest, SyncManifest};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "prebuilts",
    version,
    about = "Fetch, verify, and install prebuilt Bazel artifacts",
    long_about = None,
)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default manifest to <root>/prebuilts.yaml.
    Init(InitArgs),

    /// Synchronize destination trees to a release.
    Sync(SyncArgs),

    /// Show which release each destination tree holds.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Shared location arguments
// ---------------------------------------------------------------------------

/// `--root` / `--config`, shared by `sync` and `status`.
#[derive(Args, Debug, Clone)]
pub struct LocationArgs {
    /// Checkout root; relative destinations resolve against it.
    #[arg(long, default_value = ".", value_name = "DIR")]
    pub root: PathBuf,

    /// Manifest to use instead of <root>/prebuilts.yaml.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl LocationArgs {
    /// The explicit `--config`, else `<root>/prebuilts.yaml`, else the built-in default.
    pub fn load_manifest(&self) -> Result<SyncManifest> {
        match &self.config {
            Some(path) => manifest::load_from(path)
                .with_context(|| format!("failed to load manifest '{}'", path.display())),
            None => manifest::load_or_default_at(&self.root).with_context(|| {
                format!(
                    "failed to load '{}'",
                    manifest::manifest_path_at(&self.root).display()
                )
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init(args) => args.run().map(|()| ExitCode::SUCCESS),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run().map(|()| ExitCode::SUCCESS),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

/// Logs go to stderr; stdout carries the report.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
