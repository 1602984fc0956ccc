//! `prebuilts status`: which release each destination tree holds.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use prebuilts_sync::{
    staleness::{self, format_datetime_age},
    StalenessSignal, TreeStatus,
};

use crate::LocationArgs;

/// Arguments for `prebuilts status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub location: LocationArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let manifest = self.location.load_manifest()?;
        let rows = staleness::status(&manifest, &self.location.root)
            .context("failed to inspect destination trees")?;

        if self.json {
            print_json(&rows)?;
            return Ok(());
        }
        print_table(&rows);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: StatusSummaryJson,
    trees: &'a [TreeStatus],
}

#[derive(Serialize)]
struct StatusSummaryJson {
    trees: usize,
    current: usize,
    needs_sync: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "Tree")]
    tree: String,
    #[tabled(rename = "Release")]
    release: String,
    #[tabled(rename = "Commit")]
    commit: String,
    #[tabled(rename = "Last sync")]
    last_sync: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn needs_sync(rows: &[TreeStatus]) -> usize {
    rows.iter()
        .filter(|row| row.signal != StalenessSignal::Current)
        .count()
}

fn print_json(rows: &[TreeStatus]) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            trees: rows.len(),
            current: rows.len() - needs_sync(rows),
            needs_sync: needs_sync(rows),
        },
        trees: rows,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(rows: &[TreeStatus]) {
    println!(
        "prebuilts v{} | {} trees | {} need sync",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        needs_sync(rows),
    );
    if rows.is_empty() {
        println!("No destination trees configured.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .iter()
        .map(|row| StatusTableRow {
            tree: format!("{}\n{}", row.batch, row.path.display()),
            release: row.release.clone().unwrap_or_else(|| "-".to_string()),
            commit: row
                .resolved_commit
                .as_deref()
                .map(short_commit)
                .unwrap_or_else(|| "-".to_string()),
            last_sync: row
                .synced_at
                .map(|at| format!("{} ago", format_datetime_age(at)))
                .unwrap_or_else(|| "never".to_string()),
            status: signal_label(&row.signal),
            detail: signal_detail(&row.signal),
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    if needs_sync(rows) > 0 {
        println!("Run 'prebuilts sync <RELEASE>' to update trees that are not current.");
    }
}

fn short_commit(commit: &str) -> String {
    commit.chars().take(12).collect()
}

fn signal_label(signal: &StalenessSignal) -> String {
    let label = signal.label().replace('-', " ").to_uppercase();
    match signal {
        StalenessSignal::NeverSynced => label.bright_black().bold().to_string(),
        StalenessSignal::Current => label.green().bold().to_string(),
        StalenessSignal::Stale { .. } => label.yellow().bold().to_string(),
        StalenessSignal::Modified { .. } => label.red().bold().to_string(),
    }
}

fn signal_detail(signal: &StalenessSignal) -> String {
    match signal {
        StalenessSignal::NeverSynced => "no release marker".to_string(),
        StalenessSignal::Current => "up to date".to_string(),
        StalenessSignal::Stale { reason } => reason.clone(),
        StalenessSignal::Modified { files } => format!("{} edited", summarize_files(files)),
    }
}

fn summarize_files(files: &[PathBuf]) -> String {
    if files.is_empty() {
        return "unknown file".to_string();
    }

    let mut names: Vec<String> = files
        .iter()
        .take(2)
        .map(|path| path.display().to_string())
        .collect();
    if files.len() > names.len() {
        names.push(format!("+{} more", files.len() - names.len()));
    }
    names.join(", ")
}
