//! Per-batch state tracking and the run report.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use prebuilts_core::BatchKey;

use crate::error::{FailureClass, SyncError};
use crate::writer::WriteResult;

/// Pipeline stage of a batch, used to locate failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolve,
    Fetch,
    Verify,
    Extract,
    Install,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Verify => "verify",
            Stage::Extract => "extract",
            Stage::Install => "install",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one batch. Transitions only move forward; any stage may fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Resolving,
    Fetching,
    Verifying,
    Extracting,
    Installing,
    Done,
    Failed {
        stage: Stage,
        class: FailureClass,
        message: String,
    },
}

impl BatchState {
    /// The stage a failure in this state belongs to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BatchState::Pending | BatchState::Resolving => Some(Stage::Resolve),
            BatchState::Fetching => Some(Stage::Fetch),
            BatchState::Verifying => Some(Stage::Verify),
            BatchState::Extracting => Some(Stage::Extract),
            BatchState::Installing => Some(Stage::Install),
            BatchState::Done => None,
            BatchState::Failed { stage, .. } => Some(*stage),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::Resolving => "resolving",
            BatchState::Fetching => "fetching",
            BatchState::Verifying => "verifying",
            BatchState::Extracting => "extracting",
            BatchState::Installing => "installing",
            BatchState::Done => "done",
            BatchState::Failed { .. } => "failed",
        }
    }
}

/// Install outcome of a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    Written,
    Unchanged,
    WouldWrite,
}

impl From<&WriteResult> for FileAction {
    fn from(result: &WriteResult) -> Self {
        match result {
            WriteResult::Written { .. } => FileAction::Written,
            WriteResult::Unchanged { .. } => FileAction::Unchanged,
            WriteResult::WouldWrite { .. } => FileAction::WouldWrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    pub action: FileAction,
    pub sha256: String,
}

/// A downloaded and verified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReport {
    pub name: String,
    pub url: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Everything one batch did.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch: BatchKey,
    pub destination: PathBuf,
    #[serde(flatten)]
    pub state: BatchState,
    /// Artifact being processed when the batch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_artifact: Option<String>,
    pub artifacts: Vec<ArtifactReport>,
    pub files: Vec<FileReport>,
    /// Release the tree held before this run, if it had a marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_release: Option<String>,
    /// Whether the release marker was replaced.
    pub marker_written: bool,
}

impl BatchReport {
    pub fn new(batch: BatchKey, destination: PathBuf) -> Self {
        Self {
            batch,
            destination,
            state: BatchState::Pending,
            failed_artifact: None,
            artifacts: Vec::new(),
            files: Vec::new(),
            previous_release: None,
            marker_written: false,
        }
    }

    /// Move to `state`, logging the transition.
    pub fn transition(&mut self, state: BatchState) {
        tracing::debug!(batch = %self.batch, from = self.state.label(), to = state.label(), "batch state");
        self.state = state;
    }

    /// Record `err` as the failure of the current stage.
    pub fn fail(&mut self, artifact: Option<&str>, err: &SyncError) {
        let stage = self.state.stage().unwrap_or(Stage::Install);
        tracing::error!(
            batch = %self.batch,
            artifact = artifact.unwrap_or("-"),
            stage = %stage,
            class = %err.class(),
            "batch failed: {err}"
        );
        self.failed_artifact = artifact.map(str::to_string);
        self.state = BatchState::Failed {
            stage,
            class: err.class(),
            message: err.to_string(),
        };
    }

    pub fn failure(&self) -> Option<BatchFailure> {
        match &self.state {
            BatchState::Failed {
                stage,
                class,
                message,
            } => Some(BatchFailure {
                batch: self.batch,
                artifact: self.failed_artifact.clone(),
                stage: *stage,
                class: *class,
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn changed_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|file| file.action != FileAction::Unchanged)
    }
}

/// One failed batch, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch: BatchKey,
    pub artifact: Option<String>,
    pub stage: Stage,
    pub class: FailureClass,
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} during {}", self.batch, self.class, self.stage)?;
        if let Some(artifact) = &self.artifact {
            write!(f, " of '{artifact}'")?;
        }
        write!(f, "]: {}", self.message)
    }
}

// ---------------------------------------------------------------------------
// SyncReport
// ---------------------------------------------------------------------------

/// Outcome of a whole run, one entry per selected batch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub release: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_commit: Option<String>,
    pub dry_run: bool,
    pub batches: Vec<BatchReport>,
}

impl SyncReport {
    /// Files written (or, in a dry run, that would be written).
    pub fn changed_files(&self) -> Vec<&FileReport> {
        self.batches
            .iter()
            .flat_map(BatchReport::changed_files)
            .collect()
    }

    pub fn failures(&self) -> Vec<BatchFailure> {
        self.batches.iter().filter_map(BatchReport::failure).collect()
    }
}

/// A run in which at least one batch failed. Successful batches are still in
/// `report` and their trees are updated.
#[derive(Debug, Error)]
#[error("{} of {} batch(es) failed", .failures.len(), .report.batches.len())]
pub struct AggregateError {
    pub report: SyncReport,
    pub failures: Vec<BatchFailure>,
}

impl AggregateError {
    /// The most severe failure class across all failed batches.
    pub fn class(&self) -> FailureClass {
        self.failures
            .iter()
            .map(|failure| failure.class)
            .max_by_key(|class| class.severity())
            .unwrap_or(FailureClass::Io)
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }
}
