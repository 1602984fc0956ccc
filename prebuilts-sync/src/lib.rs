//! # prebuilts-sync
//!
//! Verified download, extraction, and atomic installation of prebuilt
//! artifacts into destination trees.
//!
//! Call [`sync`] to bring the selected trees of a [`prebuilts_core::SyncManifest`]
//! to a release, or [`staleness::status`] to inspect what each tree holds.

pub mod cancel;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod marker;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod staleness;
pub mod verify;
pub mod writer;

pub use cancel::CancelToken;
pub use error::{FailureClass, SyncError};
pub use orchestrator::{sync, SyncOptions};
pub use report::{AggregateError, BatchFailure, BatchReport, BatchState, FileAction, SyncReport};
pub use resolver::{MetadataResolver, ReleaseMetadata};
pub use staleness::{StalenessSignal, TreeStatus};
pub use writer::WriteResult;
