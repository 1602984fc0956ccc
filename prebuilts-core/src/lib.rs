//! Prebuilts core library: domain types, sync manifest persistence, errors.
//!
//! - [`types`]: release identifiers, platforms, artifact descriptors
//! - [`error`]: [`ManifestError`], [`ChecksumFormatError`]
//! - [`manifest`]: load / save / init / validate `prebuilts.yaml`

pub mod error;
pub mod manifest;
pub mod types;

pub use error::{ChecksumFormatError, ManifestError};
pub use manifest::SyncManifest;
pub use types::{
    ArtifactDescriptor, ArtifactKind, ArtifactSource, ArtifactSpec, BatchKey, PlatformTarget,
    ReleaseIdentifier, Sha256Hex, StagedArtifact,
};
