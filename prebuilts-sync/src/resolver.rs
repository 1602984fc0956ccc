//! Build-metadata lookup: release identifier → artifact descriptors.
//!
//! The metadata document is JSON with one section per platform:
//!
//! ```json
//! { "commit": "364a867d…",
//!   "platforms": { "linux": { "url": "…", "sha256": "…" },
//!                  "macos": { "url": "…", "sha256": "…" } } }
//! ```
//!
//! Unknown fields are ignored. Artifact specs name the URL and checksum fields
//! they read from their batch's section.

use std::collections::BTreeMap;

use serde::Deserialize;

use prebuilts_core::manifest::RELEASE_PLACEHOLDER;
use prebuilts_core::{
    ArtifactDescriptor, ArtifactSource, ArtifactSpec, BatchKey, ReleaseIdentifier, Sha256Hex,
};

use crate::error::SyncError;
use crate::fetcher::HttpClient;

/// Parsed metadata document for one release.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReleaseMetadata {
    /// Commit the release was built from, when published.
    #[serde(default)]
    pub commit: Option<String>,
    pub platforms: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
}

impl ReleaseMetadata {
    /// String value of `field` in the section of `batch`.
    pub fn field(&self, batch: BatchKey, field: &str) -> Result<&str, SyncError> {
        let section_name = batch.metadata_key();
        let section = self
            .platforms
            .get(section_name)
            .ok_or_else(|| SyncError::MalformedMetadata {
                reason: format!("no '{section_name}' section in platforms"),
            })?;
        section
            .get(field)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SyncError::MalformedMetadata {
                reason: format!("missing string field '{field}' in '{section_name}' section"),
            })
    }
}

/// Parse a metadata document.
pub fn parse_metadata(text: &str) -> Result<ReleaseMetadata, SyncError> {
    serde_json::from_str(text).map_err(|e| SyncError::MalformedMetadata {
        reason: format!("invalid metadata document: {e}"),
    })
}

/// Resolve the artifact specs of one batch into descriptors.
///
/// `metadata` may be `None` only when every spec is pinned.
pub fn descriptors_for(
    batch: BatchKey,
    specs: &[ArtifactSpec],
    metadata: Option<&ReleaseMetadata>,
) -> Result<Vec<ArtifactDescriptor>, SyncError> {
    specs
        .iter()
        .map(|spec| {
            let (url, checksum) = match &spec.source {
                ArtifactSource::Pinned { url, sha256 } => (url.clone(), sha256.clone()),
                ArtifactSource::Metadata {
                    url_field,
                    checksum_field,
                } => {
                    let metadata = metadata.ok_or_else(|| SyncError::MalformedMetadata {
                        reason: format!(
                            "artifact '{}' needs build metadata but none was loaded",
                            spec.name
                        ),
                    })?;
                    let url = metadata.field(batch, url_field)?.to_string();
                    let checksum = Sha256Hex::parse(metadata.field(batch, checksum_field)?)?;
                    (url, checksum)
                }
            };
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(SyncError::MalformedMetadata {
                    reason: format!("artifact '{}' has non-HTTP URL '{url}'", spec.name),
                });
            }
            Ok(ArtifactDescriptor {
                name: spec.name.clone(),
                source_url: url,
                expected_checksum: checksum,
                destination_path: spec.destination.clone(),
                kind: spec.kind.clone(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MetadataResolver
// ---------------------------------------------------------------------------

/// Fetches metadata documents from a `{release}` URL template.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    client: HttpClient,
    url_template: String,
}

impl MetadataResolver {
    pub fn new(client: HttpClient, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    pub fn metadata_url(&self, release: &ReleaseIdentifier) -> String {
        self.url_template
            .replace(RELEASE_PLACEHOLDER, release.as_str())
    }

    /// Fetch and parse the metadata document for `release`.
    ///
    /// HTTP 404 maps to [`SyncError::NotFound`].
    pub fn fetch_metadata(&self, release: &ReleaseIdentifier) -> Result<ReleaseMetadata, SyncError> {
        let url = self.metadata_url(release);
        tracing::debug!(release = %release, url = %url, "fetching build metadata");
        let text = match self.client.get_text(&url) {
            Ok(text) => text,
            Err(SyncError::HttpStatus { status: 404, url }) => {
                return Err(SyncError::NotFound {
                    release: release.to_string(),
                    url,
                })
            }
            Err(err) => return Err(err),
        };
        parse_metadata(&text)
    }
}
