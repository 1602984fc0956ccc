//! Sync manifest: the YAML document describing what to mirror and where.
//!
//! # Storage layout
//!
//! ```text
//! <root>/
//!   prebuilts.yaml                 (manifest: optional, built-in default otherwise)
//!   prebuilts/bazel/linux-x86_64/  (destination trees, relative to <root>)
//!   prebuilts/bazel/darwin-x86_64/
//!   prebuilts/bazel/common/
//! ```
//!
//! # API pattern
//!
//! Every function takes the checkout root explicitly (`fn_at(root, …)`); nothing
//! here reads the process working directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::types::{
    ArtifactKind, ArtifactSource, ArtifactSpec, BatchKey, PlatformTarget, ReleaseIdentifier,
};

/// File name of the manifest inside the checkout root.
pub const MANIFEST_FILE: &str = "prebuilts.yaml";

/// Only supported manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// Bazel CI build metadata, one JSON document per commit plus `latest.json`.
pub const DEFAULT_METADATA_URL: &str =
    "https://storage.googleapis.com/bazel-builds/metadata/{release}.json";

/// Placeholder substituted with the release identifier.
pub const RELEASE_PLACEHOLDER: &str = "{release}";

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 600;

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Root of `prebuilts.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncManifest {
    pub version: u32,
    /// Template containing `{release}`. Required when any artifact is metadata-sourced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_url: Option<String>,
    /// Attempts per network stage (1 = no retry).
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-request timeout for metadata and artifact downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Destination tree per batch; relative paths resolve against the root.
    pub destinations: BTreeMap<BatchKey, PathBuf>,
    #[serde(default)]
    pub artifacts: BTreeMap<BatchKey, Vec<ArtifactSpec>>,
}

impl Default for SyncManifest {
    fn default() -> Self {
        Self::bazel_default()
    }
}

impl SyncManifest {
    /// The AOSP `prebuilts/bazel` layout: one Bazel binary per platform.
    ///
    /// The `common` tree has a destination but no artifacts; Java toolchain
    /// archives are added per checkout as pinned zip entries.
    pub fn bazel_default() -> Self {
        let bazel_from_metadata = |platform: PlatformTarget| ArtifactSpec {
            name: match platform {
                PlatformTarget::LinuxX86_64 => "bazel-linux",
                PlatformTarget::DarwinX86_64 => "bazel-darwin",
            }
            .to_string(),
            source: ArtifactSource::Metadata {
                url_field: "url".to_string(),
                checksum_field: "sha256".to_string(),
            },
            kind: ArtifactKind::Executable,
            destination: PathBuf::from("bazel"),
        };

        let mut destinations = BTreeMap::new();
        let mut artifacts = BTreeMap::new();
        for platform in PlatformTarget::all() {
            let key = BatchKey::Platform(*platform);
            destinations.insert(
                key,
                PathBuf::from("prebuilts").join("bazel").join(platform.as_str()),
            );
            artifacts.insert(key, vec![bazel_from_metadata(*platform)]);
        }
        destinations.insert(
            BatchKey::Common,
            PathBuf::from("prebuilts").join("bazel").join("common"),
        );

        Self {
            version: MANIFEST_VERSION,
            metadata_url: Some(DEFAULT_METADATA_URL.to_string()),
            retries: DEFAULT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            destinations,
            artifacts,
        }
    }

    /// Batches that have at least one artifact, in stable order.
    pub fn batches(&self) -> Vec<BatchKey> {
        self.artifacts
            .iter()
            .filter(|(_, specs)| !specs.is_empty())
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn artifacts_for(&self, batch: BatchKey) -> &[ArtifactSpec] {
        self.artifacts.get(&batch).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Absolute destination tree for `batch`, or `None` if unconfigured.
    pub fn destination_root(&self, root: &Path, batch: BatchKey) -> Option<PathBuf> {
        self.destinations.get(&batch).map(|dest| {
            if dest.is_absolute() {
                dest.clone()
            } else {
                root.join(dest)
            }
        })
    }

    /// Whether any of `batches` needs the metadata document.
    pub fn needs_metadata(&self, batches: &[BatchKey]) -> bool {
        batches.iter().any(|batch| {
            self.artifacts_for(*batch)
                .iter()
                .any(|spec| matches!(spec.source, ArtifactSource::Metadata { .. }))
        })
    }

    /// Metadata URL for `release`, if a template is configured.
    pub fn metadata_url_for(&self, release: &ReleaseIdentifier) -> Option<String> {
        self.metadata_url
            .as_ref()
            .map(|template| template.replace(RELEASE_PLACEHOLDER, release.as_str()))
    }

    /// [`validate`](Self::validate), then check that the destinations resolved
    /// against `root` are pairwise disjoint.
    pub fn validate_at(&self, root: &Path) -> Result<(), ManifestError> {
        self.validate()?;
        self.check_disjoint_destinations(root)
    }

    /// No destination may equal or contain another one.
    fn check_disjoint_destinations(&self, root: &Path) -> Result<(), ManifestError> {
        let resolved: Vec<(BatchKey, PathBuf)> = self
            .destinations
            .keys()
            .filter_map(|batch| {
                self.destination_root(root, *batch)
                    .map(|dest| (*batch, normalize_lexically(&dest)))
            })
            .collect();
        for (i, (a, a_path)) in resolved.iter().enumerate() {
            for (b, b_path) in &resolved[i + 1..] {
                if a_path.starts_with(b_path) || b_path.starts_with(a_path) {
                    return Err(ManifestError::Invalid {
                        reason: format!(
                            "destinations of '{a}' ({}) and '{b}' ({}) overlap",
                            a_path.display(),
                            b_path.display()
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check structural constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ManifestError> {
        let invalid = |reason: String| Err(ManifestError::Invalid { reason });

        if self.version != MANIFEST_VERSION {
            return invalid(format!(
                "unsupported version {} (expected {MANIFEST_VERSION})",
                self.version
            ));
        }
        if self.retries == 0 {
            return invalid("retries must be at least 1".to_string());
        }
        if self.timeout_secs == 0 {
            return invalid("timeout_secs must be at least 1".to_string());
        }

        let batches = self.batches();
        if batches.is_empty() {
            return invalid("no artifacts configured".to_string());
        }
        if self.needs_metadata(&batches) {
            match &self.metadata_url {
                Some(url) if url.contains(RELEASE_PLACEHOLDER) => {}
                Some(url) => {
                    return invalid(format!(
                        "metadata_url '{url}' must contain {RELEASE_PLACEHOLDER}"
                    ))
                }
                None => {
                    return invalid(
                        "metadata_url is required for metadata-sourced artifacts".to_string(),
                    )
                }
            }
        }

        for batch in &batches {
            if !self.destinations.contains_key(batch) {
                return invalid(format!("batch '{batch}' has artifacts but no destination"));
            }
            let mut names = BTreeSet::new();
            for spec in self.artifacts_for(*batch) {
                if spec.name.trim().is_empty() {
                    return invalid(format!("batch '{batch}' has an artifact without a name"));
                }
                if !names.insert(spec.name.as_str()) {
                    return invalid(format!(
                        "batch '{batch}' lists artifact '{}' twice",
                        spec.name
                    ));
                }
                if !is_contained_relative(&spec.destination) {
                    return invalid(format!(
                        "artifact '{}' destination '{}' must be relative without '..'",
                        spec.name,
                        spec.destination.display()
                    ));
                }
                match &spec.kind {
                    ArtifactKind::Executable if spec.destination.as_os_str().is_empty() => {
                        return invalid(format!(
                            "executable artifact '{}' needs a destination file name",
                            spec.name
                        ));
                    }
                    ArtifactKind::Zip { entries, .. } if entries.is_empty() => {
                        return invalid(format!(
                            "zip artifact '{}' must list at least one entry",
                            spec.name
                        ));
                    }
                    _ => {}
                }
            }
        }
        self.check_disjoint_destinations(Path::new(""))
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True for a relative path made only of normal components (empty allowed).
pub fn is_contained_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<root>/prebuilts.yaml`: pure, no I/O.
pub fn manifest_path_at(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load and validate the manifest at an explicit path.
///
/// Returns `ManifestError::NotFound` if absent,
/// `ManifestError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<SyncManifest, ManifestError> {
    if !path.exists() {
        return Err(ManifestError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    let manifest: SyncManifest = serde_yaml::from_str(&contents).map_err(|e| {
        ManifestError::Parse {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    manifest.validate()?;
    Ok(manifest)
}

/// Load `<root>/prebuilts.yaml`.
pub fn load_at(root: &Path) -> Result<SyncManifest, ManifestError> {
    load_from(&manifest_path_at(root))
}

/// Load `<root>/prebuilts.yaml`, falling back to [`SyncManifest::bazel_default`].
pub fn load_or_default_at(root: &Path) -> Result<SyncManifest, ManifestError> {
    match load_at(root) {
        Err(ManifestError::NotFound { .. }) => Ok(SyncManifest::bazel_default()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save the manifest to `<root>/prebuilts.yaml`.
///
/// Write flow: validate → serialize → `.yaml.tmp` sibling → `rename`.
pub fn save_at(root: &Path, manifest: &SyncManifest) -> Result<PathBuf, ManifestError> {
    manifest.validate()?;
    std::fs::create_dir_all(root)?;
    let path = manifest_path_at(root);
    let tmp_path = path.with_file_name(format!("{MANIFEST_FILE}.tmp"));

    let yaml = serde_yaml::to_string(manifest)?;
    std::fs::write(&tmp_path, yaml)?;
    if let Err(e) = std::fs::rename(&tmp_path, &path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Write the default manifest to `<root>/prebuilts.yaml`.
///
/// Idempotent: if the file already exists and `force` is false, loads and
/// returns it unchanged.
pub fn init_at(root: &Path, force: bool) -> Result<(SyncManifest, PathBuf), ManifestError> {
    let path = manifest_path_at(root);
    if path.exists() && !force {
        return Ok((load_from(&path)?, path));
    }
    let manifest = SyncManifest::bazel_default();
    let path = save_at(root, &manifest)?;
    Ok((manifest, path))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sha256Hex;
    use tempfile::TempDir;

    fn make_root() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn default_manifest_is_valid() {
        SyncManifest::bazel_default().validate().expect("valid");
    }

    #[test]
    fn default_batches_skip_empty_common() {
        let batches = SyncManifest::bazel_default().batches();
        assert_eq!(
            batches,
            vec![
                BatchKey::Platform(PlatformTarget::LinuxX86_64),
                BatchKey::Platform(PlatformTarget::DarwinX86_64),
            ]
        );
    }

    #[test]
    fn metadata_url_substitutes_release() {
        let manifest = SyncManifest::bazel_default();
        let release = ReleaseIdentifier::parse("364a867d").unwrap();
        assert_eq!(
            manifest.metadata_url_for(&release).unwrap(),
            "https://storage.googleapis.com/bazel-builds/metadata/364a867d.json"
        );
    }

    #[test]
    fn destination_root_resolves_relative_to_root() {
        let manifest = SyncManifest::bazel_default();
        let dest = manifest
            .destination_root(Path::new("/aosp"), BatchKey::Common)
            .unwrap();
        assert_eq!(dest, PathBuf::from("/aosp/prebuilts/bazel/common"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let root = make_root();
        let manifest = SyncManifest::bazel_default();
        save_at(root.path(), &manifest).expect("save");
        let loaded = load_at(root.path()).expect("load");
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn save_cleans_up_tmp() {
        let root = make_root();
        save_at(root.path(), &SyncManifest::bazel_default()).expect("save");
        let tmp = root.path().join("prebuilts.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_or_default_without_file_returns_default() {
        let root = make_root();
        let manifest = load_or_default_at(root.path()).expect("default");
        assert_eq!(manifest, SyncManifest::bazel_default());
    }

    #[test]
    fn init_is_idempotent_unless_forced() {
        let root = make_root();
        let (_, path) = init_at(root.path(), false).expect("init");

        let mut edited = SyncManifest::bazel_default();
        edited.retries = 5;
        save_at(root.path(), &edited).expect("save");

        let (kept, _) = init_at(root.path(), false).expect("second init");
        assert_eq!(kept.retries, 5);

        let (forced, forced_path) = init_at(root.path(), true).expect("forced init");
        assert_eq!(forced.retries, DEFAULT_RETRIES);
        assert_eq!(forced_path, path);
    }

    #[test]
    fn validate_rejects_traversing_destination() {
        let mut manifest = SyncManifest::bazel_default();
        manifest
            .artifacts
            .get_mut(&BatchKey::Platform(PlatformTarget::LinuxX86_64))
            .unwrap()[0]
            .destination = PathBuf::from("../outside/bazel");
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("must be relative"), "got: {err}");
    }

    #[test]
    fn validate_rejects_empty_zip_entries() {
        let mut manifest = SyncManifest::bazel_default();
        manifest.artifacts.insert(
            BatchKey::Common,
            vec![ArtifactSpec {
                name: "java_tools".to_string(),
                source: ArtifactSource::Pinned {
                    url: "https://example.invalid/java_tools.zip".to_string(),
                    sha256: Sha256Hex::parse(&"0".repeat(64)).unwrap(),
                },
                kind: ArtifactKind::Zip {
                    entries: vec![],
                    strip_prefix: None,
                },
                destination: PathBuf::new(),
            }],
        );
        assert!(matches!(
            manifest.validate(),
            Err(ManifestError::Invalid { .. })
        ));
    }

    #[test]
    fn validate_requires_release_placeholder() {
        let mut manifest = SyncManifest::bazel_default();
        manifest.metadata_url = Some("https://example.invalid/latest.json".to_string());
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("{release}"), "got: {err}");
    }

    #[test]
    fn validate_rejects_duplicate_artifact_names() {
        let mut manifest = SyncManifest::bazel_default();
        let key = BatchKey::Platform(PlatformTarget::LinuxX86_64);
        let dup = manifest.artifacts[&key][0].clone();
        manifest.artifacts.get_mut(&key).unwrap().push(dup);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("twice"), "got: {err}");
    }
}
