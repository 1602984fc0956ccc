//! Roundtrip serialisation tests for `prebuilts-core` manifest types.
//!
//! Each `#[case]` is isolated: no shared state.

use prebuilts_core::types::{
    ArtifactKind, ArtifactSource, ArtifactSpec, BatchKey, PlatformTarget, ReleaseIdentifier,
    Sha256Hex,
};
use prebuilts_core::SyncManifest;
use rstest::rstest;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn pinned_zip() -> ArtifactSpec {
    ArtifactSpec {
        name: "java_tools".to_string(),
        source: ArtifactSource::Pinned {
            url: "https://mirror.example/java_tools_linux-v12.3.zip".to_string(),
            sha256: Sha256Hex::parse(&"0f".repeat(32)).expect("digest"),
        },
        kind: ArtifactKind::Zip {
            entries: vec![
                "java_tools/JavaBuilder_deploy.jar".to_string(),
                "java_tools/turbine_direct_binary_deploy.jar".to_string(),
            ],
            strip_prefix: Some("java_tools/".to_string()),
        },
        destination: PathBuf::from("remote_java_tools"),
    }
}

fn metadata_executable() -> ArtifactSpec {
    ArtifactSpec {
        name: "bazel_nojdk".to_string(),
        source: ArtifactSource::Metadata {
            url_field: "nojdk_url".to_string(),
            checksum_field: "nojdk_sha256".to_string(),
        },
        kind: ArtifactKind::Executable,
        destination: PathBuf::from("bazel_nojdk"),
    }
}

fn zip_without_prefix() -> ArtifactSpec {
    ArtifactSpec {
        name: "jdk_tools".to_string(),
        source: ArtifactSource::Pinned {
            url: "https://mirror.example/tools.zip".to_string(),
            sha256: Sha256Hex::parse(&"ab".repeat(32)).expect("digest"),
        },
        kind: ArtifactKind::Zip {
            entries: vec!["lib/tools.jar".to_string()],
            strip_prefix: None,
        },
        destination: PathBuf::new(),
    }
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("pinned_zip", pinned_zip())]
#[case("metadata_executable", metadata_executable())]
#[case("zip_without_prefix", zip_without_prefix())]
fn artifact_spec_roundtrip(#[case] label: &str, #[case] spec: ArtifactSpec) {
    let yaml = serde_yaml::to_string(&spec)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: ArtifactSpec = serde_yaml::from_str(&yaml)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(spec, back, "[{label}]");
}

#[test]
fn manifest_roundtrip_with_common_batch() {
    let mut manifest = SyncManifest::bazel_default();
    manifest.artifacts.insert(BatchKey::Common, vec![pinned_zip()]);
    let yaml = serde_yaml::to_string(&manifest).expect("serialize");
    let back: SyncManifest = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(manifest, back);
    back.validate().expect("valid after roundtrip");
}

// ---------------------------------------------------------------------------
// Key roundtrips (all BatchKey variants)
// ---------------------------------------------------------------------------

#[rstest]
#[case(BatchKey::Platform(PlatformTarget::LinuxX86_64), "linux-x86_64")]
#[case(BatchKey::Platform(PlatformTarget::DarwinX86_64), "darwin-x86_64")]
#[case(BatchKey::Common, "common")]
fn batch_key_roundtrip(#[case] key: BatchKey, #[case] text: &str) {
    let yaml = serde_yaml::to_string(&key).expect("serialize");
    assert_eq!(yaml.trim(), text);
    let back: BatchKey = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(key, back);
}

#[rstest]
#[case("364a867d9f1c3c1fd4a1cb9a4a8f1e0fe4f2f7c1")]
#[case("7.0.0-pre.20230530.3")]
#[case("latest")]
fn release_identifier_roundtrip(#[case] text: &str) {
    let id = ReleaseIdentifier::parse(text).expect("parse");
    let yaml = serde_yaml::to_string(&id).expect("serialize");
    let back: ReleaseIdentifier = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(id, back);
}

#[test]
fn release_identifier_deserialize_rejects_traversal() {
    let err = serde_yaml::from_str::<ReleaseIdentifier>("../../etc").unwrap_err();
    assert!(err.to_string().contains("path separators"), "got: {err}");
}
