//! Domain types for prebuilt synchronization.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Manifest-facing types are serializable via serde + serde_yaml.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChecksumFormatError, ManifestError};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A commit hash, version tag, or `latest`, naming one upstream build.
///
/// The value is interpolated into the metadata URL, so separators, whitespace,
/// and parent-directory segments are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseIdentifier(String);

impl ReleaseIdentifier {
    /// Identifier that asks the metadata endpoint for its newest build.
    pub const LATEST: &'static str = "latest";

    pub fn parse(value: &str) -> Result<Self, ManifestError> {
        let invalid = |reason| ManifestError::InvalidRelease {
            value: value.to_owned(),
            reason,
        };
        if value.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.contains(['/', '\\']) {
            return Err(invalid("must not contain path separators"));
        }
        if value.contains("..") {
            return Err(invalid("must not contain '..'"));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid("must not contain whitespace"));
        }
        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_latest(&self) -> bool {
        self.0 == Self::LATEST
    }
}

impl fmt::Display for ReleaseIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ReleaseIdentifier {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReleaseIdentifier {
    type Error = ManifestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReleaseIdentifier> for String {
    fn from(id: ReleaseIdentifier) -> Self {
        id.0
    }
}

/// A lowercase hex SHA-256 digest (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex {
    text: String,
    bytes: [u8; 32],
}

impl Sha256Hex {
    pub fn parse(value: &str) -> Result<Self, ChecksumFormatError> {
        let invalid = || ChecksumFormatError {
            value: value.to_owned(),
        };
        let trimmed = value.trim();
        if trimmed.len() != 64 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(trimmed, &mut bytes).map_err(|_| invalid())?;
        Ok(Self {
            text: trimmed.to_ascii_lowercase(),
            bytes,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The 32 raw digest bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }
}

impl fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.text.fmt(f)
    }
}

impl FromStr for Sha256Hex {
    type Err = ChecksumFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Sha256Hex {
    type Error = ChecksumFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Sha256Hex> for String {
    fn from(digest: Sha256Hex) -> Self {
        digest.text
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// A host platform with its own prebuilt tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlatformTarget {
    #[serde(rename = "linux-x86_64")]
    LinuxX86_64,
    #[serde(rename = "darwin-x86_64")]
    DarwinX86_64,
}

impl PlatformTarget {
    pub fn all() -> &'static [PlatformTarget] {
        &[PlatformTarget::LinuxX86_64, PlatformTarget::DarwinX86_64]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformTarget::LinuxX86_64 => "linux-x86_64",
            PlatformTarget::DarwinX86_64 => "darwin-x86_64",
        }
    }

    /// Section name for this platform in the build metadata document.
    pub fn metadata_key(self) -> &'static str {
        match self {
            PlatformTarget::LinuxX86_64 => "linux",
            PlatformTarget::DarwinX86_64 => "macos",
        }
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux-x86_64" | "linux" => Ok(PlatformTarget::LinuxX86_64),
            "darwin-x86_64" | "darwin" | "macos" => Ok(PlatformTarget::DarwinX86_64),
            other => Err(format!(
                "unknown platform '{other}'; expected: linux-x86_64, darwin-x86_64"
            )),
        }
    }
}

/// One destination tree: a platform tree or the platform-agnostic `common` tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BatchKey {
    Platform(PlatformTarget),
    Common,
}

impl BatchKey {
    pub const COMMON: &'static str = "common";

    pub fn all() -> Vec<BatchKey> {
        let mut keys: Vec<BatchKey> = PlatformTarget::all()
            .iter()
            .copied()
            .map(BatchKey::Platform)
            .collect();
        keys.push(BatchKey::Common);
        keys
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchKey::Platform(p) => p.as_str(),
            BatchKey::Common => Self::COMMON,
        }
    }

    /// Section name for this tree in the build metadata document.
    pub fn metadata_key(self) -> &'static str {
        match self {
            BatchKey::Platform(p) => p.metadata_key(),
            BatchKey::Common => Self::COMMON,
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(Self::COMMON) {
            return Ok(BatchKey::Common);
        }
        s.parse::<PlatformTarget>()
            .map(BatchKey::Platform)
            .map_err(|_| {
                format!("unknown destination '{s}'; expected: linux-x86_64, darwin-x86_64, common")
            })
    }
}

impl TryFrom<String> for BatchKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BatchKey> for String {
    fn from(key: BatchKey) -> Self {
        key.as_str().to_owned()
    }
}

impl From<PlatformTarget> for BatchKey {
    fn from(p: PlatformTarget) -> Self {
        BatchKey::Platform(p)
    }
}

/// Where an artifact's URL and checksum come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Read from the batch's section of the build metadata document.
    Metadata {
        url_field: String,
        checksum_field: String,
    },
    /// Fixed in the manifest.
    Pinned { url: String, sha256: Sha256Hex },
}

/// How a verified artifact lands in its destination tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The download itself is installed, mode 0755.
    Executable,
    /// Only the listed entries are extracted from a zip archive.
    Zip {
        entries: Vec<String>,
        /// Archive-internal prefix removed from each entry name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        strip_prefix: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Manifest entry naming one artifact of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub name: String,
    pub source: ArtifactSource,
    pub kind: ArtifactKind,
    /// Relative to the batch's destination root. A directory prefix for zips.
    #[serde(default)]
    pub destination: PathBuf,
}

/// A fully resolved artifact: where to get it, what it must hash to, where it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub source_url: String,
    pub expected_checksum: Sha256Hex,
    /// Relative to the batch's destination root.
    pub destination_path: PathBuf,
    pub kind: ArtifactKind,
}

/// A downloaded artifact waiting in staging storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub descriptor: ArtifactDescriptor,
    pub local_path: PathBuf,
    pub bytes: u64,
    pub verified: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_identifier_accepts_hash_and_tag() {
        assert!(ReleaseIdentifier::parse("364a867d9f1c3c1fd4a1cb9a4a8f1e0fe4f2f7c1").is_ok());
        assert!(ReleaseIdentifier::parse("7.1.0rc2").is_ok());
        assert!(ReleaseIdentifier::parse("latest").unwrap().is_latest());
    }

    #[test]
    fn release_identifier_rejects_url_breaking_values() {
        for bad in ["", "../etc", "a/b", "a\\b", "with space", "x..y"] {
            let err = ReleaseIdentifier::parse(bad).unwrap_err();
            assert!(
                matches!(err, ManifestError::InvalidRelease { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn sha256_hex_normalizes_case() {
        let upper = "AB".repeat(32);
        let digest = Sha256Hex::parse(&upper).expect("parse");
        assert_eq!(digest.as_str(), "ab".repeat(32));
        assert_eq!(digest.to_bytes(), [0xab; 32]);
    }

    #[test]
    fn sha256_hex_rejects_wrong_length_and_non_hex() {
        assert!(Sha256Hex::parse("abc123").is_err());
        assert!(Sha256Hex::parse(&"g".repeat(64)).is_err());
        // 64 bytes, but not 64 hex digits.
        assert!(Sha256Hex::parse(&"é".repeat(32)).is_err());
    }

    #[test]
    fn sha256_hex_decodes_mixed_case_bytes() {
        let digest = Sha256Hex::parse(&format!("0F{}", "a1".repeat(31))).unwrap();
        let bytes = digest.to_bytes();
        assert_eq!(bytes[0], 0x0f);
        assert_eq!(bytes[31], 0xa1);
        assert_eq!(digest.as_str(), format!("0f{}", "a1".repeat(31)));
    }

    #[test]
    fn batch_key_display_and_parse() {
        assert_eq!(BatchKey::Common.to_string(), "common");
        assert_eq!(
            "darwin-x86_64".parse::<BatchKey>().unwrap(),
            BatchKey::Platform(PlatformTarget::DarwinX86_64)
        );
        assert!("windows".parse::<BatchKey>().is_err());
    }

    #[test]
    fn platform_metadata_keys() {
        assert_eq!(PlatformTarget::LinuxX86_64.metadata_key(), "linux");
        assert_eq!(PlatformTarget::DarwinX86_64.metadata_key(), "macos");
    }

    #[test]
    fn batch_key_orders_platforms_before_common() {
        let mut keys = vec![BatchKey::Common, BatchKey::Platform(PlatformTarget::DarwinX86_64)];
        keys.sort();
        assert_eq!(keys[1], BatchKey::Common);
    }
}
