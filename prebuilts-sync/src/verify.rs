//! SHA-256 verification of staged downloads.
//!
//! A mismatch is always an error; there is no warning-only mode.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use prebuilts_core::types::{Sha256Hex, StagedArtifact};

use crate::cancel::CancelToken;
use crate::error::{io_err, SyncError};

/// Chunk size for reading files during hashing (1MB)
const CHUNK_SIZE: usize = 1024 * 1024;

/// SHA-256 of the whole file, checking `cancel` between chunks.
pub fn hash_file(path: &Path, cancel: &CancelToken) -> Result<[u8; 32], SyncError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        cancel.check()?;
        let n = file.read(&mut buffer).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Lowercase hex SHA-256 of the whole file.
pub fn hash_file_hex(path: &Path, cancel: &CancelToken) -> Result<String, SyncError> {
    hash_file(path, cancel).map(hex::encode)
}

/// Constant-time digest comparison.
pub fn digests_match(actual: &[u8; 32], expected: &[u8; 32]) -> bool {
    bool::from(actual[..].ct_eq(&expected[..]))
}

/// Verify `path` against `expected`, failing with [`SyncError::ChecksumMismatch`].
pub fn verify(
    path: &Path,
    expected: &Sha256Hex,
    artifact: &str,
    cancel: &CancelToken,
) -> Result<(), SyncError> {
    let actual = hash_file(path, cancel)?;
    if !digests_match(&actual, &expected.to_bytes()) {
        return Err(SyncError::ChecksumMismatch {
            artifact: artifact.to_string(),
            expected: expected.to_string(),
            actual: hex::encode(actual),
        });
    }
    Ok(())
}

/// Verify a staged artifact and mark it verified on success.
pub fn verify_staged(staged: &mut StagedArtifact, cancel: &CancelToken) -> Result<(), SyncError> {
    staged.verified = false;
    verify(
        &staged.local_path,
        &staged.descriptor.expected_checksum,
        &staged.descriptor.name,
        cancel,
    )?;
    staged.verified = true;
    tracing::debug!(
        artifact = %staged.descriptor.name,
        sha256 = %staged.descriptor.expected_checksum,
        "checksum verified"
    );
    Ok(())
}
