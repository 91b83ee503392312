//! Content fingerprints for downloaded artifacts.
//!
//! Scanned-book PDFs run to hundreds of megabytes, so the hash is computed by
//! streaming the file through SHA-256 in fixed-size blocks — the whole file is
//! never resident in memory. Hashing is CPU/IO-bound work, so async callers
//! go through [`fingerprint_file`], which offloads to `spawn_blocking`.
//!
//! Fingerprints guard two distinct decisions:
//!
//! * **Reuse** — an already-downloaded file whose hash matches the recorded
//!   one is kept, skipping the network entirely.
//! * **Consumption** — a stage about to read an artifact produced by an
//!   earlier (possibly crashed) run verifies it first, so a partial write
//!   fails the item instead of feeding garbage to the OCR service.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Block size for streaming reads.
const BLOCK_SIZE: usize = 8192;

/// Failure computing a fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The file does not exist.
    #[error("file not found: '{0}'")]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of checking a file against an expected fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// File present and hash matches.
    Valid,
    /// File present but the content differs; the caller should delete the
    /// corrupt copy and fetch a fresh one.
    Mismatch { actual: String },
    /// File absent; the caller should fetch it.
    Missing,
}

/// Compute the SHA-256 fingerprint of a file, streaming in 8 KiB blocks.
pub fn fingerprint(path: &Path) -> Result<String, FingerprintError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FingerprintError::NotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(FingerprintError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let mut hasher = Sha256::new();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        let n = file.read(&mut block).map_err(|e| FingerprintError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Async wrapper around [`fingerprint`] for use inside the pipeline.
pub async fn fingerprint_file(path: &Path) -> Result<String, FingerprintError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint(&path))
        .await
        .unwrap_or_else(|e| {
            Err(FingerprintError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(format!("hashing task panicked: {e}")),
            })
        })
}

/// Check a file against an expected fingerprint.
pub fn verify(path: &Path, expected: &str) -> Result<Verification, FingerprintError> {
    match fingerprint(path) {
        Ok(actual) if actual == expected => Ok(Verification::Valid),
        Ok(actual) => Ok(Verification::Mismatch { actual }),
        Err(FingerprintError::NotFound(_)) => Ok(Verification::Missing),
        Err(e) => Err(e),
    }
}

/// Async wrapper around [`verify`].
pub async fn verify_file(path: &Path, expected: &str) -> Result<Verification, FingerprintError> {
    let path = path.to_path_buf();
    let expected = expected.to_string();
    tokio::task::spawn_blocking(move || verify(&path, &expected))
        .await
        .unwrap_or_else(|e| {
            Err(FingerprintError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other(format!("hashing task panicked: {e}")),
            })
        })
}
