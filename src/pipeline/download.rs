//! Download stage: bring the raw scan to local disk, verified.
//!
//! The interesting part is not the HTTP GET but the reuse decision around it.
//! A prior run may have left a complete file, a truncated file from a crash
//! mid-write, or a file from before fingerprints were recorded. The policy:
//!
//! * recorded fingerprint matches → reuse, no network
//! * recorded fingerprint mismatches → delete the corrupt copy, refetch
//! * no recorded fingerprint → adopt the file and record its hash, unless
//!   strict verification is on, in which case refetch
//!
//! Bodies are streamed straight to disk; scanned books are far too large to
//! buffer in memory.

use crate::error::StageError;
use crate::fingerprint::{self, Verification};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Transport seam for the download stage.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch `url` into `dest`, creating parent directories as needed.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), StageError>;
}

/// HTTP implementation streaming the response body to disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(300))
    }

    /// `timeout` bounds the whole transfer, not just the connect.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), StageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("download of '{url}' failed: {e}")))?;

        if !response.status().is_success() {
            return Err(StageError::transient(format!(
                "download of '{url}' failed: HTTP {}",
                response.status()
            )));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("creating '{}': {e}", parent.display())))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| StageError::transient(format!("creating '{}': {e}", dest.display())))?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| StageError::transient(format!("reading '{url}': {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StageError::transient(format!("writing '{}': {e}", dest.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| StageError::transient(format!("flushing '{}': {e}", dest.display())))?;

        Ok(())
    }
}

/// One download attempt, including the reuse decision and post-fetch hashing.
/// Returns the fingerprint of the file now on disk.
pub async fn fetch_verified(
    fetcher: &dyn ArtifactFetcher,
    url: &str,
    dest: &Path,
    expected: Option<&str>,
    strict: bool,
) -> Result<String, StageError> {
    if dest.exists() {
        match expected {
            Some(exp) => match fingerprint::verify_file(dest, exp).await.map_err(hash_err)? {
                Verification::Valid => {
                    info!("reusing verified artifact at '{}'", dest.display());
                    return Ok(exp.to_string());
                }
                Verification::Mismatch { .. } => {
                    warn!(
                        "artifact at '{}' is corrupt (hash mismatch); removing and re-downloading",
                        dest.display()
                    );
                    remove_existing(dest).await?;
                }
                Verification::Missing => {}
            },
            None if !strict => {
                // Legacy file from before hashes were recorded: trust it,
                // but record what we found so later stages can verify.
                match fingerprint::fingerprint_file(dest).await {
                    Ok(hash) => {
                        info!(
                            "adopting existing artifact at '{}' with no recorded hash",
                            dest.display()
                        );
                        return Ok(hash);
                    }
                    Err(e) => {
                        warn!("could not hash existing '{}': {e}; re-downloading", dest.display());
                        remove_existing(dest).await?;
                    }
                }
            }
            None => {
                info!(
                    "strict verification: refusing to trust unverified '{}'; re-downloading",
                    dest.display()
                );
                remove_existing(dest).await?;
            }
        }
    }

    fetcher.fetch(url, dest).await?;

    // A fetcher that reports success without producing the file is treated
    // as a transient failure, same as a short read.
    if !dest.exists() {
        return Err(StageError::transient(format!(
            "download reported success but '{}' does not exist",
            dest.display()
        )));
    }

    fingerprint::fingerprint_file(dest).await.map_err(hash_err)
}

async fn remove_existing(path: &Path) -> Result<(), StageError> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| StageError::transient(format!("removing '{}': {e}", path.display())))
}

fn hash_err(e: fingerprint::FingerprintError) -> StageError {
    StageError::transient(e.to_string())
}
