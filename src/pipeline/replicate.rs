//! Replicate stage: mirror finished artifacts to secondary storage.
//!
//! The mirror keeps the same `<catalog>/<padded id>/<filename>` shape as the
//! local data directory, with raw scans and processed documents under
//! separate roots. Copies are plain filesystem writes — the secondary
//! location is typically a mounted card or network share — and are never
//! rolled back: a half-replicated item is recorded as failed, but whatever
//! did land stays put for the next attempt to top up.

use crate::error::StageError;
use crate::slug::padded_id;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Which mirror root an artifact belongs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The downloaded scan.
    Raw,
    /// OCR text and converted documents.
    Processed,
}

/// Secondary-storage copy operation.
#[async_trait]
pub trait ReplicationTarget: Send + Sync {
    /// Copy `source` into the mirror layout for `(item id, catalog slug)`.
    /// Returns the destination path written.
    async fn copy(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> Result<PathBuf, StageError>;

    /// Whether the mirror already holds a copy of `source` for this item.
    /// Used for the best-effort raw top-up, which skips work already done.
    async fn contains(&self, source: &Path, kind: ArtifactKind, item_id: &str, catalog: &str)
        -> bool;
}

/// Mirrors into two local directory roots.
pub struct MirrorTarget {
    raw_root: PathBuf,
    processed_root: PathBuf,
}

impl MirrorTarget {
    pub fn new(raw_root: impl Into<PathBuf>, processed_root: impl Into<PathBuf>) -> Self {
        Self {
            raw_root: raw_root.into(),
            processed_root: processed_root.into(),
        }
    }

    /// Both mirror roots under one parent, matching the local layout names.
    pub fn under(root: &Path) -> Self {
        Self::new(
            root.join(crate::layout::RAW_DIR),
            root.join(crate::layout::PROCESSED_DIR),
        )
    }

    fn destination(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> Result<PathBuf, StageError> {
        let file_name = source.file_name().ok_or_else(|| {
            StageError::precondition(format!("'{}' has no file name", source.display()))
        })?;
        let root = match kind {
            ArtifactKind::Raw => &self.raw_root,
            ArtifactKind::Processed => &self.processed_root,
        };
        Ok(root.join(catalog).join(padded_id(item_id)).join(file_name))
    }
}

#[async_trait]
impl ReplicationTarget for MirrorTarget {
    async fn copy(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> Result<PathBuf, StageError> {
        if !source.exists() {
            return Err(StageError::precondition(format!(
                "source '{}' not found for replication",
                source.display()
            )));
        }

        let dest = self.destination(source, kind, item_id, catalog)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("creating '{}': {e}", parent.display())))?;
        }

        tokio::fs::copy(source, &dest)
            .await
            .map_err(|e| {
                StageError::transient(format!(
                    "copying '{}' to '{}': {e}",
                    source.display(),
                    dest.display()
                ))
            })?;

        debug!("replicated '{}' to '{}'", source.display(), dest.display());
        Ok(dest)
    }

    async fn contains(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> bool {
        self.destination(source, kind, item_id, catalog)
            .map(|d| d.exists())
            .unwrap_or(false)
    }
}

/// Replicate everything one finished item produced.
///
/// The text and document copies are required; the raw-scan copy is a
/// best-effort top-up (it normally happened on an earlier run) and its
/// failure only warns. Any required failure names the artifact so the
/// record's error message says exactly what is missing on the mirror.
pub async fn replicate_item(
    target: &dyn ReplicationTarget,
    raw: &Path,
    text: &Path,
    document: &Path,
    item_id: &str,
    catalog: &str,
) -> Result<(), StageError> {
    if !target.contains(raw, ArtifactKind::Raw, item_id, catalog).await {
        if let Err(e) = target.copy(raw, ArtifactKind::Raw, item_id, catalog).await {
            warn!("best-effort raw copy for item {item_id} skipped: {e}");
        }
    }

    target
        .copy(text, ArtifactKind::Processed, item_id, catalog)
        .await
        .map_err(|e| annotate(e, "text artifact not replicated"))?;

    target
        .copy(document, ArtifactKind::Processed, item_id, catalog)
        .await
        .map_err(|e| annotate(e, "document artifact not replicated"))?;

    Ok(())
}

/// Prefix a copy failure with the artifact it concerns, keeping its retry
/// classification intact.
fn annotate(e: StageError, what: &str) -> StageError {
    match e {
        StageError::Transient(detail) => StageError::Transient(format!("{what}: {detail}")),
        StageError::Precondition(detail) => StageError::Precondition(format!("{what}: {detail}")),
        env => env,
    }
}
