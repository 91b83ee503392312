//! The per-item stage executor — the pipeline's state machine.
//!
//! Each item moves through `download → ocr → convert → replicate`, every
//! stage independently gated on its own recorded status, which is what makes
//! a run resumable at stage granularity: a process killed after OCR restarts
//! straight into convert, and never re-derives completed work.
//!
//! ## Data flow
//!
//! ```text
//! record ──▶ download ──▶ ocr ──▶ convert ──▶ replicate
//!            (fetch +     (job     (pandoc)    (mirror copy)
//!             verify)      API)
//! ```
//!
//! Every stage follows one protocol: check preconditions, mark in-progress
//! and persist, run the adapter under the shared retry policy, validate the
//! adapter's claimed output actually exists, then mark completed (persisting
//! derived fields like the fingerprint or the adapter's authoritative output
//! path) or failed. State reaches disk after *every* transition — the store
//! file is the crash-recovery journal, there is no finer checkpoint.
//!
//! Submodules hold the four stage adapters; this module holds the protocol.

pub mod convert;
pub mod download;
pub mod ocr;
pub mod replicate;

pub use convert::{DocumentConverter, PandocConverter};
pub use download::{ArtifactFetcher, HttpFetcher};
pub use ocr::{ChunkingOcr, HttpOcrService, OcrConfig, OcrEngine};
pub use replicate::{ArtifactKind, MirrorTarget, ReplicationTarget};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::fingerprint::{self, Verification};
use crate::retry::RetryPolicy;
use crate::store::{BookRecord, RecordSet, Stage, StageStatus};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// How one item's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// All four stages are completed.
    Completed,
    /// Some stage failed; the record holds the error message.
    Failed,
}

/// Whether a single stage advanced the item, was already done, or failed it.
enum StageResult {
    Advanced,
    Skipped,
    Failed,
}

/// Drives one item at a time through its stage sequence.
///
/// Holds only borrows: the adapters and config belong to the caller, and the
/// record set is threaded through per call so persistence stays in one place.
pub struct StageExecutor<'a> {
    config: &'a PipelineConfig,
    fetcher: &'a dyn ArtifactFetcher,
    ocr: &'a dyn OcrEngine,
    converter: &'a dyn DocumentConverter,
    replicator: &'a dyn ReplicationTarget,
    retry: RetryPolicy,
    store_path: PathBuf,
    catalog: String,
}

impl<'a> StageExecutor<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        fetcher: &'a dyn ArtifactFetcher,
        ocr: &'a dyn OcrEngine,
        converter: &'a dyn DocumentConverter,
        replicator: &'a dyn ReplicationTarget,
    ) -> Self {
        Self {
            retry: config.retry_policy(),
            store_path: config.state_file(),
            catalog: config.catalog_slug(),
            config,
            fetcher,
            ocr,
            converter,
            replicator,
        }
    }

    /// Run every not-yet-completed stage for the record at `key`.
    ///
    /// Returns `Err` only for run-fatal conditions (state I/O failure,
    /// missing external tool). Per-item failures come back as
    /// [`ItemOutcome::Failed`] with the record already updated and persisted.
    pub async fn process_item(
        &self,
        set: &mut RecordSet,
        key: &str,
    ) -> Result<ItemOutcome, PipelineError> {
        if matches!(self.stage_download(set, key).await?, StageResult::Failed) {
            return Ok(ItemOutcome::Failed);
        }
        if matches!(self.stage_ocr(set, key).await?, StageResult::Failed) {
            return Ok(ItemOutcome::Failed);
        }
        if matches!(self.stage_convert(set, key).await?, StageResult::Failed) {
            return Ok(ItemOutcome::Failed);
        }
        if matches!(self.stage_replicate(set, key).await?, StageResult::Failed) {
            return Ok(ItemOutcome::Failed);
        }
        Ok(ItemOutcome::Completed)
    }

    // ── Stages ───────────────────────────────────────────────────────────

    async fn stage_download(
        &self,
        set: &mut RecordSet,
        key: &str,
    ) -> Result<StageResult, PipelineError> {
        let record = self.snapshot(set, key)?;
        if record.stages.download == StageStatus::Completed {
            return Ok(StageResult::Skipped);
        }

        self.begin(set, key, Stage::Download)?;

        let paths = record.resolve_paths(&self.config.data_dir);
        let strict = self.config.strict_verification;
        let result = self
            .retry
            .run("download", |attempt| {
                let url = record.source_url.clone();
                let dest = paths.raw.clone();
                let expected = record.fingerprint.clone();
                let id = record.id.clone();
                async move {
                    info!("downloading item {id} (attempt {attempt}) from '{url}'");
                    download::fetch_verified(self.fetcher, &url, &dest, expected.as_deref(), strict)
                        .await
                }
            })
            .await;

        match result {
            Ok(hash) => {
                self.complete(set, key, Stage::Download, |r| {
                    r.fingerprint = Some(hash);
                })?;
                Ok(StageResult::Advanced)
            }
            Err(e) => self.settle_failure(set, key, Stage::Download, e),
        }
    }

    async fn stage_ocr(&self, set: &mut RecordSet, key: &str) -> Result<StageResult, PipelineError> {
        let record = self.snapshot(set, key)?;
        if record.stages.ocr == StageStatus::Completed {
            return Ok(StageResult::Skipped);
        }

        let paths = record.resolve_paths(&self.config.data_dir);

        // The scan about to be fed to the OCR service may come from an
        // earlier, possibly interrupted run. Verify before consuming.
        if let Err(msg) = self
            .check_raw_integrity(&paths.raw, record.fingerprint.as_deref())
            .await
        {
            return self.settle_failure(set, key, Stage::Ocr, StageError::precondition(msg));
        }

        self.begin(set, key, Stage::Ocr)?;

        let result = self
            .retry
            .run("ocr", |attempt| {
                let raw = paths.raw.clone();
                let out = paths.text.clone();
                let id = record.id.clone();
                async move {
                    info!("running OCR for item {id} (attempt {attempt})");
                    let produced = self.ocr.recognize(&raw, &out).await?;
                    if !produced.exists() {
                        return Err(StageError::transient(format!(
                            "OCR reported success but '{}' does not exist",
                            produced.display()
                        )));
                    }
                    Ok(produced)
                }
            })
            .await;

        match result {
            Ok(produced) => {
                // The engine's returned path is authoritative; keep it
                // relative so the record stays portable.
                let text_path = self.relativize(produced);
                self.complete(set, key, Stage::Ocr, |r| {
                    r.text_path = text_path;
                })?;
                Ok(StageResult::Advanced)
            }
            Err(e) => self.settle_failure(set, key, Stage::Ocr, e),
        }
    }

    async fn stage_convert(
        &self,
        set: &mut RecordSet,
        key: &str,
    ) -> Result<StageResult, PipelineError> {
        let record = self.snapshot(set, key)?;
        if record.stages.convert == StageStatus::Completed {
            return Ok(StageResult::Skipped);
        }

        let paths = record.resolve_paths(&self.config.data_dir);
        if !paths.text.exists() {
            let msg = format!(
                "text artifact '{}' missing before conversion",
                paths.text.display()
            );
            return self.settle_failure(set, key, Stage::Convert, StageError::precondition(msg));
        }

        self.begin(set, key, Stage::Convert)?;

        let result = self
            .retry
            .run("convert", |attempt| {
                let text = paths.text.clone();
                let out = paths.document.clone();
                let id = record.id.clone();
                async move {
                    info!("converting item {id} to document format (attempt {attempt})");
                    self.converter.convert(&text, &out).await?;
                    if !out.exists() {
                        return Err(StageError::transient(format!(
                            "converter reported success but '{}' does not exist",
                            out.display()
                        )));
                    }
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.complete(set, key, Stage::Convert, |_| {})?;
                Ok(StageResult::Advanced)
            }
            Err(e) => self.settle_failure(set, key, Stage::Convert, e),
        }
    }

    async fn stage_replicate(
        &self,
        set: &mut RecordSet,
        key: &str,
    ) -> Result<StageResult, PipelineError> {
        let record = self.snapshot(set, key)?;
        if record.stages.replicate == StageStatus::Completed {
            return Ok(StageResult::Skipped);
        }

        self.begin(set, key, Stage::Replicate)?;

        let paths = record.resolve_paths(&self.config.data_dir);
        let result = self
            .retry
            .run("replicate", |attempt| {
                let raw = paths.raw.clone();
                let text = paths.text.clone();
                let document = paths.document.clone();
                let id = record.id.clone();
                let catalog = self.catalog.clone();
                async move {
                    info!("replicating item {id} to secondary storage (attempt {attempt})");
                    replicate::replicate_item(
                        self.replicator,
                        &raw,
                        &text,
                        &document,
                        &id,
                        &catalog,
                    )
                    .await
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.complete(set, key, Stage::Replicate, |_| {})?;
                Ok(StageResult::Advanced)
            }
            Err(e) => self.settle_failure(set, key, Stage::Replicate, e),
        }
    }

    // ── Protocol helpers ─────────────────────────────────────────────────

    fn snapshot(&self, set: &RecordSet, key: &str) -> Result<BookRecord, PipelineError> {
        set.get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Internal(format!("no record under key '{key}'")))
    }

    /// Mark a stage in-progress and persist, so an interruption mid-stage is
    /// visible to the next run.
    fn begin(&self, set: &mut RecordSet, key: &str, stage: Stage) -> Result<(), PipelineError> {
        set.update(&self.store_path, key, |r| {
            r.stages.set(stage, StageStatus::InProgress);
        })
    }

    /// Mark a stage completed, apply its derived field updates, persist, and
    /// notify the observer.
    fn complete<F>(
        &self,
        set: &mut RecordSet,
        key: &str,
        stage: Stage,
        apply: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut BookRecord),
    {
        set.update(&self.store_path, key, |r| {
            apply(r);
            r.stages.set(stage, StageStatus::Completed);
        })?;
        if let Some(ref progress) = self.config.progress {
            if let Some(r) = set.get(key) {
                progress.on_stage_complete(&r.id, stage);
            }
        }
        Ok(())
    }

    /// Record a stage failure on the item, or escalate an environment error
    /// to a run-fatal one.
    fn settle_failure(
        &self,
        set: &mut RecordSet,
        key: &str,
        stage: Stage,
        e: StageError,
    ) -> Result<StageResult, PipelineError> {
        if matches!(e, StageError::Environment { .. }) {
            return Err(e.into());
        }

        let message = e.to_string();
        error!("item {key}: {stage} stage failed — {message}");
        set.update(&self.store_path, key, |r| {
            r.stages.set(stage, StageStatus::Failed);
            r.error_message = Some(message);
        })?;
        Ok(StageResult::Failed)
    }

    /// Precondition for consuming the raw scan: present and, when a
    /// fingerprint is recorded, intact. A record without a fingerprint
    /// (hand-edited or pre-fingerprint history) is accepted as-is.
    async fn check_raw_integrity(&self, raw: &Path, expected: Option<&str>) -> Result<(), String> {
        let Some(expected) = expected else {
            return if raw.exists() {
                Ok(())
            } else {
                Err(format!("raw artifact '{}' missing before OCR", raw.display()))
            };
        };

        match fingerprint::verify_file(raw, expected).await {
            Ok(Verification::Valid) => Ok(()),
            Ok(Verification::Mismatch { .. }) => Err(format!(
                "raw artifact '{}' corrupted (hash mismatch) before OCR",
                raw.display()
            )),
            Ok(Verification::Missing) => Err(format!(
                "raw artifact '{}' missing before OCR",
                raw.display()
            )),
            Err(e) => Err(format!("could not verify '{}': {e}", raw.display())),
        }
    }

    /// Strip the data dir from an adapter-reported path so records keep
    /// relative paths; paths outside the data dir are stored verbatim.
    fn relativize(&self, path: PathBuf) -> PathBuf {
        path.strip_prefix(&self.config.data_dir)
            .map(Path::to_path_buf)
            .unwrap_or(path)
    }
}
