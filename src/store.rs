//! Durable item records: one JSON document per catalog.
//!
//! The record store is the single source of truth for pipeline progress. It
//! is loaded whole, mutated in memory, and rewritten whole — atomically, via
//! a temp file and rename — after every mutating step, so a crash at any
//! point leaves the last successfully written state intact. The file is
//! pretty-printed JSON with records keyed in stable order, which keeps diffs
//! readable and lets an operator hand-edit a record (e.g. reset a status) for
//! manual recovery.
//!
//! ## Merge policy
//!
//! When a rescan observes an item that already has a record, fields are
//! reconciled by an explicit per-field rule rather than ad hoc conditionals:
//!
//! | field                              | rule          |
//! |------------------------------------|---------------|
//! | `title`, `author`, `source_url`    | refresh       |
//! | `raw_path`, `text_path`, `document_path` | recompute (from *resolved* slugs) |
//! | `title_slug`, `author_slug`        | fill if empty |
//! | `fingerprint`, `stages`, `status`, `error_message` | preserve |
//!
//! Slugs are preserved once set because they may have been derived by an
//! expensive transliteration step (or corrected by hand); paths are always
//! recomputed, but from the preserved slugs, so they stay stable across runs.

use crate::catalog::DiscoveredItem;
use crate::error::PipelineError;
use crate::layout::{self, ArtifactPaths};
use crate::slug::padded_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

// ── Stages ───────────────────────────────────────────────────────────────

/// The four ordered stages every item passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Ocr,
    Convert,
    Replicate,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Ocr, Stage::Convert, Stage::Replicate];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Download => "download",
            Stage::Ocr => "ocr",
            Stage::Convert => "convert",
            Stage::Replicate => "replicate",
        };
        f.write_str(name)
    }
}

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Item-level status, derived from the stage map (see
/// [`BookRecord::recompute_status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One status slot per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageStatuses {
    pub download: StageStatus,
    pub ocr: StageStatus,
    pub convert: StageStatus,
    pub replicate: StageStatus,
}

impl StageStatuses {
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Download => self.download,
            Stage::Ocr => self.ocr,
            Stage::Convert => self.convert,
            Stage::Replicate => self.replicate,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Download => self.download = status,
            Stage::Ocr => self.ocr = status,
            Stage::Convert => self.convert = status,
            Stage::Replicate => self.replicate = status,
        }
    }

    fn iter(&self) -> impl Iterator<Item = StageStatus> {
        [self.download, self.ocr, self.convert, self.replicate].into_iter()
    }
}

// ── Records ──────────────────────────────────────────────────────────────

/// One catalog entry — the unit of work and of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Stable identifier extracted from the catalog listing. Never changes
    /// once assigned.
    pub id: String,

    /// Title and author as scraped; refreshed on every rescan.
    pub title: String,
    #[serde(default)]
    pub author: String,

    /// Derived filename slugs; preserved once non-empty.
    #[serde(default)]
    pub title_slug: String,
    #[serde(default)]
    pub author_slug: String,

    /// Absolute download URL for the scan.
    pub source_url: String,

    /// Artifact locations, relative to the data directory.
    pub raw_path: PathBuf,
    pub text_path: PathBuf,
    pub document_path: PathBuf,

    /// SHA-256 of the downloaded scan; set after a successful download,
    /// never backdated.
    #[serde(default)]
    pub fingerprint: Option<String>,

    #[serde(default)]
    pub stages: StageStatuses,

    #[serde(default)]
    pub status: OverallStatus,

    /// Last fatal error for this item; cleared when the item is reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BookRecord {
    /// Build a fresh record for a newly discovered item.
    fn from_discovered(item: &DiscoveredItem, catalog: &str) -> Self {
        let paths = layout::artifact_paths(&item.id, &item.title_slug, &item.author_slug, catalog);
        BookRecord {
            id: item.id.clone(),
            title: item.title.clone(),
            author: item.author.clone(),
            title_slug: item.title_slug.clone(),
            author_slug: item.author_slug.clone(),
            source_url: item.source_url.clone(),
            raw_path: paths.raw,
            text_path: paths.text,
            document_path: paths.document,
            fingerprint: None,
            stages: StageStatuses::default(),
            status: OverallStatus::Pending,
            error_message: None,
        }
    }

    /// Apply the merge policy for a rescan of an existing record.
    fn refresh_from(&mut self, item: &DiscoveredItem, catalog: &str) {
        // fill-if-empty: slugs survive unless they were never derived
        if self.title_slug.is_empty() {
            self.title_slug = item.title_slug.clone();
        }
        if self.author_slug.is_empty() {
            self.author_slug = item.author_slug.clone();
        }

        // refresh: display metadata and source location
        self.title = item.title.clone();
        self.author = item.author.clone();
        self.source_url = item.source_url.clone();

        // recompute: paths from the *resolved* slugs, keeping history stable
        let paths = layout::artifact_paths(&self.id, &self.title_slug, &self.author_slug, catalog);
        self.raw_path = paths.raw;
        self.text_path = paths.text;
        self.document_path = paths.document;

        // preserve: fingerprint, stages, status, error_message
    }

    /// Derive the item status from the stage map: `Failed` dominates,
    /// `Completed` requires every stage, `Pending` means nothing has started,
    /// anything else is work in flight.
    pub fn recompute_status(&mut self) {
        self.status = if self.stages.iter().any(|s| s == StageStatus::Failed) {
            OverallStatus::Failed
        } else if self.stages.iter().all(|s| s == StageStatus::Completed) {
            OverallStatus::Completed
        } else if self.stages.iter().all(|s| s == StageStatus::Pending) {
            OverallStatus::Pending
        } else {
            OverallStatus::InProgress
        };
    }

    /// Absolutize the stored relative paths against the data directory.
    /// In-memory only — resolved paths are never persisted.
    pub fn resolve_paths(&self, data_dir: &Path) -> ArtifactPaths {
        ArtifactPaths {
            raw: data_dir.join(&self.raw_path),
            text: data_dir.join(&self.text_path),
            document: data_dir.join(&self.document_path),
        }
    }

    /// Reset a not-yet-finished item back to a clean pending slate,
    /// clearing its error. Completed stages are kept — the point of a reset
    /// is to retry the failed tail, not to redo verified work.
    fn reset_incomplete_stages(&mut self) {
        for stage in Stage::ALL {
            if self.stages.get(stage) != StageStatus::Completed {
                self.stages.set(stage, StageStatus::Pending);
            }
        }
        self.error_message = None;
        self.recompute_status();
    }
}

// ── Record set ───────────────────────────────────────────────────────────

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    /// Pending plus in-progress: everything a future run would pick up.
    pub pending: usize,
}

/// Outcome of merging freshly scraped items into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    pub added: usize,
    pub refreshed: usize,
}

/// All records for one catalog, keyed by zero-padded id for stable ordering
/// that matches the on-disk directory naming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSet {
    pub books: BTreeMap<String, BookRecord>,
}

impl RecordSet {
    /// The map key for an item id.
    pub fn key_for(id: &str) -> String {
        padded_id(id)
    }

    /// Load the record set, or an empty one if the file does not exist yet.
    /// A file that exists but cannot be parsed is a fatal error — silently
    /// starting fresh would destroy history.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RecordSet::default());
            }
            Err(e) => {
                return Err(PipelineError::StateIo {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&raw).map_err(|e| PipelineError::StateCorrupt {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Atomically rewrite the store: serialize to a sibling temp file, then
    /// rename over the target. Also re-derives every item status so the
    /// persisted `status` field can never drift from the stage map.
    pub fn save(&mut self, path: &Path) -> Result<(), PipelineError> {
        for record in self.books.values_mut() {
            record.recompute_status();
        }

        let json = serde_json::to_string_pretty(&self).map_err(|e| PipelineError::Internal(
            format!("failed to serialize record set: {e}"),
        ))?;

        let io_err = |source| PipelineError::StateIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| PipelineError::StateIo {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Mutate one record and persist the whole set in a single step. Used by
    /// the stage executor so no state transition can be observed in memory
    /// without also reaching disk.
    pub fn update<F>(&mut self, path: &Path, key: &str, f: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut BookRecord),
    {
        if let Some(record) = self.books.get_mut(key) {
            f(record);
            record.recompute_status();
        }
        self.save(path)
    }

    pub fn get(&self, key: &str) -> Option<&BookRecord> {
        self.books.get(key)
    }

    /// Merge freshly discovered items. Idempotent: merging the same input
    /// twice adds nothing and changes no field the policy doesn't refresh.
    pub fn merge_discovered(&mut self, items: &[DiscoveredItem], catalog: &str) -> MergeStats {
        let mut stats = MergeStats::default();

        for item in items {
            let key = Self::key_for(&item.id);
            match self.books.get_mut(&key) {
                Some(existing) => {
                    existing.refresh_from(item, catalog);
                    stats.refreshed += 1;
                }
                None => {
                    self.books
                        .insert(key, BookRecord::from_discovered(item, catalog));
                    stats.added += 1;
                }
            }
        }

        stats
    }

    /// Keys of all records still needing work, in store order, optionally
    /// truncated to an operator-supplied limit.
    pub fn work_queue(&self, limit: Option<usize>) -> Vec<String> {
        let keys = self
            .books
            .iter()
            .filter(|(_, r)| r.status != OverallStatus::Completed)
            .map(|(k, _)| k.clone());
        match limit {
            Some(n) => keys.take(n).collect(),
            None => keys.collect(),
        }
    }

    /// Reset every failed or in-flight record back to pending, clearing
    /// error messages. Returns how many records were touched.
    pub fn reset_incomplete(&mut self) -> usize {
        let mut reset = 0;
        for record in self.books.values_mut() {
            if matches!(
                record.status,
                OverallStatus::Failed | OverallStatus::InProgress
            ) {
                record.reset_incomplete_stages();
                reset += 1;
            }
        }
        reset
    }

    /// Tally item statuses for the run summary.
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.books.values() {
            match record.status {
                OverallStatus::Completed => counts.completed += 1,
                OverallStatus::Failed => counts.failed += 1,
                OverallStatus::Pending | OverallStatus::InProgress => counts.pending += 1,
            }
        }
        counts
    }
}
