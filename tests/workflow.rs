//! End-to-end workflow tests with mock stage adapters.
//!
//! These exercise the orchestrator and stage executor against in-memory
//! adapters and a real state file in a temp dir, covering the properties
//! the pipeline is built around: idempotent merge, stage-granular resume,
//! the integrity gate, bounded retries, failure isolation, and
//! no-rollback replication.

use async_trait::async_trait;
use bookmill::{
    fingerprint, process_catalog, reset_incomplete, slug::slugify, ArtifactFetcher, ArtifactKind,
    CatalogSource, DiscoveredItem, DocumentConverter, MirrorTarget, OcrEngine, OverallStatus,
    PipelineAdapters, PipelineConfig, RecordSet, ReplicationTarget, StageError, StageStatus,
};
use bookmill::catalog::CatalogError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

const CATALOG_URL: &str = "https://example.org/php/books.php";

fn test_config(data_dir: &Path) -> PipelineConfig {
    PipelineConfig::builder(CATALOG_URL)
        .data_dir(data_dir)
        .retry_delay(Duration::ZERO)
        .item_pause(Duration::ZERO)
        .build()
        .expect("valid config")
}

fn item(id: &str, title: &str) -> DiscoveredItem {
    DiscoveredItem {
        id: id.into(),
        title: title.into(),
        author: "Some Author".into(),
        title_slug: slugify(title),
        author_slug: "some-author".into(),
        source_url: format!("https://example.org/scans/{id}/index.pdf"),
    }
}

// ── Mock adapters ────────────────────────────────────────────────────────────

struct MemoryCatalog {
    items: Vec<DiscoveredItem>,
    calls: AtomicU32,
}

impl MemoryCatalog {
    fn new(items: Vec<DiscoveredItem>) -> Self {
        Self {
            items,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn discover(&self) -> Result<Vec<DiscoveredItem>, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.clone())
    }

    fn url(&self) -> &str {
        CATALOG_URL
    }
}

/// Writes fixed bytes; fails transiently for URLs containing "bad".
struct MockFetcher {
    calls: AtomicU32,
    bad_calls: AtomicU32,
}

impl MockFetcher {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            bad_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for MockFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("bad") {
            self.bad_calls.fetch_add(1, Ordering::SeqCst);
            return Err(StageError::transient("connection reset by peer"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(dest, format!("scan bytes for {url}")).unwrap();
        Ok(())
    }
}

struct MockOcr {
    calls: AtomicU32,
    fail: bool,
}

impl MockOcr {
    fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: true,
        }
    }
}

#[async_trait]
impl OcrEngine for MockOcr {
    async fn recognize(&self, _pdf: &Path, output: &Path) -> Result<PathBuf, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StageError::transient("OCR job failed: service overloaded"));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(output, "# extracted text\n").unwrap();
        Ok(output.to_path_buf())
    }
}

struct MockConverter {
    calls: AtomicU32,
}

impl MockConverter {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl DocumentConverter for MockConverter {
    async fn convert(&self, _text: &Path, output: &Path) -> Result<(), StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(output, b"document bytes").unwrap();
        Ok(())
    }
}

/// Delegates to a real mirror but refuses to copy documents.
struct DocumentRejectingReplicator {
    inner: MirrorTarget,
}

#[async_trait]
impl ReplicationTarget for DocumentRejectingReplicator {
    async fn copy(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> Result<PathBuf, StageError> {
        if source.extension().and_then(|e| e.to_str()) == Some("docx") {
            return Err(StageError::transient("mirror rejected the write"));
        }
        self.inner.copy(source, kind, item_id, catalog).await
    }

    async fn contains(
        &self,
        source: &Path,
        kind: ArtifactKind,
        item_id: &str,
        catalog: &str,
    ) -> bool {
        self.inner.contains(source, kind, item_id, catalog).await
    }
}

// ── Full success path ────────────────────────────────────────────────────────

#[tokio::test]
async fn single_item_runs_to_completion() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    let catalog = MemoryCatalog::new(vec![item("12", "Atma Vidya Vilasa")]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    let summary = process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .expect("run should succeed");

    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.pending, 0);

    let set = RecordSet::load(&config.state_file()).unwrap();
    let rec = set.get("012").unwrap();
    assert_eq!(rec.status, OverallStatus::Completed);
    assert_eq!(rec.stages.download, StageStatus::Completed);
    assert_eq!(rec.stages.ocr, StageStatus::Completed);
    assert_eq!(rec.stages.convert, StageStatus::Completed);
    assert_eq!(rec.stages.replicate, StageStatus::Completed);
    assert!(rec.fingerprint.is_some(), "download records a fingerprint");
    assert_eq!(rec.error_message, None);

    // Artifacts exist locally and on the mirror, in the slug/id layout.
    let resolved = rec.resolve_paths(dir.path());
    assert!(resolved.raw.exists());
    assert!(resolved.text.exists());
    assert!(resolved.document.exists());
    assert!(config
        .replica_root
        .join("processed_docs/books/012/12_atma-vidya-vilasa_some-author.docx")
        .exists());
    assert!(config
        .replica_root
        .join("raw_pdf/books/012/12_atma-vidya-vilasa_some-author.pdf")
        .exists());
}

// ── Failure isolation & bounded retry ────────────────────────────────────────

#[tokio::test]
async fn transient_failure_retries_three_times_then_moves_on() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    let mut broken = item("1", "Unreachable Book");
    broken.source_url = "https://example.org/bad/1/index.pdf".into();

    let catalog = MemoryCatalog::new(vec![broken, item("2", "Healthy Book")]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    let summary = process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .expect("one bad item must not abort the run");

    assert_eq!(
        fetcher.bad_calls.load(Ordering::SeqCst),
        3,
        "exactly max_attempts tries for the failing download"
    );
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);

    let set = RecordSet::load(&config.state_file()).unwrap();
    let failed = set.get("001").unwrap();
    assert_eq!(failed.status, OverallStatus::Failed);
    assert_eq!(failed.stages.download, StageStatus::Failed);
    let message = failed.error_message.as_deref().unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("connection reset"), "got: {message}");

    // The healthy item was still processed end to end.
    assert_eq!(set.get("002").unwrap().status, OverallStatus::Completed);
}

#[tokio::test]
async fn ocr_success_with_missing_output_counts_as_failure() {
    struct LyingOcr {
        calls: AtomicU32,
    }

    #[async_trait]
    impl OcrEngine for LyingOcr {
        async fn recognize(&self, _pdf: &Path, output: &Path) -> Result<PathBuf, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Claim success without producing the file.
            Ok(output.to_path_buf())
        }
    }

    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    let catalog = MemoryCatalog::new(vec![item("5", "Phantom Output")]);
    let fetcher = MockFetcher::new();
    let ocr = LyingOcr {
        calls: AtomicU32::new(0),
    };
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();

    assert_eq!(ocr.calls.load(Ordering::SeqCst), 3, "claimed successes are retried");
    let set = RecordSet::load(&config.state_file()).unwrap();
    let rec = set.get("005").unwrap();
    assert_eq!(rec.stages.ocr, StageStatus::Failed);
    assert!(rec
        .error_message
        .as_deref()
        .unwrap()
        .contains("does not exist"));
}

// ── Integrity gate ───────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupted_artifact_fails_before_the_ocr_adapter_runs() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    // Seed history: download already completed with a recorded fingerprint.
    let mut set = RecordSet::default();
    set.merge_discovered(&[item("12", "Tampered Book")], "books");
    let raw_abs = {
        let rec = set.books.get_mut("012").unwrap();
        let resolved = rec.resolve_paths(dir.path());
        std::fs::create_dir_all(resolved.raw.parent().unwrap()).unwrap();
        std::fs::write(&resolved.raw, b"original scan bytes").unwrap();
        rec.fingerprint = Some(fingerprint::fingerprint(&resolved.raw).unwrap());
        rec.stages.download = StageStatus::Completed;
        resolved.raw
    };
    set.save(&config.state_file()).unwrap();

    // Flip a byte between download and OCR.
    let mut bytes = std::fs::read(&raw_abs).unwrap();
    bytes[3] ^= 0x01;
    std::fs::write(&raw_abs, &bytes).unwrap();

    let catalog = MemoryCatalog::new(vec![]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();

    assert_eq!(
        ocr.calls.load(Ordering::SeqCst),
        0,
        "precondition must fail the item before the adapter is invoked"
    );
    let set = RecordSet::load(&config.state_file()).unwrap();
    let rec = set.get("012").unwrap();
    assert_eq!(rec.stages.ocr, StageStatus::Failed);
    assert_eq!(rec.status, OverallStatus::Failed);
    assert!(rec
        .error_message
        .as_deref()
        .unwrap()
        .contains("hash mismatch"));
}

// ── Resumability ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn resume_enters_at_the_first_incomplete_stage() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    // Simulate a run killed right after OCR: download + ocr completed,
    // artifacts on disk, convert and replicate untouched.
    let mut set = RecordSet::default();
    set.merge_discovered(&[item("12", "Interrupted Book")], "books");
    {
        let rec = set.books.get_mut("012").unwrap();
        let resolved = rec.resolve_paths(dir.path());
        std::fs::create_dir_all(resolved.raw.parent().unwrap()).unwrap();
        std::fs::write(&resolved.raw, b"scan bytes").unwrap();
        std::fs::create_dir_all(resolved.text.parent().unwrap()).unwrap();
        std::fs::write(&resolved.text, "# extracted text\n").unwrap();
        rec.fingerprint = Some(fingerprint::fingerprint(&resolved.raw).unwrap());
        rec.stages.download = StageStatus::Completed;
        rec.stages.ocr = StageStatus::Completed;
    }
    set.save(&config.state_file()).unwrap();

    let catalog = MemoryCatalog::new(vec![]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    let summary = process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0, "download not redone");
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0, "ocr not redone");
    assert_eq!(converter.calls.load(Ordering::SeqCst), 1, "resumed at convert");
    assert_eq!(summary.completed, 1);

    let set = RecordSet::load(&config.state_file()).unwrap();
    assert_eq!(set.get("012").unwrap().status, OverallStatus::Completed);
}

// ── Partial replication ──────────────────────────────────────────────────────

#[tokio::test]
async fn partial_replication_fails_item_but_keeps_successful_copies() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    let catalog = MemoryCatalog::new(vec![item("12", "Half Mirrored")]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = DocumentRejectingReplicator {
        inner: MirrorTarget::under(&config.replica_root),
    };

    let summary = process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.failed, 1);

    let set = RecordSet::load(&config.state_file()).unwrap();
    let rec = set.get("012").unwrap();
    assert_eq!(rec.stages.replicate, StageStatus::Failed);
    assert_eq!(rec.status, OverallStatus::Failed);
    assert!(
        rec.error_message
            .as_deref()
            .unwrap()
            .contains("document artifact"),
        "the missing artifact is named"
    );

    // The copy that succeeded stays on the mirror — no rollback.
    assert!(config
        .replica_root
        .join("processed_docs/books/012/12_half-mirrored_some-author.md")
        .exists());
    assert!(!config
        .replica_root
        .join("processed_docs/books/012/12_half-mirrored_some-author.docx")
        .exists());
}

// ── Merge & reset across runs ────────────────────────────────────────────────

#[tokio::test]
async fn rescans_do_not_duplicate_or_clobber_history() {
    let dir = tempfile::TempDir::new().unwrap();
    let base = test_config(dir.path());

    let catalog = MemoryCatalog::new(vec![item("12", "Stable Book")]);
    let fetcher = MockFetcher::new();
    let ocr = MockOcr::ok();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&base.replica_root);
    let adapters = PipelineAdapters {
        catalog: &catalog,
        fetcher: &fetcher,
        ocr: &ocr,
        converter: &converter,
        replicator: &replicator,
    };

    process_catalog(&base, &adapters).await.unwrap();
    let after_first = RecordSet::load(&base.state_file()).unwrap();

    // Second run with a forced rescan of the same listing.
    let rescan_config = PipelineConfig::builder(CATALOG_URL)
        .data_dir(dir.path())
        .retry_delay(Duration::ZERO)
        .item_pause(Duration::ZERO)
        .rescan(true)
        .build()
        .unwrap();
    let summary = process_catalog(&rescan_config, &adapters).await.unwrap();

    assert_eq!(summary.discovered, 1, "no duplicate records");
    assert_eq!(summary.processed, 0, "completed item not requeued");

    let after_second = RecordSet::load(&base.state_file()).unwrap();
    assert_eq!(
        after_second.get("012").unwrap(),
        after_first.get("012").unwrap(),
        "no field drift from the idempotent merge"
    );
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 1, "work not redone");
    assert_eq!(
        catalog.calls.load(Ordering::SeqCst),
        2,
        "first run scrapes (empty history), second only because of --rescan"
    );
}

#[tokio::test]
async fn reset_failed_items_lets_a_later_run_retry_them() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(dir.path());

    // First run: OCR always fails, item ends failed with download done.
    let catalog = MemoryCatalog::new(vec![item("12", "Second Chance")]);
    let fetcher = MockFetcher::new();
    let failing_ocr = MockOcr::failing();
    let converter = MockConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &failing_ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();
    assert_eq!(
        RecordSet::load(&config.state_file())
            .unwrap()
            .get("012")
            .unwrap()
            .status,
        OverallStatus::Failed
    );

    // Operator resets, then a healthier run picks the item up again.
    let touched = reset_incomplete(&config).unwrap();
    assert_eq!(touched, 1);

    let healthy_ocr = MockOcr::ok();
    let summary = process_catalog(
        &config,
        &PipelineAdapters {
            catalog: &catalog,
            fetcher: &fetcher,
            ocr: &healthy_ocr,
            converter: &converter,
            replicator: &replicator,
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        fetcher.calls.load(Ordering::SeqCst),
        1,
        "download was kept across the reset"
    );
}
