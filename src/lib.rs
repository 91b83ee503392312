//! # bookmill
//!
//! Turn a catalog of scanned-book PDFs into distributable documents, and
//! mirror the results to secondary storage — resumably.
//!
//! ## Why this crate?
//!
//! Digitizing a catalog of scanned books is a long-haul batch job: hundreds
//! of large downloads, OCR jobs that take minutes each, and flaky links in
//! between. What makes or breaks such a job is not any single step but the
//! bookkeeping around them — the ability to kill the process at any moment
//! and restart it without redoing finished work or corrupting what's on
//! disk. bookmill keeps a durable per-item record of every stage, verifies
//! artifact integrity before reusing or consuming anything, retries
//! transient failures a bounded number of times, and isolates one item's
//! failure from the rest of the run.
//!
//! ## Pipeline Overview
//!
//! ```text
//! catalog listing
//!  │
//!  ├─ 1. Discover   scrape item ids, titles, download links
//!  ├─ 2. Merge      reconcile with history (never clobbers progress)
//!  ├─ 3. Download   fetch the scan, fingerprint + verify (per item)
//!  ├─ 4. OCR        external digitization service, chunked for big books
//!  ├─ 5. Convert    text → document via pandoc
//!  └─ 6. Replicate  mirror artifacts to secondary storage
//! ```
//!
//! Steps 3–6 run per item, strictly sequentially, each gated on its own
//! persisted status — the state file under the data dir is the single
//! source of truth and is rewritten atomically after every transition.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bookmill::{
//!     process_catalog, ChunkingOcr, HttpCatalogSource, HttpFetcher, HttpOcrService,
//!     MirrorTarget, OcrConfig, PandocConverter, PipelineAdapters, PipelineConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder("https://example.org/php/books.php")
//!         .data_dir("/var/lib/bookmill")
//!         .build()?;
//!
//!     let catalog = HttpCatalogSource::new(&config.catalog_url);
//!     let fetcher = HttpFetcher::new();
//!     let ocr = ChunkingOcr::new(
//!         HttpOcrService::new(OcrConfig::new(
//!             "https://api.example.com/doc-digitization/job/v1",
//!             std::env::var("OCR_API_KEY")?,
//!             "kn-IN",
//!         )),
//!         200,
//!     );
//!     let converter = PandocConverter::new();
//!     let replicator = MirrorTarget::under(&config.replica_root);
//!
//!     let summary = process_catalog(
//!         &config,
//!         &PipelineAdapters {
//!             catalog: &catalog,
//!             fetcher: &fetcher,
//!             ocr: &ocr,
//!             converter: &converter,
//!             replicator: &replicator,
//!         },
//!     )
//!     .await?;
//!
//!     eprintln!(
//!         "{} completed / {} failed / {} pending",
//!         summary.completed, summary.failed, summary.pending
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bookmill` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bookmill = { version = "0.3", default-features = false }
//! ```
//!
//! ## Operational constraint
//!
//! The state file has no locking: exactly one bookmill process may own a
//! data dir at a time. Run two and they will race each other's rewrites.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod layout;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod slug;
pub mod store;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{CatalogSource, DiscoveredItem, HttpCatalogSource};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{PipelineError, StageError};
pub use pipeline::{
    ArtifactFetcher, ArtifactKind, ChunkingOcr, DocumentConverter, HttpFetcher, HttpOcrService,
    ItemOutcome, MirrorTarget, OcrConfig, OcrEngine, PandocConverter, ReplicationTarget,
    StageExecutor,
};
pub use progress::{NoopProgress, ProgressHandle, RunProgress};
pub use retry::RetryPolicy;
pub use store::{BookRecord, OverallStatus, RecordSet, Stage, StageStatus};
pub use workflow::{process_catalog, reset_incomplete, PipelineAdapters, RunSummary};
