//! The workflow orchestrator: reconcile the catalog with history, then
//! drive processing.
//!
//! Ordering matters for crash safety and is deliberate:
//!
//! 1. load existing records (or start empty)
//! 2. scrape — only when forced or when there is no history, a staleness/
//!    cost trade-off, not a correctness requirement
//! 3. merge and **persist immediately**, before any stage runs, so a crash
//!    during scraping can never lose prior history
//! 4. preflight the environment (converter tool) — fail the run early
//!    rather than on item one
//! 5. select the queue (everything not completed, optionally limited) and
//!    run the stage executor per item, with a fixed pause between items to
//!    keep the external services comfortable
//! 6. reload the store and report counts
//!
//! The record store file is exclusively owned by this process for the run's
//! duration; there is no file locking, so running two instances against the
//! same data dir is an operator error.

use crate::catalog::CatalogSource;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{
    ArtifactFetcher, DocumentConverter, ItemOutcome, OcrEngine, ReplicationTarget, StageExecutor,
};
use crate::store::RecordSet;
use tokio::time::sleep;
use tracing::{info, warn};

/// The external collaborators one run needs, behind their trait seams.
pub struct PipelineAdapters<'a> {
    pub catalog: &'a dyn CatalogSource,
    pub fetcher: &'a dyn ArtifactFetcher,
    pub ocr: &'a dyn OcrEngine,
    pub converter: &'a dyn DocumentConverter,
    pub replicator: &'a dyn ReplicationTarget,
}

/// Final counts for a run. `pending` includes in-flight records, i.e.
/// everything a future run would pick up again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Records known after the merge.
    pub discovered: usize,
    /// Items the queue selected this run.
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Run the whole workflow for one catalog.
///
/// Individual item failures never fail the run; they are counted in the
/// summary and recorded on the items. `Err` means the run itself could not
/// proceed (corrupt state, unreachable catalog with no history, missing
/// converter tool, state-file I/O).
pub async fn process_catalog(
    config: &PipelineConfig,
    adapters: &PipelineAdapters<'_>,
) -> Result<RunSummary, PipelineError> {
    let state_path = config.state_file();
    let catalog_slug = config.catalog_slug();
    let mut set = RecordSet::load(&state_path)?;
    info!(
        "loaded {} records from '{}'",
        set.books.len(),
        state_path.display()
    );

    // ── Discover & merge ─────────────────────────────────────────────────
    if config.rescan || set.books.is_empty() {
        info!("scraping catalog '{}'", config.catalog_url);
        match adapters.catalog.discover().await {
            Ok(items) => {
                let stats = set.merge_discovered(&items, &catalog_slug);
                info!(
                    "catalog scan: {} items observed, {} new, {} refreshed",
                    items.len(),
                    stats.added,
                    stats.refreshed
                );
                set.save(&state_path)?;
            }
            Err(e) if set.books.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!("catalog fetch failed ({e}); continuing with existing history");
            }
        }
    } else {
        info!("skipping catalog scrape; using existing metadata (pass --rescan to force)");
    }

    // ── Environment preflight ────────────────────────────────────────────
    adapters
        .converter
        .ensure_available()
        .await
        .map_err(PipelineError::from)?;

    // ── Process the queue ────────────────────────────────────────────────
    let queue = set.work_queue(config.limit);
    info!("{} items need work", queue.len());
    if let Some(ref progress) = config.progress {
        progress.on_run_start(queue.len());
    }

    let executor = StageExecutor::new(
        config,
        adapters.fetcher,
        adapters.ocr,
        adapters.converter,
        adapters.replicator,
    );

    let total = queue.len();
    for (index, key) in queue.iter().enumerate() {
        let (id, title) = match set.get(key) {
            Some(r) => (r.id.clone(), r.title.clone()),
            None => continue,
        };
        info!("processing item {}/{total}: id={id} '{title}'", index + 1);
        if let Some(ref progress) = config.progress {
            progress.on_item_start(index + 1, total, &id, &title);
        }

        let outcome = executor.process_item(&mut set, key).await?;
        match outcome {
            ItemOutcome::Completed => info!("item {id} completed"),
            ItemOutcome::Failed => warn!("item {id} failed; continuing with the next item"),
        }
        if let Some(ref progress) = config.progress {
            progress.on_item_complete(index + 1, total, &id, outcome);
        }

        // Throttle between items so the external services aren't hammered.
        if index + 1 < total {
            sleep(config.item_pause).await;
        }
    }

    // ── Summarize from disk, the source of truth ─────────────────────────
    let final_set = RecordSet::load(&state_path)?;
    let counts = final_set.counts();
    let summary = RunSummary {
        discovered: final_set.books.len(),
        processed: total,
        completed: counts.completed,
        failed: counts.failed,
        pending: counts.pending,
    };

    info!(
        "run finished: {} completed, {} failed, {} pending",
        summary.completed, summary.failed, summary.pending
    );
    if let Some(ref progress) = config.progress {
        progress.on_run_complete(&summary);
    }

    Ok(summary)
}

/// Reset failed and in-flight records back to pending, clearing error
/// messages, so a later run retries them. Returns how many records changed.
pub fn reset_incomplete(config: &PipelineConfig) -> Result<usize, PipelineError> {
    let state_path = config.state_file();
    let mut set = RecordSet::load(&state_path)?;
    let touched = set.reset_incomplete();
    if touched > 0 {
        set.save(&state_path)?;
    }
    info!("reset {touched} records to pending");
    Ok(touched)
}
