//! Progress-observer trait for run, item, and stage events.
//!
//! Inject an `Arc<dyn RunProgress>` via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive events as
//! the pipeline works through the queue. Callbacks are the least-invasive
//! integration point: the CLI forwards them to a terminal progress bar, a
//! host application could forward them to a channel or a status page, and
//! the library never needs to know which.

use crate::pipeline::ItemOutcome;
use crate::store::Stage;
use crate::workflow::RunSummary;
use std::sync::Arc;

/// Called by the orchestrator and stage executor as work proceeds.
///
/// Processing is strictly sequential, so implementations never see
/// overlapping item events; the trait is still `Send + Sync` so one
/// observer can be shared with logging or signal-handling tasks. All
/// methods default to no-ops — implement only what you need.
pub trait RunProgress: Send + Sync {
    /// Called once after the work queue is selected.
    fn on_run_start(&self, total_items: usize) {
        let _ = total_items;
    }

    /// Called before an item's first stage runs. `index` is 1-based.
    fn on_item_start(&self, index: usize, total: usize, id: &str, title: &str) {
        let _ = (index, total, id, title);
    }

    /// Called whenever a stage finishes successfully for an item.
    fn on_stage_complete(&self, id: &str, stage: Stage) {
        let _ = (id, stage);
    }

    /// Called after an item's processing ends, however it ended.
    fn on_item_complete(&self, index: usize, total: usize, id: &str, outcome: ItemOutcome) {
        let _ = (index, total, id, outcome);
    }

    /// Called once after the queue is exhausted, with the final counts.
    fn on_run_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl RunProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressHandle = Arc<dyn RunProgress>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        items: AtomicUsize,
        stages: AtomicUsize,
        completed: AtomicUsize,
    }

    impl RunProgress for Tracking {
        fn on_item_start(&self, _i: usize, _t: usize, _id: &str, _title: &str) {
            self.items.fetch_add(1, Ordering::SeqCst);
        }
        fn on_stage_complete(&self, _id: &str, _stage: Stage) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }
        fn on_item_complete(&self, _i: usize, _t: usize, _id: &str, outcome: ItemOutcome) {
            if outcome == ItemOutcome::Completed {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let p = NoopProgress;
        p.on_run_start(3);
        p.on_item_start(1, 3, "012", "Some Book");
        p.on_stage_complete("012", Stage::Download);
        p.on_item_complete(1, 3, "012", ItemOutcome::Completed);
    }

    #[test]
    fn tracking_receives_events() {
        let t = Tracking::default();
        t.on_item_start(1, 2, "012", "A");
        t.on_stage_complete("012", Stage::Download);
        t.on_stage_complete("012", Stage::Ocr);
        t.on_item_complete(1, 2, "012", ItemOutcome::Completed);
        t.on_item_complete(2, 2, "013", ItemOutcome::Failed);

        assert_eq!(t.items.load(Ordering::SeqCst), 1);
        assert_eq!(t.stages.load(Ordering::SeqCst), 2);
        assert_eq!(t.completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let p: ProgressHandle = Arc::new(NoopProgress);
        p.on_run_start(10);
    }
}
