//! Error types for the bookmill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (corrupt
//!   state file, missing external tool, invalid configuration). Returned as
//!   `Err(PipelineError)` from the top-level workflow functions.
//!
//! * [`StageError`] — **Per-item**: one stage of one book failed. Stored on
//!   the book's record as an error message so the run can continue with the
//!   next item rather than losing the whole batch to one bad book.
//!
//! `StageError` additionally carries the retry classification: only
//! [`StageError::Transient`] failures are worth another attempt. A missing or
//! corrupt input ([`StageError::Precondition`]) will not fix itself by
//! retrying, and a missing external tool ([`StageError::Environment`])
//! escalates to a fatal [`PipelineError::ToolMissing`] because every
//! subsequent item would hit it too.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the bookmill library.
///
/// Item-level failures use [`StageError`] and are recorded on the
/// [`crate::store::BookRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── State-file errors ─────────────────────────────────────────────────
    /// The record store exists but cannot be parsed. Surfaced loudly instead
    /// of starting fresh, which would silently destroy processing history.
    #[error(
        "state file '{path}' is corrupt: {source}\n\
         Refusing to overwrite existing history. Repair or remove the file to continue."
    )]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing the record store failed at the I/O level.
    #[error("failed to access state file '{path}': {source}")]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Environment errors ────────────────────────────────────────────────
    /// A required external tool is not installed. Fatal to the whole run,
    /// not scoped to one item.
    #[error("required external tool '{tool}' is not available: {detail}\nInstall it and re-run.")]
    ToolMissing { tool: String, detail: String },

    // ── Catalog errors ────────────────────────────────────────────────────
    /// The catalog listing could not be fetched and there is no prior
    /// history to fall back on.
    #[error("failed to fetch catalog '{url}' and no existing history: {detail}")]
    CatalogUnavailable { url: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A failure of one stage for one book.
///
/// The variant determines how the stage executor reacts: `Transient` is
/// retried up to the configured bound, `Precondition` fails the item
/// immediately, `Environment` aborts the entire run.
#[derive(Debug, Error)]
pub enum StageError {
    /// Network or service error that may succeed on another attempt.
    #[error("{0}")]
    Transient(String),

    /// A required input is missing or corrupt. Retrying cannot help.
    #[error("{0}")]
    Precondition(String),

    /// A required external tool is missing from the environment.
    #[error("'{tool}' unavailable: {detail}")]
    Environment { tool: String, detail: String },
}

impl StageError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }

    /// Shorthand for a transient failure.
    pub fn transient(msg: impl Into<String>) -> Self {
        StageError::Transient(msg.into())
    }

    /// Shorthand for a precondition failure.
    pub fn precondition(msg: impl Into<String>) -> Self {
        StageError::Precondition(msg.into())
    }
}

impl From<StageError> for PipelineError {
    /// Only meaningful for [`StageError::Environment`]; other variants are
    /// handled at the item level and never cross this boundary.
    fn from(e: StageError) -> Self {
        match e {
            StageError::Environment { tool, detail } => PipelineError::ToolMissing { tool, detail },
            other => PipelineError::Internal(format!("stage error escalated unexpectedly: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(StageError::transient("HTTP 503").is_retryable());
    }

    #[test]
    fn precondition_is_not_retryable() {
        assert!(!StageError::precondition("file missing").is_retryable());
    }

    #[test]
    fn environment_is_not_retryable() {
        let e = StageError::Environment {
            tool: "pandoc".into(),
            detail: "not found in PATH".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn environment_escalates_to_tool_missing() {
        let e = StageError::Environment {
            tool: "pandoc".into(),
            detail: "not found".into(),
        };
        match PipelineError::from(e) {
            PipelineError::ToolMissing { tool, .. } => assert_eq!(tool, "pandoc"),
            other => panic!("expected ToolMissing, got {other:?}"),
        }
    }

    #[test]
    fn state_corrupt_display_names_path() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let e = PipelineError::StateCorrupt {
            path: PathBuf::from("/tmp/processing_state_books.json"),
            source,
        };
        let msg = e.to_string();
        assert!(msg.contains("processing_state_books.json"), "got: {msg}");
        assert!(msg.contains("history"), "got: {msg}");
    }
}
