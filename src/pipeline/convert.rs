//! Convert stage: extracted text to a distributable document.
//!
//! Shells out to pandoc. A missing binary is an environment failure — fatal
//! to the whole run, not to one item — so the orchestrator preflights with
//! [`DocumentConverter::ensure_available`] before touching the queue, and the
//! per-item path classifies `NotFound` the same way in case the tool
//! disappears mid-run.

use crate::error::StageError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Text-to-document conversion.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, text: &Path, output: &Path) -> Result<(), StageError>;

    /// Preflight check run by the orchestrator before any item is touched.
    /// Converters with no environment requirements keep the default.
    async fn ensure_available(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Converts Markdown to DOCX by invoking `pandoc <in> -o <out>`.
pub struct PandocConverter {
    binary: String,
}

impl PandocConverter {
    pub fn new() -> Self {
        Self::with_binary("pandoc")
    }

    /// Use an alternative binary name or path (mainly for tests).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> StageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StageError::Environment {
                tool: self.binary.clone(),
                detail: "not found in PATH".into(),
            }
        } else {
            StageError::transient(format!("spawning '{}': {e}", self.binary))
        }
    }
}

impl Default for PandocConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    /// Check the tool exists before processing anything.
    async fn ensure_available(&self) -> Result<(), StageError> {
        let result = Command::new(&self.binary).arg("--version").output().await;
        match result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(StageError::Environment {
                tool: self.binary.clone(),
                detail: format!("'--version' exited with {}", output.status),
            }),
            Err(e) => Err(self.spawn_error(e)),
        }
    }

    async fn convert(&self, text: &Path, output: &Path) -> Result<(), StageError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("creating '{}': {e}", parent.display())))?;
        }

        debug!("pandoc {} -o {}", text.display(), output.display());
        let result = Command::new(&self.binary)
            .arg(text)
            .arg("-o")
            .arg(output)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => Err(StageError::transient(format!(
                "pandoc exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
            Err(e) => Err(self.spawn_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_an_environment_error() {
        let converter = PandocConverter::with_binary("definitely-not-a-real-binary-4f2a");
        let err = converter.ensure_available().await.unwrap_err();
        match err {
            StageError::Environment { tool, .. } => {
                assert_eq!(tool, "definitely-not-a-real-binary-4f2a");
            }
            other => panic!("expected Environment, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_during_convert_is_environment_too() {
        let dir = tempfile::TempDir::new().unwrap();
        let text = dir.path().join("book.md");
        tokio::fs::write(&text, "# hello").await.unwrap();

        let converter = PandocConverter::with_binary("definitely-not-a-real-binary-4f2a");
        let err = converter
            .convert(&text, &dir.path().join("book.docx"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Environment { .. }));
    }

    #[tokio::test]
    async fn failing_tool_is_transient() {
        // `false` exists everywhere the tests run and always exits nonzero.
        let dir = tempfile::TempDir::new().unwrap();
        let text = dir.path().join("book.md");
        tokio::fs::write(&text, "# hello").await.unwrap();

        let converter = PandocConverter::with_binary("false");
        let err = converter
            .convert(&text, &dir.path().join("book.docx"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
