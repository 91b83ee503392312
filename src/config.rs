//! Configuration for a pipeline run.
//!
//! Every knob lives in one [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. There are no module-level toggles anywhere in
//! the crate: behaviour that used to be tempting to hang off a global (an
//! offline switch, a verification mode) is an explicit field here or on an
//! adapter's own config struct, so concurrent test scenarios can never leak
//! state into each other.

use crate::error::PipelineError;
use crate::progress::RunProgress;
use crate::retry::RetryPolicy;
use crate::slug::catalog_slug;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one catalog-processing run.
///
/// # Example
/// ```rust
/// use bookmill::PipelineConfig;
///
/// let config = PipelineConfig::builder("https://example.org/php/books.php")
///     .data_dir("/var/lib/bookmill")
///     .limit(Some(5))
///     .build()
///     .unwrap();
/// assert_eq!(config.catalog_slug(), "books");
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Catalog listing URL. Also determines the catalog slug that namespaces
    /// the state file, artifact directories, and replica layout.
    pub catalog_url: String,

    /// Root for everything the pipeline writes locally: the state file,
    /// downloaded scans, and processed documents. Default: current directory.
    pub data_dir: PathBuf,

    /// Root of the secondary storage mirror. Default: `<data_dir>/replica`.
    pub replica_root: PathBuf,

    /// Cap on items processed this run. `None` processes the whole queue.
    pub limit: Option<usize>,

    /// Force re-scraping the catalog even when history exists.
    pub rescan: bool,

    /// Attempts per stage before the item is marked failed. Default: 3.
    pub max_attempts: u32,

    /// Fixed wait between attempts. Default: 5 s. The services behind the
    /// stages throttle per request; a steady gap is what they expect.
    pub retry_delay: Duration,

    /// Pause between items — a deliberate throttle on the external services,
    /// not a performance knob. Default: 2 s.
    pub item_pause: Duration,

    /// When set, an existing raw artifact with no recorded fingerprint is
    /// re-downloaded instead of being trusted and adopted. Default: off
    /// (backward-compatible trust; see DESIGN.md).
    pub strict_verification: bool,

    /// Optional observer for run/item/stage events (progress bars, logs).
    pub progress: Option<Arc<dyn RunProgress>>,
}

impl PipelineConfig {
    /// Create a builder for the given catalog URL.
    pub fn builder(catalog_url: impl Into<String>) -> PipelineConfigBuilder {
        let catalog_url = catalog_url.into();
        PipelineConfigBuilder {
            config: PipelineConfig {
                catalog_url,
                data_dir: PathBuf::from("."),
                replica_root: PathBuf::new(),
                limit: None,
                rescan: false,
                max_attempts: 3,
                retry_delay: Duration::from_secs(5),
                item_pause: Duration::from_secs(2),
                strict_verification: false,
                progress: None,
            },
        }
    }

    /// Slug derived from the catalog URL; namespaces all storage.
    pub fn catalog_slug(&self) -> String {
        catalog_slug(&self.catalog_url)
    }

    /// Full path of the record-store file for this catalog.
    pub fn state_file(&self) -> PathBuf {
        self.data_dir
            .join(crate::layout::state_file_name(&self.catalog_slug()))
    }

    /// The retry policy shared by all stages.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("catalog_url", &self.catalog_url)
            .field("data_dir", &self.data_dir)
            .field("replica_root", &self.replica_root)
            .field("limit", &self.limit)
            .field("rescan", &self.rescan)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("item_pause", &self.item_pause)
            .field("strict_verification", &self.strict_verification)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn RunProgress>"))
            .finish()
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn replica_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.replica_root = dir.into();
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.config.limit = limit;
        self
    }

    pub fn rescan(mut self, rescan: bool) -> Self {
        self.config.rescan = rescan;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn item_pause(mut self, pause: Duration) -> Self {
        self.config.item_pause = pause;
        self
    }

    pub fn strict_verification(mut self, strict: bool) -> Self {
        self.config.strict_verification = strict;
        self
    }

    pub fn progress(mut self, progress: Arc<dyn RunProgress>) -> Self {
        self.config.progress = Some(progress);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PipelineConfig, PipelineError> {
        if self.config.catalog_url.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "catalog URL must not be empty".into(),
            ));
        }
        if self.config.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.config.replica_root.as_os_str().is_empty() {
            self.config.replica_root = self.config.data_dir.join("replica");
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::builder("https://example.org/php/books.php")
            .build()
            .unwrap();
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.retry_delay, Duration::from_secs(5));
        assert_eq!(c.item_pause, Duration::from_secs(2));
        assert!(!c.rescan);
        assert!(!c.strict_verification);
        assert_eq!(c.replica_root, PathBuf::from("./replica"));
    }

    #[test]
    fn state_file_is_namespaced_by_catalog() {
        let c = PipelineConfig::builder("https://example.org/php/kannada_books.php")
            .data_dir("/data")
            .build()
            .unwrap();
        assert_eq!(
            c.state_file(),
            PathBuf::from("/data/processing_state_kannada_books.json")
        );
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(matches!(
            PipelineConfig::builder("  ").build(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(matches!(
            PipelineConfig::builder("https://example.org/x.php")
                .max_attempts(0)
                .build(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn retry_policy_reflects_config() {
        let c = PipelineConfig::builder("https://example.org/x.php")
            .max_attempts(5)
            .retry_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.delay, Duration::from_millis(10));
    }
}
