//! CLI binary for bookmill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires up the HTTP adapters, and renders progress.

use anyhow::{Context, Result};
use bookmill::{
    process_catalog, reset_incomplete, ChunkingOcr, HttpCatalogSource, HttpFetcher,
    HttpOcrService, ItemOutcome, MirrorTarget, OcrConfig, PandocConverter, PipelineAdapters,
    PipelineConfig, RunProgress, RunSummary, Stage,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Terminal progress: one bar over the item queue, a log line per item, and
/// a tick per finished stage.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} items  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl RunProgress for CliProgress {
    fn on_run_start(&self, total_items: usize) {
        self.bar.set_length(total_items as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{total_items} items need work"))
        ));
    }

    fn on_item_start(&self, index: usize, total: usize, id: &str, title: &str) {
        self.bar.set_message(format!("item {id}"));
        self.bar.println(format!(
            "{} [{index}/{total}] {}  {}",
            cyan("▸"),
            bold(id),
            dim(title)
        ));
    }

    fn on_stage_complete(&self, _id: &str, stage: Stage) {
        self.bar
            .println(format!("    {} {}", green("✓"), dim(&stage.to_string())));
    }

    fn on_item_complete(&self, _index: usize, _total: usize, id: &str, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => {
                self.bar.println(format!("  {} item {id} done", green("✓")));
            }
            ItemOutcome::Failed => {
                self.bar
                    .println(format!("  {} item {id} failed (see state file)", red("✗")));
            }
        }
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a whole catalog into ./data, mirroring into ./data/replica
  bookmill --catalog-url https://example.org/php/books.php --data-dir data

  # First three items only, forcing a fresh scrape of the listing
  bookmill --catalog-url https://example.org/php/books.php --limit 3 --rescan

  # Retry everything that failed on a previous run
  bookmill --catalog-url https://example.org/php/books.php --reset-failed
  bookmill --catalog-url https://example.org/php/books.php

ENVIRONMENT VARIABLES:
  OCR_API_KEY              Subscription key for the OCR service
  BOOKMILL_CATALOG_URL     Default for --catalog-url
  BOOKMILL_DATA_DIR        Default for --data-dir
  BOOKMILL_REPLICA_DIR     Default for --replica-dir
  BOOKMILL_OCR_ENDPOINT    Default for --ocr-endpoint

STATE:
  Progress lives in <data-dir>/processing_state_<catalog>.json — one JSON
  record per book, hand-editable for manual recovery. Only one bookmill
  process may use a data dir at a time (the state file has no locking).

EXIT STATUS:
  0 when the run loop completes, even if individual items failed (failures
  are reported in the summary and recorded in the state file). Nonzero only
  for run-fatal errors: corrupt state, missing pandoc, unusable catalog.
"#;

/// Download, OCR, convert, and replicate a catalog of scanned-book PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "bookmill",
    version,
    about = "Resumable pipeline for scanned-book catalogs: download → OCR → convert → replicate",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Catalog listing URL to process.
    #[arg(long, env = "BOOKMILL_CATALOG_URL")]
    catalog_url: String,

    /// Root directory for the state file and local artifacts.
    #[arg(long, env = "BOOKMILL_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Root of the secondary-storage mirror. Default: <data-dir>/replica.
    #[arg(long, env = "BOOKMILL_REPLICA_DIR")]
    replica_dir: Option<PathBuf>,

    /// Cap the number of items processed this run.
    #[arg(short, long)]
    limit: Option<usize>,

    /// Force re-scraping the catalog even when history exists.
    #[arg(long)]
    rescan: bool,

    /// Reset failed/in-progress records to pending and exit.
    #[arg(long)]
    reset_failed: bool,

    /// OCR service subscription key.
    #[arg(long, env = "OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,

    /// OCR job API base URL.
    #[arg(
        long,
        env = "BOOKMILL_OCR_ENDPOINT",
        default_value = "https://api.sarvam.ai/doc-digitization/job/v1"
    )]
    ocr_endpoint: String,

    /// Language hint passed to the OCR service.
    #[arg(long, env = "BOOKMILL_LANGUAGE", default_value = "kn-IN")]
    language: String,

    /// Split PDFs above this many pages into separate OCR jobs.
    #[arg(long, default_value_t = 200)]
    ocr_chunk_pages: usize,

    /// Attempts per stage before an item is marked failed.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Seconds to wait between attempts.
    #[arg(long, default_value_t = 5)]
    retry_delay: u64,

    /// Re-download artifacts that exist locally without a recorded hash.
    #[arg(long)]
    strict_verify: bool,

    /// Disable the progress bar.
    #[arg(long, env = "BOOKMILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs and the progress bar fight over the terminal; when
    // the bar is on, only errors go to stderr.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = PipelineConfig::builder(&cli.catalog_url)
        .data_dir(&cli.data_dir)
        .limit(cli.limit)
        .rescan(cli.rescan)
        .max_attempts(cli.max_attempts)
        .retry_delay(Duration::from_secs(cli.retry_delay))
        .strict_verification(cli.strict_verify);
    if let Some(ref replica) = cli.replica_dir {
        builder = builder.replica_root(replica);
    }
    if show_progress {
        builder = builder.progress(CliProgress::new());
    }
    let config = builder.build().context("Invalid configuration")?;

    // ── Reset-only mode ──────────────────────────────────────────────────
    if cli.reset_failed {
        let touched = reset_incomplete(&config).context("Failed to reset records")?;
        if !cli.quiet {
            eprintln!(
                "{} reset {} records to pending in {}",
                green("✔"),
                bold(&touched.to_string()),
                config.state_file().display()
            );
        }
        return Ok(());
    }

    // ── Assemble adapters ────────────────────────────────────────────────
    let api_key = cli
        .ocr_api_key
        .context("OCR_API_KEY is not set (flag --ocr-api-key or environment)")?;

    let catalog = HttpCatalogSource::new(&config.catalog_url);
    let fetcher = HttpFetcher::new();
    let ocr = ChunkingOcr::new(
        HttpOcrService::new(OcrConfig::new(&cli.ocr_endpoint, api_key, &cli.language)),
        cli.ocr_chunk_pages,
    );
    let converter = PandocConverter::new();
    let replicator = MirrorTarget::under(&config.replica_root);

    // ── Run ──────────────────────────────────────────────────────────────
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
    .context("Run failed")?;

    // ── Summary ──────────────────────────────────────────────────────────
    // Item failures are part of a normal run: report them, exit 0 anyway.
    if !cli.quiet {
        let tick = if summary.failed == 0 {
            green("✔")
        } else {
            cyan("⚠")
        };
        eprintln!(
            "{tick}  {} of {} records completed",
            bold(&summary.completed.to_string()),
            summary.discovered,
        );
        if summary.failed > 0 {
            eprintln!(
                "   {} failed  {}",
                red(&summary.failed.to_string()),
                dim("(run with --reset-failed to retry them later)")
            );
        }
        if summary.pending > 0 {
            eprintln!("   {} still pending", summary.pending);
        }
    }

    Ok(())
}
