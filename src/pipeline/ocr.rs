//! OCR stage: scanned PDF in, extracted text out.
//!
//! Two layers, both behind the same [`OcrEngine`] trait:
//!
//! * [`HttpOcrService`] speaks the document-digitization job protocol:
//!   create job → presigned upload → start → poll → presigned download →
//!   unpack the result archive. Every service interaction is classified
//!   transient, because that is what these hosted services are — the stage
//!   executor's retry policy handles the rest.
//!
//! * [`ChunkingOcr`] makes very large books fit the service's job limits.
//!   Above a page threshold it splits the PDF into page-range chunks in a
//!   scratch directory, runs the inner engine on each, and concatenates the
//!   chunk texts with a rule separator. The stage executor sees one call
//!   either way; intermediates vanish with the scratch directory.

use crate::error::StageError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Separator written between chunk texts in the concatenated output.
const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Text extraction from a scanned PDF.
///
/// On success returns the path the text was actually written to; the caller
/// trusts this over its own computed path, since engines may normalize names.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, pdf: &Path, output: &Path) -> Result<PathBuf, StageError>;
}

// ── HTTP job protocol ────────────────────────────────────────────────────

/// Connection settings for the hosted OCR service. All knobs are explicit —
/// there is deliberately no environment-variable or global fallback here.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Job API base, e.g. `https://api.example.com/doc-digitization/job/v1`.
    pub endpoint: String,
    pub api_key: String,
    /// BCP-47 language hint passed to the job, e.g. `kn-IN`.
    pub language: String,
    /// Extension of the text artifact the service produces. Default `md`.
    pub output_format: String,
    /// How often to ask for job status. Default 5 s.
    pub poll_interval: Duration,
    /// Give up on a job that has not reached a terminal state. Default 30 min.
    pub poll_timeout: Duration,
}

impl OcrConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            language: language.into(),
            output_format: "md".into(),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Deserialize)]
struct JobCreated {
    job_id: String,
    #[serde(default)]
    job_state: String,
}

#[derive(Deserialize)]
struct PresignedFile {
    file_url: String,
}

#[derive(Deserialize)]
struct UploadUrls {
    upload_urls: HashMap<String, PresignedFile>,
}

#[derive(Deserialize)]
struct JobStatus {
    #[serde(default)]
    job_state: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct DownloadUrls {
    download_urls: HashMap<String, PresignedFile>,
}

/// OCR via the hosted digitization job API.
pub struct HttpOcrService {
    client: reqwest::Client,
    config: OcrConfig,
}

impl HttpOcrService {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn create_job(&self) -> Result<String, StageError> {
        let payload = serde_json::json!({
            "job_parameters": {
                "language": self.config.language,
                "output_format": self.config.output_format,
            }
        });
        let created: JobCreated = self
            .post_json(&self.config.endpoint, &payload, "create job")
            .await?;
        info!("OCR job created: {} ({})", created.job_id, created.job_state);
        Ok(created.job_id)
    }

    async fn upload(&self, job_id: &str, pdf: &Path) -> Result<(), StageError> {
        let file_name = pdf
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StageError::precondition(format!("'{}' has no file name", pdf.display())))?
            .to_string();

        let payload = serde_json::json!({ "job_id": job_id, "files": [file_name] });
        let urls: UploadUrls = self
            .post_json(
                &format!("{}/upload-files", self.config.endpoint),
                &payload,
                "request upload URL",
            )
            .await?;
        let presigned = urls
            .upload_urls
            .get(&file_name)
            .ok_or_else(|| StageError::transient(format!("no upload URL for '{file_name}'")))?;

        let bytes = tokio::fs::read(pdf)
            .await
            .map_err(|e| StageError::precondition(format!("reading '{}': {e}", pdf.display())))?;

        // Presigned URLs are unauthenticated blob endpoints; the blob-type
        // header is mandatory for the storage backend they point at.
        let response = self
            .client
            .put(&presigned.file_url)
            .header("Content-Type", "application/pdf")
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("upload failed: {e}")))?;
        if !response.status().is_success() {
            return Err(StageError::transient(format!(
                "upload failed: HTTP {}",
                response.status()
            )));
        }
        debug!("uploaded '{file_name}' for job {job_id}");
        Ok(())
    }

    async fn start_job(&self, job_id: &str) -> Result<(), StageError> {
        let response = self
            .client
            .post(format!("{}/{}/start", self.config.endpoint, job_id))
            .header("api-subscription-key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StageError::transient(format!("start job: {e}")))?;
        if !response.status().is_success() {
            return Err(StageError::transient(format!(
                "start job: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn wait_for_completion(&self, job_id: &str) -> Result<(), StageError> {
        let deadline = Instant::now() + self.config.poll_timeout;
        loop {
            sleep(self.config.poll_interval).await;
            if Instant::now() > deadline {
                return Err(StageError::transient(format!(
                    "OCR job {job_id} did not finish within {:?}",
                    self.config.poll_timeout
                )));
            }

            let status: JobStatus = self
                .get_json(
                    &format!("{}/{}/status", self.config.endpoint, job_id),
                    "job status",
                )
                .await?;
            debug!("OCR job {job_id} state: {}", status.job_state);

            match status.job_state.as_str() {
                "Accepted" | "Pending" | "Running" => continue,
                "Completed" => return Ok(()),
                "PartiallyCompleted" => {
                    warn!("OCR job {job_id} only partially completed; taking what it produced");
                    return Ok(());
                }
                "Failed" => {
                    let detail = status
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no error details".into());
                    return Err(StageError::transient(format!("OCR job {job_id} failed: {detail}")));
                }
                other => {
                    return Err(StageError::transient(format!(
                        "OCR job {job_id} in unexpected state '{other}'"
                    )));
                }
            }
        }
    }

    async fn download_result(&self, job_id: &str, output: &Path) -> Result<(), StageError> {
        let urls: DownloadUrls = self
            .post_json_empty(
                &format!("{}/{}/download-files", self.config.endpoint, job_id),
                "request download URL",
            )
            .await?;
        let presigned = urls
            .download_urls
            .values()
            .next()
            .ok_or_else(|| StageError::transient("no result files for OCR job".to_string()))?;

        let archive = self
            .client
            .get(&presigned.file_url)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("fetching result archive: {e}")))?
            .bytes()
            .await
            .map_err(|e| StageError::transient(format!("reading result archive: {e}")))?;

        let extension = self.config.output_format.clone();
        let text = tokio::task::spawn_blocking(move || extract_text_member(&archive, &extension))
            .await
            .map_err(|e| StageError::transient(format!("archive task panicked: {e}")))??;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("creating '{}': {e}", parent.display())))?;
        }
        tokio::fs::write(output, text)
            .await
            .map_err(|e| StageError::transient(format!("writing '{}': {e}", output.display())))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        payload: &serde_json::Value,
        what: &str,
    ) -> Result<T, StageError> {
        let response = self
            .client
            .post(url)
            .header("api-subscription-key", &self.config.api_key)
            .header("Accept", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| StageError::transient(format!("{what}: {e}")))?;
        Self::read_json(response, what).await
    }

    async fn post_json_empty<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, StageError> {
        let response = self
            .client
            .post(url)
            .header("api-subscription-key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StageError::transient(format!("{what}: {e}")))?;
        Self::read_json(response, what).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, StageError> {
        let response = self
            .client
            .get(url)
            .header("api-subscription-key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| StageError::transient(format!("{what}: {e}")))?;
        Self::read_json(response, what).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, StageError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::transient(format!("{what}: HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| StageError::transient(format!("{what}: malformed response: {e}")))
    }
}

#[async_trait]
impl OcrEngine for HttpOcrService {
    async fn recognize(&self, pdf: &Path, output: &Path) -> Result<PathBuf, StageError> {
        let job_id = self.create_job().await?;
        self.upload(&job_id, pdf).await?;
        self.start_job(&job_id).await?;
        self.wait_for_completion(&job_id).await?;
        self.download_result(&job_id, output).await?;
        Ok(output.to_path_buf())
    }
}

/// Pull the first member with the expected extension out of the result ZIP.
fn extract_text_member(archive: &[u8], extension: &str) -> Result<String, StageError> {
    let cursor = std::io::Cursor::new(archive);
    let mut zip = zip::ZipArchive::new(cursor)
        .map_err(|e| StageError::transient(format!("result is not a valid archive: {e}")))?;

    let names: Vec<String> = zip.file_names().map(String::from).collect();
    let member = pick_text_member(&names, extension).ok_or_else(|| {
        StageError::transient(format!("no .{extension} file in OCR result archive"))
    })?;

    let mut file = zip
        .by_name(&member)
        .map_err(|e| StageError::transient(format!("reading '{member}' from archive: {e}")))?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| StageError::transient(format!("reading '{member}' from archive: {e}")))?;
    Ok(text)
}

/// First archive member carrying the requested extension, in a stable order.
fn pick_text_member(names: &[String], extension: &str) -> Option<String> {
    let suffix = format!(".{extension}");
    let mut candidates: Vec<&String> = names.iter().filter(|n| n.ends_with(&suffix)).collect();
    candidates.sort();
    candidates.first().map(|s| s.to_string())
}

// ── Chunking wrapper ─────────────────────────────────────────────────────

/// Splits oversized PDFs into page-range chunks before delegating.
pub struct ChunkingOcr<E> {
    inner: E,
    /// Largest page count submitted as a single job.
    max_pages: usize,
}

impl<E> ChunkingOcr<E> {
    pub fn new(inner: E, max_pages: usize) -> Self {
        Self {
            inner,
            max_pages: max_pages.max(1),
        }
    }
}

#[async_trait]
impl<E: OcrEngine> OcrEngine for ChunkingOcr<E> {
    async fn recognize(&self, pdf: &Path, output: &Path) -> Result<PathBuf, StageError> {
        let total = page_count(pdf).await?;
        if total <= self.max_pages {
            return self.inner.recognize(pdf, output).await;
        }

        let ranges = chunk_ranges(total, self.max_pages);
        info!(
            "'{}' has {total} pages; splitting into {} chunks of up to {} pages",
            pdf.display(),
            ranges.len(),
            self.max_pages
        );

        // Scratch space for chunk PDFs and per-chunk texts; removed on drop.
        let scratch = tempfile::TempDir::new()
            .map_err(|e| StageError::transient(format!("creating scratch dir: {e}")))?;

        let mut pieces = Vec::with_capacity(ranges.len());
        for (index, (start, end)) in ranges.iter().enumerate() {
            let chunk_pdf = scratch.path().join(format!("chunk_{:02}.pdf", index + 1));
            write_page_range(pdf, &chunk_pdf, *start, *end).await?;

            let chunk_out = scratch.path().join(format!("chunk_{:02}.md", index + 1));
            let produced = self.inner.recognize(&chunk_pdf, &chunk_out).await?;

            let text = tokio::fs::read_to_string(&produced)
                .await
                .map_err(|e| StageError::transient(format!("reading chunk text: {e}")))?;
            pieces.push(text);
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::transient(format!("creating '{}': {e}", parent.display())))?;
        }
        tokio::fs::write(output, pieces.join(CHUNK_SEPARATOR))
            .await
            .map_err(|e| StageError::transient(format!("writing '{}': {e}", output.display())))?;

        Ok(output.to_path_buf())
    }
}

/// Count pages. An unparseable PDF is a precondition failure — retrying the
/// same bytes cannot help.
async fn page_count(pdf: &Path) -> Result<usize, StageError> {
    let path = pdf.to_path_buf();
    tokio::task::spawn_blocking(move || {
        lopdf::Document::load(&path)
            .map(|doc| doc.get_pages().len())
            .map_err(|e| {
                StageError::precondition(format!("cannot read PDF '{}': {e}", path.display()))
            })
    })
    .await
    .map_err(|e| StageError::transient(format!("page-count task panicked: {e}")))?
}

/// Write pages `start..=end` (1-based) of `src` to `dst`.
async fn write_page_range(src: &Path, dst: &Path, start: u32, end: u32) -> Result<(), StageError> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut doc = lopdf::Document::load(&src).map_err(|e| {
            StageError::precondition(format!("cannot read PDF '{}': {e}", src.display()))
        })?;
        let total = doc.get_pages().len() as u32;
        let delete: Vec<u32> = (1..=total).filter(|p| *p < start || *p > end).collect();
        doc.delete_pages(&delete);
        doc.prune_objects();
        doc.save(&dst)
            .map_err(|e| StageError::transient(format!("writing '{}': {e}", dst.display())))?;
        Ok(())
    })
    .await
    .map_err(|e| StageError::transient(format!("split task panicked: {e}")))?
}

/// 1-based inclusive page ranges covering `total` pages, `max` at a time.
fn chunk_ranges(total: usize, max: usize) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    let mut start = 1usize;
    while start <= total {
        let end = (start + max - 1).min(total);
        ranges.push((start as u32, end as u32));
        start = end + 1;
    }
    ranges
}
