//! Catalog discovery: turn a listing page into a stream of items.
//!
//! The pipeline only needs three facts per item — a stable id, display
//! metadata, and a download URL — so the extraction deliberately stays at the
//! level of a few anchored regexes over the listing HTML rather than a full
//! DOM parse. Listing pages of this shape are machine-generated and stable;
//! if the markup ever changes structurally the regexes stop matching and the
//! run reports zero discovered items, which is loud enough.
//!
//! Extraction is idempotent: the same page text always yields the same items
//! in the same order, which the merge logic in [`crate::store`] relies on.

use crate::error::PipelineError;
use crate::slug::slugify;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

/// One item observed on the catalog listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    /// Identifier extracted from the listing; primary key downstream.
    pub id: String,
    pub title: String,
    pub author: String,
    /// Filename slugs derived from the display text. May be empty when the
    /// text has no ASCII rendering; the store fills them in on a later scan
    /// if a better derivation becomes available.
    pub title_slug: String,
    pub author_slug: String,
    /// Absolute URL of the scan.
    pub source_url: String,
}

/// Failure to obtain the catalog listing.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to fetch catalog '{url}': {detail}")]
    Fetch { url: String, detail: String },
}

/// Where items come from. Implementations must be idempotent: discovering
/// twice yields the same identifiers.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn discover(&self) -> Result<Vec<DiscoveredItem>, CatalogError>;

    /// The listing URL, used for error reporting.
    fn url(&self) -> &str;
}

// ── HTTP implementation ──────────────────────────────────────────────────

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<li[^>]*\bid="li_id\d+"[^>]*>(.*?)</li>"#).unwrap());
static TITLE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span[^>]*class="titlespan"[^>]*>.*?<a[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .unwrap()
});
static AUTHOR_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)<span[^>]*class="authorspan"[^>]*>(.*?)</span>"#).unwrap());
static DOWNLOAD_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<span[^>]*class="downloadpdf"[^>]*>.*?<a[^>]*href="([^"]*)""#).unwrap()
});
static ID_FROM_TOC: Lazy<Regex> = Lazy::new(|| Regex::new(r"book_id=(\d+[A-Z]?)").unwrap());
static ID_FROM_PDF: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d{3,}[A-Z]?)/index\.pdf").unwrap());
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Fetches the listing over HTTP and extracts items with the regexes above.
pub struct HttpCatalogSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalogSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn discover(&self) -> Result<Vec<DiscoveredItem>, CatalogError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::Fetch {
                url: self.url.clone(),
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CatalogError::Fetch {
                url: self.url.clone(),
                detail: format!("HTTP {}", response.status()),
            });
        }

        let html = response.text().await.map_err(|e| CatalogError::Fetch {
            url: self.url.clone(),
            detail: e.to_string(),
        })?;

        Ok(extract_items(&html, &self.url))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Extract items from listing HTML. Items missing a title, download link, or
/// id are skipped with a warning rather than failing the scan.
pub fn extract_items(html: &str, base_url: &str) -> Vec<DiscoveredItem> {
    let mut items = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for block in LIST_ITEM.captures_iter(html) {
        let fragment = &block[1];

        let (toc_href, title) = match TITLE_LINK.captures(fragment) {
            Some(c) => (c[1].to_string(), clean_text(&c[2])),
            None => (String::new(), String::new()),
        };

        let author = AUTHOR_SPAN
            .captures(fragment)
            .map(|c| clean_text(&c[1]))
            .unwrap_or_default();

        let pdf_href = DOWNLOAD_LINK
            .captures(fragment)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        // Prefer the id embedded in the contents link; fall back to the
        // directory component of the download URL.
        let id = ID_FROM_TOC
            .captures(&toc_href)
            .or_else(|| ID_FROM_PDF.captures(&pdf_href))
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        if title.is_empty() || pdf_href.is_empty() || id.is_empty() {
            warn!("skipping listing entry with missing title, link, or id");
            continue;
        }
        if !seen.insert(id.clone()) {
            warn!("duplicate listing entry for id {id}; keeping the first");
            continue;
        }

        let source_url = absolutize(base_url, &pdf_href);
        debug!("discovered item {id}: '{title}'");

        items.push(DiscoveredItem {
            title_slug: slugify(&title),
            author_slug: slugify(&author),
            id,
            title,
            author,
            source_url,
        });
    }

    items
}

/// Strip tags, decode the few entities these listings use, and trim.
fn clean_text(fragment: &str) -> String {
    TAGS.replace_all(fragment, "")
        .replace("&amp;", "&")
        .replace("&nbsp;", " ")
        .replace('\u{2014}', "")
        .trim()
        .to_string()
}

/// Resolve a possibly-relative href against the listing URL.
fn absolutize(base_url: &str, href: &str) -> String {
    match reqwest::Url::parse(base_url).and_then(|base| base.join(href)) {
        Ok(url) => url.to_string(),
        Err(_) => href.to_string(),
    }
}

/// Decide whether a catalog fetch failure is fatal: with no prior history
/// there is nothing to fall back on, so it is; with history the run degrades
/// to processing what it already knows.
pub fn fetch_failure_is_fatal(have_history: bool) -> bool {
    !have_history
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Fetch { url, detail } => PipelineError::CatalogUnavailable { url, detail },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <div class="books_from_db">
          <ul>
            <li id="li_id1" class="book">
              <span class="titlespan"><a href="toc.php?book_id=012">Atma Vidya Vilasa</a></span>
              <span class="authorspan"><a href="author.php?id=3">Sadashiva Brahmendra</a></span>
              <span class="downloadpdf"><a href="/books/012/index.pdf">Download</a></span>
            </li>
            <li id="li_id2" class="book">
              <span class="titlespan"><a href="toc.php?book_id=345A">Upadesha Sara</a></span>
              <span class="authorspan">— Ramana</span>
              <span class="downloadpdf"><a href="https://cdn.example.org/345A/index.pdf">Download</a></span>
            </li>
            <li id="li_id3" class="book">
              <span class="titlespan">No link here</span>
            </li>
          </ul>
        </div>
    "#;

    #[test]
    fn extracts_items_with_ids_and_absolute_urls() {
        let items = extract_items(LISTING, "https://example.org/php/books.php");
        assert_eq!(items.len(), 2, "entry without id/link is skipped");

        assert_eq!(items[0].id, "012");
        assert_eq!(items[0].title, "Atma Vidya Vilasa");
        assert_eq!(items[0].author, "Sadashiva Brahmendra");
        assert_eq!(items[0].title_slug, "atma-vidya-vilasa");
        assert_eq!(items[0].source_url, "https://example.org/books/012/index.pdf");

        assert_eq!(items[1].id, "345A");
        assert_eq!(
            items[1].source_url,
            "https://cdn.example.org/345A/index.pdf"
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let a = extract_items(LISTING, "https://example.org/php/books.php");
        let b = extract_items(LISTING, "https://example.org/php/books.php");
        assert_eq!(a, b);
    }

    #[test]
    fn id_falls_back_to_download_url() {
        let html = r#"
            <li id="li_id9">
              <span class="titlespan"><a href="toc.php">Some Book</a></span>
              <span class="downloadpdf"><a href="/scans/678/index.pdf">pdf</a></span>
            </li>
        "#;
        let items = extract_items(html, "https://example.org/list.php");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "678");
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let html = r#"
            <li id="li_id1">
              <span class="titlespan"><a href="?book_id=100">First</a></span>
              <span class="downloadpdf"><a href="/100/index.pdf">pdf</a></span>
            </li>
            <li id="li_id2">
              <span class="titlespan"><a href="?book_id=100">Second</a></span>
              <span class="downloadpdf"><a href="/100/index.pdf">pdf</a></span>
            </li>
        "#;
        let items = extract_items(html, "https://example.org/list.php");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "First");
    }

    #[test]
    fn clean_text_strips_markup_and_entities() {
        assert_eq!(clean_text("<b>Tom &amp; Jerry</b>"), "Tom & Jerry");
        assert_eq!(clean_text(" \u{2014} Ramana "), "Ramana");
    }
}
