//! On-disk layout: where every artifact of every book lives.
//!
//! Paths are a pure function of `(item id, slugs, catalog slug)` so that
//! recomputing them on any later run — including a run that crashed halfway —
//! yields exactly the same locations. Records persist these paths *relative*
//! to the data directory; absolutization happens in memory at the point of
//! use and is never written back, so a state file can be moved between
//! machines along with its data directory.
//!
//! ```text
//! <data dir>/
//!   processing_state_<catalog>.json
//!   raw_pdf/<catalog>/<padded id>/<id>_<title>_<author>.pdf
//!   processed_docs/<catalog>/<padded id>/<id>_<title>_<author>.md
//!   processed_docs/<catalog>/<padded id>/<id>_<title>_<author>.docx
//! ```

use crate::slug::padded_id;
use std::path::{Path, PathBuf};

/// Directory (under the data dir) holding downloaded scans.
pub const RAW_DIR: &str = "raw_pdf";

/// Directory (under the data dir) holding OCR text and converted documents.
pub const PROCESSED_DIR: &str = "processed_docs";

/// The relative locations of one book's three artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Downloaded scan (PDF).
    pub raw: PathBuf,
    /// OCR output (Markdown).
    pub text: PathBuf,
    /// Converted distributable document (DOCX).
    pub document: PathBuf,
}

/// Compute the relative artifact paths for an item.
///
/// Empty slug parts are omitted from the filename rather than leaving
/// dangling separators, so `("12", "gita", "")` names files `12_gita.*`.
pub fn artifact_paths(id: &str, title_slug: &str, author_slug: &str, catalog: &str) -> ArtifactPaths {
    let stem = file_stem(id, title_slug, author_slug);
    let dir = padded_id(id);

    let raw = Path::new(RAW_DIR)
        .join(catalog)
        .join(&dir)
        .join(format!("{stem}.pdf"));
    let processed = Path::new(PROCESSED_DIR).join(catalog).join(&dir);

    ArtifactPaths {
        raw,
        text: processed.join(format!("{stem}.md")),
        document: processed.join(format!("{stem}.docx")),
    }
}

/// Filename stem shared by all three artifacts: id plus whichever slug parts
/// are non-empty, joined with underscores.
fn file_stem(id: &str, title_slug: &str, author_slug: &str) -> String {
    let mut parts = vec![id];
    if !title_slug.is_empty() {
        parts.push(title_slug);
    }
    if !author_slug.is_empty() {
        parts.push(author_slug);
    }
    parts.join("_")
}

/// Name of the record-store file for a catalog.
pub fn state_file_name(catalog: &str) -> String {
    format!("processing_state_{catalog}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic() {
        let a = artifact_paths("012", "atma-vidya", "sastry", "kannada_books");
        let b = artifact_paths("012", "atma-vidya", "sastry", "kannada_books");
        assert_eq!(a, b);
    }

    #[test]
    fn paths_follow_layout() {
        let p = artifact_paths("012", "atma-vidya", "sastry", "kannada_books");
        assert_eq!(
            p.raw,
            Path::new("raw_pdf/kannada_books/012/012_atma-vidya_sastry.pdf")
        );
        assert_eq!(
            p.text,
            Path::new("processed_docs/kannada_books/012/012_atma-vidya_sastry.md")
        );
        assert_eq!(
            p.document,
            Path::new("processed_docs/kannada_books/012/012_atma-vidya_sastry.docx")
        );
    }

    #[test]
    fn short_ids_get_padded_directories_but_not_filenames() {
        let p = artifact_paths("7", "gita", "", "books");
        assert_eq!(p.raw, Path::new("raw_pdf/books/007/7_gita.pdf"));
    }

    #[test]
    fn empty_slugs_leave_no_dangling_separators() {
        let p = artifact_paths("42", "", "", "books");
        assert_eq!(p.raw, Path::new("raw_pdf/books/042/42.pdf"));
    }

    #[test]
    fn state_file_is_keyed_by_catalog() {
        assert_eq!(
            state_file_name("kannada_books"),
            "processing_state_kannada_books.json"
        );
    }
}
