//! Filesystem-safe identifiers derived from catalog text.
//!
//! Slugs appear in artifact filenames and in the replica directory layout, so
//! they must be deterministic: the same input yields the same slug on every
//! run, or resumed runs would look for artifacts under different names.
//! Transliteration of non-Latin titles is a catalog concern outside this
//! crate; [`slugify`] keeps whatever ASCII survives and discards the rest,
//! which is stable even for scripts it cannot romanize.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATOR_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

/// Convert text into a lowercase, hyphen-separated, filesystem-safe slug.
///
/// Non-ASCII characters are dropped rather than approximated, so a title in a
/// script with no recorded transliteration produces an empty slug — callers
/// treat empty slugs as "not yet derived" and may fill them in later.
pub fn slugify(text: &str) -> String {
    let ascii: String = text.chars().filter(char::is_ascii).collect();
    let stripped = NON_SLUG_CHARS.replace_all(&ascii, "");
    SEPARATOR_RUNS
        .replace_all(stripped.trim(), "-")
        .to_lowercase()
        .trim_matches('-')
        .to_string()
}

/// Derive the catalog slug from the listing URL.
///
/// The slug namespaces everything the pipeline writes (artifact directories,
/// the state file, the replica layout), so two catalogs processed from the
/// same data dir never collide. Taken from the last path segment with its
/// extension stripped; a URL with no usable path falls back to the host.
pub fn catalog_slug(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let without_query = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);

    let mut segments = without_query.split('/').filter(|s| !s.is_empty());
    let host = segments.next().unwrap_or("catalog");
    let last = segments.last();

    let base = match last {
        Some(seg) => seg.split('.').next().unwrap_or(seg),
        None => host,
    };
    let slug = slugify(base);
    if slug.is_empty() {
        slugify(host)
    } else {
        slug
    }
}

/// Zero-pad an item id to at least three characters for stable lexicographic
/// ordering and directory naming (`7` → `007`, `123A` stays `123A`).
pub fn padded_id(id: &str) -> String {
    if id.len() >= 3 {
        id.to_string()
    } else {
        format!("{id:0>3}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Atma Vidya Vilasa"), "atma-vidya-vilasa");
        assert_eq!(slugify("  Hello,  World!  "), "hello-world");
    }

    #[test]
    fn slugify_drops_non_ascii() {
        // Non-Latin text with no ASCII content yields an empty slug.
        assert_eq!(slugify("ಆತ್ಮವಿದ್ಯಾವಿಲಾಸ"), "");
        // Mixed text keeps the ASCII part.
        assert_eq!(slugify("ಆತ್ಮ Vol. 2"), "vol-2");
    }

    #[test]
    fn slugify_collapses_separators_but_keeps_underscores() {
        assert_eq!(slugify("a - b   c"), "a-b-c");
        assert_eq!(slugify("snake_case name"), "snake_case-name");
    }

    #[test]
    fn catalog_slug_from_listing_url() {
        assert_eq!(
            catalog_slug("https://example.org/php/kannada_books.php"),
            "kannada_books"
        );
    }

    #[test]
    fn catalog_slug_ignores_query() {
        assert_eq!(
            catalog_slug("https://example.org/lists/archive.php?page=2"),
            "archive"
        );
    }

    #[test]
    fn catalog_slug_falls_back_to_host() {
        assert_eq!(catalog_slug("https://example.org/"), "exampleorg");
    }

    #[test]
    fn padded_id_pads_short_numeric_ids() {
        assert_eq!(padded_id("7"), "007");
        assert_eq!(padded_id("42"), "042");
        assert_eq!(padded_id("123"), "123");
        assert_eq!(padded_id("123A"), "123A");
        assert_eq!(padded_id("1234"), "1234");
    }
}
