//! DOI recognition and normalization for single identifier tokens.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

/// Anchored pattern for a normalized DOI: `10.XXXX/suffix`.
/// Handles nested registrants like `10.1000.10/example`.
#[allow(clippy::expect_used)]
static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^10\.\d{4,9}(?:\.\d+)*/\S+$").expect("DOI regex is valid") // Static pattern, safe to panic
});

const DOI_URL_PREFIXES: [&str; 4] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
];

/// Normalizes a DOI token by stripping prefixes and decoding.
///
/// Strips URL prefixes (`https://doi.org/`, `https://dx.doi.org/`),
/// text prefixes (`doi:`, `DOI:`), URL-decodes, and trims whitespace.
/// The result is not validated; use [`parse_doi`] for that.
#[must_use]
pub fn normalize_doi(input: &str) -> String {
    let mut doi = input.trim();

    for prefix in &DOI_URL_PREFIXES {
        if doi
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            doi = &doi[prefix.len()..];
            break;
        }
    }

    if doi.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("doi:")) {
        doi = doi[4..].trim_start();
    }

    match urlencoding::decode(doi) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => doi.trim().to_string(),
    }
}

/// Returns the canonical DOI when `token` is a DOI, `None` otherwise.
///
/// A DOI starts with `10.`, has a registrant code of 4 or more digits and a
/// non-empty suffix after the first `/`.
///
/// # Examples
///
/// ```
/// use pmcfetch_core::parser::parse_doi;
///
/// assert_eq!(parse_doi("doi:10.1038/nature12373").as_deref(), Some("10.1038/nature12373"));
/// assert_eq!(parse_doi("https://doi.org/10.1000.10/x%2Fy").as_deref(), Some("10.1000.10/x/y"));
/// assert_eq!(parse_doi("10.12/short"), None);
/// ```
#[must_use]
pub fn parse_doi(token: &str) -> Option<String> {
    let normalized = normalize_doi(token);
    if DOI_PATTERN.is_match(&normalized) {
        Some(normalized)
    } else {
        trace!(token, "token is not a DOI");
        None
    }
}

/// Turns a DOI into a string that is safe inside a file name.
///
/// Every character outside `[A-Za-z0-9._-]` becomes `_`.
#[must_use]
pub fn safe_doi_for_filename(doi: &str) -> String {
    doi.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
