//! Typed identifiers and the token classifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::doi::parse_doi;

/// Longest digit run accepted as a PMCID.
pub const MAX_PMCID_DIGITS: usize = 8;

/// Longest digit run accepted as a PMID.
pub const MAX_PMID_DIGITS: usize = 10;

/// Kind of identifier detected for an input token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// PubMed Central identifier
    Pmcid,
    /// PubMed identifier
    Pmid,
    /// Digital Object Identifier
    Doi,
    /// Could not be recognized
    Invalid,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pmcid => write!(f, "PMCID"),
            Self::Pmid => write!(f, "PMID"),
            Self::Doi => write!(f, "DOI"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Context supplied by the caller, typically derived from a CSV column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyHint {
    /// Values come from a PMCID column.
    Pmcid,
    /// Values come from a PMID column.
    Pmid,
    /// Values come from a DOI column.
    Doi,
}

impl ClassifyHint {
    /// Derives a hint from a column name, if the name says what it holds.
    ///
    /// ```
    /// use pmcfetch_core::parser::ClassifyHint;
    ///
    /// assert_eq!(ClassifyHint::from_column_name("PMCID"), Some(ClassifyHint::Pmcid));
    /// assert_eq!(ClassifyHint::from_column_name("pubmed_pmid"), Some(ClassifyHint::Pmid));
    /// assert_eq!(ClassifyHint::from_column_name("ID"), None);
    /// ```
    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        if lower.contains("pmc") {
            Some(Self::Pmcid)
        } else if lower.contains("pmid") {
            Some(Self::Pmid)
        } else if lower.contains("doi") {
            Some(Self::Doi)
        } else {
            None
        }
    }
}

/// How an unprefixed digit-only token is classified when no hint applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousDefault {
    /// Treat as a PubMed identifier.
    #[default]
    Pmid,
    /// Treat as a PMCID written without its prefix.
    Pmcid,
}

impl AmbiguousDefault {
    /// Parses the configuration label (`pmid` or `pmcid`).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "pmid" => Some(Self::Pmid),
            "pmcid" | "pmc" => Some(Self::Pmcid),
            _ => None,
        }
    }

    /// Returns the stable configuration label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pmid => "pmid",
            Self::Pmcid => "pmcid",
        }
    }
}

/// A classified input token.
///
/// The canonical form of a PMCID is digits only; the `PMC` prefix is added
/// back by [`Identifier::display_value`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    raw: String,
    kind: IdentifierKind,
    canonical: String,
    ambiguous: bool,
}

impl Identifier {
    fn new(raw: &str, kind: IdentifierKind, canonical: impl Into<String>, ambiguous: bool) -> Self {
        Self {
            raw: raw.to_string(),
            kind,
            canonical: canonical.into(),
            ambiguous,
        }
    }

    fn invalid(raw: &str) -> Self {
        Self::new(raw, IdentifierKind::Invalid, "", false)
    }

    /// Original input token, untrimmed.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Detected identifier kind.
    #[must_use]
    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Canonical value used for comparison and cache keys.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// True when the kind came from the configured default for a bare digit token.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    /// True unless the token was rejected.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.kind != IdentifierKind::Invalid
    }

    /// Presentation form: `PMC`-prefixed for PMCIDs, canonical otherwise.
    #[must_use]
    pub fn display_value(&self) -> String {
        match self.kind {
            IdentifierKind::Pmcid => format_pmcid(&self.canonical),
            IdentifierKind::Invalid => self.raw.trim().to_string(),
            _ => self.canonical.clone(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.display_value())
    }
}

/// Classifies a raw token into a typed [`Identifier`].
///
/// Order of checks: empty → DOI → `PMC`-prefixed digits → bare digits
/// (PMID or PMCID per `hint`, then `default`) → invalid. Pure function.
///
/// # Examples
///
/// ```
/// use pmcfetch_core::parser::{AmbiguousDefault, IdentifierKind, classify};
///
/// let id = classify("PMC123456", None, AmbiguousDefault::Pmid);
/// assert_eq!(id.kind(), IdentifierKind::Pmcid);
/// assert_eq!(id.canonical(), "123456");
///
/// let id = classify("38238491", None, AmbiguousDefault::Pmid);
/// assert_eq!(id.kind(), IdentifierKind::Pmid);
/// assert!(id.is_ambiguous());
/// ```
#[must_use]
pub fn classify(token: &str, hint: Option<ClassifyHint>, default: AmbiguousDefault) -> Identifier {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Identifier::invalid(token);
    }

    if let Some(doi) = parse_doi(trimmed) {
        return Identifier::new(token, IdentifierKind::Doi, doi, false);
    }

    if let Some(digits) = strip_pmc_prefix(trimmed) {
        if is_digits(digits, MAX_PMCID_DIGITS) {
            return Identifier::new(token, IdentifierKind::Pmcid, digits, false);
        }
        trace!(token = trimmed, "PMC prefix without a valid digit run");
        return Identifier::invalid(token);
    }

    if !is_digits(trimmed, MAX_PMID_DIGITS) {
        return Identifier::invalid(token);
    }

    // Too long for a PMCID: only a PMID fits.
    if trimmed.len() > MAX_PMCID_DIGITS {
        return Identifier::new(token, IdentifierKind::Pmid, trimmed, false);
    }

    match (hint, default) {
        (Some(ClassifyHint::Pmcid), _) => {
            Identifier::new(token, IdentifierKind::Pmcid, trimmed, false)
        }
        (Some(ClassifyHint::Pmid), _) => Identifier::new(token, IdentifierKind::Pmid, trimmed, false),
        (_, AmbiguousDefault::Pmid) => Identifier::new(token, IdentifierKind::Pmid, trimmed, true),
        (_, AmbiguousDefault::Pmcid) => {
            Identifier::new(token, IdentifierKind::Pmcid, trimmed, true)
        }
    }
}

/// Adds the `PMC` prefix to a PMCID value.
///
/// Empty input stays empty and an existing prefix is not repeated.
///
/// ```
/// use pmcfetch_core::parser::format_pmcid;
///
/// assert_eq!(format_pmcid("7439635"), "PMC7439635");
/// assert_eq!(format_pmcid(" pmc7439635 "), "PMC7439635");
/// assert_eq!(format_pmcid(""), "");
/// ```
#[must_use]
pub fn format_pmcid(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let digits = strip_pmc_prefix(trimmed).unwrap_or(trimmed);
    format!("PMC{digits}")
}

/// Returns the digits of a PMCID given with or without its prefix.
#[must_use]
pub fn normalize_pmcid(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let digits = strip_pmc_prefix(trimmed).unwrap_or(trimmed);
    is_digits(digits, MAX_PMCID_DIGITS).then(|| digits.to_string())
}

fn strip_pmc_prefix(token: &str) -> Option<&str> {
    if token.len() >= 3 && token.is_char_boundary(3) && token[..3].eq_ignore_ascii_case("pmc") {
        Some(&token[3..])
    } else {
        None
    }
}

fn is_digits(value: &str, max_len: usize) -> bool {
    !value.is_empty() && value.len() <= max_len && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhinted(token: &str) -> Identifier {
        classify(token, None, AmbiguousDefault::Pmid)
    }

    #[test]
    fn test_classify_pmcid_prefix_and_bare_share_canonical() {
        let prefixed = unhinted("PMC123456");
        let bare = classify("123456", Some(ClassifyHint::Pmcid), AmbiguousDefault::Pmid);
        assert_eq!(prefixed.kind(), IdentifierKind::Pmcid);
        assert_eq!(bare.kind(), IdentifierKind::Pmcid);
        assert_eq!(prefixed.canonical(), "123456");
        assert_eq!(prefixed.canonical(), bare.canonical());
    }

    #[test]
    fn test_classify_pmcid_prefix_is_case_insensitive() {
        let id = unhinted("pmc7439635");
        assert_eq!(id.kind(), IdentifierKind::Pmcid);
        assert_eq!(id.canonical(), "7439635");
        assert_eq!(id.display_value(), "PMC7439635");
    }

    #[test]
    fn test_classify_pmcid_too_many_digits_is_invalid() {
        assert_eq!(unhinted("PMC123456789").kind(), IdentifierKind::Invalid);
        assert_eq!(unhinted("PMC").kind(), IdentifierKind::Invalid);
        assert_eq!(unhinted("PMC12a").kind(), IdentifierKind::Invalid);
    }

    #[test]
    fn test_classify_doi() {
        let id = unhinted(" 10.1038/nature12373 ");
        assert_eq!(id.kind(), IdentifierKind::Doi);
        assert_eq!(id.canonical(), "10.1038/nature12373");
        assert!(id.canonical().starts_with("10."));
    }

    #[test]
    fn test_classify_doi_url_form() {
        let id = unhinted("https://doi.org/10.1186/s12916-020-01690-4");
        assert_eq!(id.kind(), IdentifierKind::Doi);
        assert_eq!(id.canonical(), "10.1186/s12916-020-01690-4");
    }

    #[test]
    fn test_classify_bare_digits_default_pmid_is_ambiguous() {
        let id = unhinted("38238491");
        assert_eq!(id.kind(), IdentifierKind::Pmid);
        assert!(id.is_ambiguous());
    }

    #[test]
    fn test_classify_bare_digits_default_pmcid() {
        let id = classify("7439635", None, AmbiguousDefault::Pmcid);
        assert_eq!(id.kind(), IdentifierKind::Pmcid);
        assert!(id.is_ambiguous());
    }

    #[test]
    fn test_classify_hint_overrides_default() {
        let id = classify("7439635", Some(ClassifyHint::Pmid), AmbiguousDefault::Pmcid);
        assert_eq!(id.kind(), IdentifierKind::Pmid);
        assert!(!id.is_ambiguous());

        let id = classify("7439635", Some(ClassifyHint::Pmcid), AmbiguousDefault::Pmid);
        assert_eq!(id.kind(), IdentifierKind::Pmcid);
        assert!(!id.is_ambiguous());
    }

    #[test]
    fn test_classify_long_digits_only_pmid() {
        let id = classify("1234567890", Some(ClassifyHint::Pmcid), AmbiguousDefault::Pmcid);
        assert_eq!(id.kind(), IdentifierKind::Pmid);
        assert!(!id.is_ambiguous());
    }

    #[test]
    fn test_classify_invalid_tokens() {
        for token in [
            "",
            "   ",
            "abc",
            "invalid!!",
            "12345678901",
            "12-34",
            "aαααααααα",
        ] {
            let id = unhinted(token);
            assert_eq!(id.kind(), IdentifierKind::Invalid, "token {token:?}");
            assert!(!id.is_valid());
        }
    }

    #[test]
    fn test_classify_keeps_raw_token() {
        let id = unhinted("  PMC1 ");
        assert_eq!(id.raw(), "  PMC1 ");
        assert_eq!(id.canonical(), "1");
    }

    #[test]
    fn test_format_pmcid() {
        assert_eq!(format_pmcid("7439635"), "PMC7439635");
        assert_eq!(format_pmcid("PMC7439635"), "PMC7439635");
        assert_eq!(format_pmcid("  7439636  "), "PMC7439636");
        assert_eq!(format_pmcid(""), "");
    }

    #[test]
    fn test_normalize_pmcid() {
        assert_eq!(normalize_pmcid("PMC7439635").as_deref(), Some("7439635"));
        assert_eq!(normalize_pmcid("7439635").as_deref(), Some("7439635"));
        assert_eq!(normalize_pmcid("PMCX"), None);
    }

    #[test]
    fn test_hint_from_column_name() {
        assert_eq!(ClassifyHint::from_column_name("pmcid"), Some(ClassifyHint::Pmcid));
        assert_eq!(ClassifyHint::from_column_name("PMID"), Some(ClassifyHint::Pmid));
        assert_eq!(ClassifyHint::from_column_name("Article DOI"), Some(ClassifyHint::Doi));
        assert_eq!(ClassifyHint::from_column_name("title"), None);
    }

    #[test]
    fn test_ambiguous_default_labels() {
        assert_eq!(AmbiguousDefault::from_label("PMID"), Some(AmbiguousDefault::Pmid));
        assert_eq!(AmbiguousDefault::from_label("pmcid"), Some(AmbiguousDefault::Pmcid));
        assert_eq!(AmbiguousDefault::from_label("doi"), None);
        assert_eq!(AmbiguousDefault::default().as_str(), "pmid");
    }

    #[test]
    fn test_identifier_display() {
        assert_eq!(unhinted("PMC42").to_string(), "[PMCID] PMC42");
        assert_eq!(unhinted("abc").to_string(), "[Invalid] abc");
    }
}
