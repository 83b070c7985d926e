//! Input parsing: classifying raw tokens into typed literature identifiers.
//!
//! This module turns heterogeneous input (PMCIDs with or without prefix,
//! PMIDs, DOIs in bare, URL or `doi:` form) into [`Identifier`] values with a
//! canonical form suitable for comparison and cache keys. It never touches
//! the network.
//!
//! # Example
//!
//! ```
//! use pmcfetch_core::parser::{AmbiguousDefault, IdentifierKind, classify_all};
//!
//! let ids = classify_all(
//!     &["PMC123456".to_string(), "abc".to_string(), "10.1038/nature12373".to_string()],
//!     None,
//!     AmbiguousDefault::Pmid,
//! );
//! let kinds: Vec<_> = ids.iter().map(|id| id.kind()).collect();
//! assert_eq!(kinds, [IdentifierKind::Pmcid, IdentifierKind::Invalid, IdentifierKind::Doi]);
//! ```

mod column;
mod doi;
mod identifier;

pub use column::{ColumnValues, auto_detect_column, parse_identifier_string, read_identifier_column};
pub use doi::{normalize_doi, parse_doi, safe_doi_for_filename};
pub use identifier::{
    AmbiguousDefault, ClassifyHint, Identifier, IdentifierKind, MAX_PMCID_DIGITS,
    MAX_PMID_DIGITS, classify, format_pmcid, normalize_pmcid,
};

use tracing::debug;

/// Classifies every token, preserving order and length.
#[must_use]
pub fn classify_all(
    tokens: &[String],
    hint: Option<ClassifyHint>,
    default: AmbiguousDefault,
) -> Vec<Identifier> {
    let identifiers: Vec<Identifier> = tokens
        .iter()
        .map(|token| classify(token, hint, default))
        .collect();

    debug!(
        total = identifiers.len(),
        invalid = identifiers.iter().filter(|id| !id.is_valid()).count(),
        ambiguous = identifiers.iter().filter(|id| id.is_ambiguous()).count(),
        "classified input tokens"
    );

    identifiers
}
