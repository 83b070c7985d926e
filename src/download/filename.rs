//! Output file naming for downloaded PDFs.

use std::path::{Path, PathBuf};

use crate::parser::{format_pmcid, safe_doi_for_filename};

/// File name for a PMCID, with the DOI appended when known.
///
/// ```
/// use pmcfetch_core::download::pdf_filename;
///
/// assert_eq!(pdf_filename("123456", None), "PMC123456.pdf");
/// assert_eq!(
///     pdf_filename("123456", Some("10.1038/nature12373")),
///     "PMC123456_10.1038_nature12373.pdf"
/// );
/// ```
#[must_use]
pub fn pdf_filename(pmcid: &str, doi: Option<&str>) -> String {
    let stem = format_pmcid(pmcid);
    match doi.map(safe_doi_for_filename).filter(|s| !s.is_empty()) {
        Some(doi) => format!("{stem}_{doi}.pdf"),
        None => format!("{stem}.pdf"),
    }
}

/// Sibling path a download streams into before it is renamed into place.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
