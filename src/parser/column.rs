//! Identifier list parsing and CSV column selection.

use std::path::Path;

use tracing::{debug, instrument};

use crate::config::ConfigurationError;

/// Column name priority for auto-detection, most preferred first.
const COLUMN_PRIORITY: [&str; 4] = ["id", "pmcid", "doi", "pmid"];

/// Splits a comma-separated identifier list.
///
/// Tokens are trimmed, empty tokens dropped, order and duplicates kept.
///
/// ```
/// use pmcfetch_core::parser::parse_identifier_string;
///
/// assert_eq!(
///     parse_identifier_string(" PMC1, ,38238491,PMC1 "),
///     vec!["PMC1", "38238491", "PMC1"]
/// );
/// ```
#[must_use]
pub fn parse_identifier_string(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Picks the identifier column from a table header.
///
/// Priority is `ID` > `PMCID` > `DOI` > `PMID` > first column. Each priority
/// is tried as a case-insensitive exact match first, then as a substring.
///
/// # Errors
///
/// Returns [`ConfigurationError::NoColumns`] when `columns` is empty.
///
/// ```
/// use pmcfetch_core::parser::auto_detect_column;
///
/// let columns = vec!["Title".to_string(), "pmid".to_string(), "DOI".to_string()];
/// assert_eq!(auto_detect_column(&columns, "input.csv").unwrap(), "DOI");
/// ```
pub fn auto_detect_column(
    columns: &[String],
    source_name: &str,
) -> Result<String, ConfigurationError> {
    let Some(first) = columns.first() else {
        return Err(ConfigurationError::NoColumns {
            source_name: source_name.to_string(),
        });
    };

    let lowered: Vec<String> = columns
        .iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();

    for wanted in COLUMN_PRIORITY {
        if let Some(index) = lowered.iter().position(|c| c == wanted) {
            return Ok(columns[index].clone());
        }
    }

    for wanted in COLUMN_PRIORITY {
        if let Some(index) = lowered.iter().position(|c| c.contains(wanted)) {
            return Ok(columns[index].clone());
        }
    }

    debug!(column = %first, "no recognizable identifier column, using first column");
    Ok(first.clone())
}

/// Values read from one column of a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValues {
    /// Header name of the column that was read.
    pub column: String,
    /// Non-empty cell values in file order.
    pub values: Vec<String>,
}

/// Reads identifiers from a CSV file with a header row.
///
/// When `column` is `None` the column is chosen by [`auto_detect_column`].
/// Column lookup is case-insensitive. Blank cells are skipped.
///
/// # Errors
///
/// Returns [`ConfigurationError::InputRead`] for unreadable or malformed
/// files, [`ConfigurationError::NoColumns`] for a file without a header and
/// [`ConfigurationError::ColumnNotFound`] for an unknown `column`.
#[instrument(skip_all, fields(path = %path.display(), column))]
pub fn read_identifier_column(
    path: &Path,
    column: Option<&str>,
) -> Result<ColumnValues, ConfigurationError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ConfigurationError::input_read(path, e))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ConfigurationError::input_read(path, e))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .filter(|h| !h.is_empty())
        .collect();

    let source_name = path.display().to_string();
    let selected = match column {
        Some(wanted) => headers
            .iter()
            .find(|h| h.eq_ignore_ascii_case(wanted.trim()))
            .cloned()
            .ok_or_else(|| ConfigurationError::column_not_found(wanted, &headers))?,
        None => auto_detect_column(&headers, &source_name)?,
    };
    tracing::Span::current().record("column", selected.as_str());

    let index = reader
        .headers()
        .map_err(|e| ConfigurationError::input_read(path, e))?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == selected)
        .ok_or_else(|| ConfigurationError::column_not_found(&selected, &headers))?;

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ConfigurationError::input_read(path, e))?;
        if let Some(value) = record.get(index).map(str::trim)
            && !value.is_empty()
        {
            values.push(value.to_string());
        }
    }

    debug!(column = %selected, count = values.len(), "read identifier column");
    Ok(ColumnValues {
        column: selected,
        values,
    })
}
