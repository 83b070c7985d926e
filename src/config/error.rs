//! Error types for configuration and batch input setup.
//!
//! These are the only failures that abort a batch; they are raised before
//! any network call is made.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that make a batch impossible to start.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Concurrency outside the supported range.
    #[error(
        "invalid concurrency {value}: must be between {min} and {max}\n  Suggestion: Use a small value such as 3"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
        /// Smallest accepted value.
        min: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// A delay setting is negative or not a finite number.
    #[error("invalid {field} value {value}: must be a finite number >= 0")]
    InvalidDelay {
        /// Name of the offending setting.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The input table has no columns to read identifiers from.
    #[error("no usable column found in {source_name}\n  Suggestion: Add a header row such as 'PMCID' or 'DOI'")]
    NoColumns {
        /// File or stream the table came from.
        source_name: String,
    },

    /// The requested column does not exist in the input table.
    #[error("column '{column}' not found; available columns: {available}\n  Suggestion: Pass one of the available columns with --column")]
    ColumnNotFound {
        /// Requested column name.
        column: String,
        /// Comma-separated list of header names.
        available: String,
    },

    /// The input file could not be read or decoded.
    #[error("failed to read input {path}: {reason}")]
    InputRead {
        /// Path of the input file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// The cache directory could not be prepared.
    #[error("cache directory {path} is unusable: {source}")]
    Cache {
        /// Cache root that failed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An HTTP client could not be built.
    #[error("failed to build HTTP client for {service}: {reason}")]
    HttpClient {
        /// Service the client was meant for.
        service: String,
        /// Builder error text.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates an `InputRead` error from any displayable cause.
    pub fn input_read(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::InputRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `ColumnNotFound` error listing the available headers.
    #[must_use]
    pub fn column_not_found(column: &str, available: &[String]) -> Self {
        Self::ColumnNotFound {
            column: column.to_string(),
            available: available.join(", "),
        }
    }

    /// Creates an `HttpClient` error.
    pub fn http_client(service: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::HttpClient {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}
