//! Error types for PDF source fetches.

use std::path::PathBuf;

use thiserror::Error;

/// Why a single source attempt failed.
///
/// These never abort a batch: each one is recorded on the attempt and the
/// next source is tried.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Connection-level failure (DNS, refused, TLS, body stream).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or request timeout.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The server answered with something other than a PDF.
    #[error("not a PDF at {url} (content-type: {})", content_type.as_deref().unwrap_or("missing"))]
    NotPdf {
        /// The URL fetched.
        url: String,
        /// Content-Type header, if any.
        content_type: Option<String>,
    },

    /// The server answered with a PDF content type but no bytes.
    #[error("empty body from {url}")]
    EmptyBody {
        /// The URL fetched.
        url: String,
    },

    /// File system error while writing the PDF.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Creates a network error, promoting reqwest timeouts to [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a wrong-content-type error.
    pub fn not_pdf(url: impl Into<String>, content_type: Option<String>) -> Self {
        Self::NotPdf {
            url: url.into(),
            content_type,
        }
    }

    /// Creates an empty-body error.
    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The `Retry-After` value of a 429 response.
    #[must_use]
    pub fn rate_limit_retry_after(&self) -> Option<&str> {
        match self {
            Self::HttpStatus {
                status: 429,
                retry_after,
                ..
            } => retry_after.as_deref(),
            _ => None,
        }
    }
}
