//! Error types for identifier lookups.

use thiserror::Error;

/// A lookup that did not produce a definitive answer.
///
/// None of these outcomes is ever written to the cache: the identifier is
/// reported unresolved for the current run and retried on the next one.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Connection-level failure (DNS, refused, TLS, body read).
    #[error("network error calling {service} at {url}: {source}")]
    Network {
        /// Service id.
        service: &'static str,
        /// Request URL.
        url: String,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// The request exceeded its timeout.
    #[error("timeout calling {service} at {url}")]
    Timeout {
        /// Service id.
        service: &'static str,
        /// Request URL.
        url: String,
    },

    /// Unexpected HTTP status.
    #[error("{service} returned HTTP {status} for {url}")]
    HttpStatus {
        /// Service id.
        service: &'static str,
        /// Request URL.
        url: String,
        /// Status code.
        status: u16,
        /// Retry-After header value, when present.
        retry_after: Option<String>,
    },

    /// A request URL could not be built from the configured base URL.
    #[error("invalid {service} URL: {url}")]
    InvalidUrl {
        /// Service id.
        service: &'static str,
        /// The offending URL.
        url: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected {service} response: {reason}")]
    MalformedResponse {
        /// Service id.
        service: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a network error, promoting reqwest timeouts to [`ResolveError::Timeout`].
    pub fn network(service: &'static str, url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { service, url }
        } else {
            Self::Network {
                service,
                url,
                source,
            }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(
        service: &'static str,
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            service,
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(service: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::MalformedResponse {
            service,
            reason: reason.to_string(),
        }
    }

    /// Service id the failed call was addressed to.
    #[must_use]
    pub fn service(&self) -> &'static str {
        match self {
            Self::Network { service, .. }
            | Self::Timeout { service, .. }
            | Self::HttpStatus { service, .. }
            | Self::InvalidUrl { service, .. }
            | Self::MalformedResponse { service, .. } => service,
        }
    }

    /// True when a later attempt could plausibly succeed.
    ///
    /// Client errors other than 408 and 429 are permanent for the given
    /// request; everything else is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            Self::InvalidUrl { .. } => false,
            _ => true,
        }
    }
}
