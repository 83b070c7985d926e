//! Crossref fallback for DOIs Europe PMC does not index by DOI.
//!
//! Crossref never returns a PMCID itself. [`CrossrefTitleLookup`] fetches the
//! work's title from `works/{doi}` and hands it to a Europe PMC title search.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ConfigurationError;
use crate::rate_limiter::{RateLimiter, services};

use super::europe_pmc::EuropePmc;
use super::http_client::{build_lookup_client, build_url, get_json};
use super::{DoiLookup, LookupHit, ResolveError};

/// Default Crossref API base URL.
pub const DEFAULT_CROSSREF_BASE_URL: &str = "https://api.crossref.org";

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: Option<CrossrefMessage>,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    title: Option<Vec<String>>,
}

/// Client for Crossref `works/{doi}` metadata.
///
/// Requests carry a `mailto` parameter when an email is configured, which
/// routes them to Crossref's polite pool.
pub struct Crossref {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    mailto: Option<String>,
}

impl Crossref {
    /// Creates a client against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        mailto: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let mailto = mailto.filter(|m| !m.trim().is_empty() && !m.contains(['\n', '\r', '\0']));
        Ok(Self {
            client: build_lookup_client(services::CROSSREF, mailto.as_deref())?,
            limiter,
            base_url: base_url.into(),
            mailto,
        })
    }

    /// Fetches the first title of the work. A 404 is a definitive `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] for any other failure.
    #[instrument(skip(self), fields(service = services::CROSSREF))]
    pub async fn fetch_title(&self, doi: &str) -> Result<Option<String>, ResolveError> {
        let path = format!("works/{}", urlencoding::encode(doi));
        let query: Vec<(&str, &str)> = self
            .mailto
            .as_deref()
            .map(|m| vec![("mailto", m)])
            .unwrap_or_default();
        let url = build_url(services::CROSSREF, &self.base_url, &path, &query)?;

        let response: CrossrefResponse =
            match get_json(&self.client, &self.limiter, services::CROSSREF, url).await {
                Ok(response) => response,
                Err(ResolveError::HttpStatus { status: 404, .. }) => {
                    debug!("DOI not registered with Crossref");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };

        let message = response
            .message
            .ok_or_else(|| ResolveError::malformed(services::CROSSREF, "missing message"))?;
        Ok(message
            .title
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .find(|t| !t.is_empty()))
    }
}

impl std::fmt::Debug for Crossref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crossref")
            .field("base_url", &self.base_url)
            .field("mailto", &self.mailto)
            .finish_non_exhaustive()
    }
}

/// DOI lookup chaining a Crossref title fetch into a Europe PMC title search.
#[derive(Debug)]
pub struct CrossrefTitleLookup {
    crossref: Crossref,
    europe_pmc: Arc<EuropePmc>,
}

impl CrossrefTitleLookup {
    /// Combines the two clients.
    #[must_use]
    pub fn new(crossref: Crossref, europe_pmc: Arc<EuropePmc>) -> Self {
        Self {
            crossref,
            europe_pmc,
        }
    }
}

#[async_trait]
impl DoiLookup for CrossrefTitleLookup {
    fn name(&self) -> &'static str {
        services::CROSSREF
    }

    async fn lookup(&self, doi: &str) -> Result<Option<LookupHit>, ResolveError> {
        let Some(title) = self.crossref.fetch_title(doi).await? else {
            return Ok(None);
        };
        debug!(doi, title = %title, "searching Europe PMC by Crossref title");
        self.europe_pmc.search_title(&title).await
    }
}
