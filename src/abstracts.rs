//! Abstract text for downloaded articles, from Europe PMC full-text XML.
//!
//! Only the first `<abstract>` element is read; markup is dropped and
//! whitespace collapsed. Answers are memoized per PMCID for the lifetime of
//! the fetcher, including "no abstract" answers.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tracing::{debug, instrument, warn};

use crate::config::ConfigurationError;
use crate::parser::format_pmcid;
use crate::rate_limiter::{RateLimiter, services};
use crate::resolver::build_lookup_client;

#[allow(clippy::expect_used)]
static ABSTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<abstract(?:\s[^>]*)?>(.*?)</abstract\s*>")
        .expect("abstract pattern is valid")
});

#[allow(clippy::expect_used)]
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag pattern is valid"));

/// Fetches and memoizes abstracts.
pub struct AbstractFetcher {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    memo: DashMap<String, Option<String>>,
}

impl AbstractFetcher {
    /// Creates a fetcher against the Europe PMC REST base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        email: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: build_lookup_client(services::EUROPE_PMC, email)?,
            limiter,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            memo: DashMap::new(),
        })
    }

    /// Abstract for a canonical PMCID, or `None` when unavailable.
    ///
    /// Network failures are logged and not memoized.
    #[instrument(skip(self), fields(pmcid = %format_pmcid(pmcid)))]
    pub async fn fetch(&self, pmcid: &str) -> Option<String> {
        if let Some(known) = self.memo.get(pmcid) {
            debug!("abstract memo hit");
            return known.clone();
        }

        let url = format!("{}/{}/fullTextXML", self.base_url, format_pmcid(pmcid));
        self.limiter.acquire(services::EUROPE_PMC).await;

        let response = match self
            .client
            .get(&url)
            .header(ACCEPT, "application/xml")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "full text request failed");
                return None;
            }
        };

        let status = response.status();
        let answer = if status.is_success() {
            match response.text().await {
                Ok(xml) => extract_abstract(&xml),
                Err(e) => {
                    warn!(error = %e, "failed to read full text body");
                    return None;
                }
            }
        } else if status.as_u16() == 404 {
            None
        } else {
            warn!(status = status.as_u16(), "full text request rejected");
            return None;
        };

        debug!(found = answer.is_some(), "abstract lookup finished");
        self.memo.insert(pmcid.to_string(), answer.clone());
        answer
    }
}

impl std::fmt::Debug for AbstractFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbstractFetcher")
            .field("base_url", &self.base_url)
            .field("memoized", &self.memo.len())
            .finish_non_exhaustive()
    }
}

/// Text of the first `<abstract>` element.
#[must_use]
pub fn extract_abstract(xml: &str) -> Option<String> {
    let inner = ABSTRACT_RE.captures(xml)?.get(1)?.as_str();
    let text = TAG_RE.replace_all(inner, " ");
    let text = decode_entities(&text);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
