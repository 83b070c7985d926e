//! Europe PMC REST lookups: PMID batches, DOI search and title search.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ConfigurationError;
use crate::parser::normalize_pmcid;
use crate::rate_limiter::{RateLimiter, services};

use super::http_client::{build_lookup_client, build_url, get_json};
use super::{DoiLookup, LookupHit, PmidLookup, ResolveError};

/// Default Europe PMC REST base URL.
pub const DEFAULT_EUROPE_PMC_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

/// Page size for DOI and title searches.
const SEARCH_PAGE_SIZE: usize = 25;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    result_list: Option<ResultList>,
}

#[derive(Debug, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    pmid: Option<String>,
    pmcid: Option<String>,
    doi: Option<String>,
    is_open_access: Option<String>,
}

impl SearchResult {
    fn hit(&self) -> Option<LookupHit> {
        let pmcid = normalize_pmcid(self.pmcid.as_deref()?)?;
        let open_access = match self.is_open_access.as_deref() {
            Some(flag) if flag.eq_ignore_ascii_case("y") => Some(true),
            Some(flag) if flag.eq_ignore_ascii_case("n") => Some(false),
            _ => None,
        };
        Some(LookupHit { pmcid, open_access })
    }
}

/// Client for the Europe PMC `search` endpoint.
///
/// Serves as a PMID lookup, the primary DOI lookup, and the title search
/// behind the Crossref fallback.
pub struct EuropePmc {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
}

impl EuropePmc {
    /// Creates a client against `base_url`.
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
            base_url: base_url.into(),
        })
    }

    async fn search(&self, query: &str, page_size: usize) -> Result<Vec<SearchResult>, ResolveError> {
        let page_size = page_size.to_string();
        let url = build_url(
            services::EUROPE_PMC,
            &self.base_url,
            "search",
            &[
                ("query", query),
                ("format", "json"),
                ("resultType", "lite"),
                ("pageSize", page_size.as_str()),
            ],
        )?;
        let response: SearchResponse =
            get_json(&self.client, &self.limiter, services::EUROPE_PMC, url).await?;
        response
            .result_list
            .map(|list| list.result)
            .ok_or_else(|| ResolveError::malformed(services::EUROPE_PMC, "missing resultList"))
    }

    /// Searches by exact title and returns the first result carrying a PMCID.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when the search call fails.
    #[instrument(skip(self), fields(service = services::EUROPE_PMC))]
    pub async fn search_title(&self, title: &str) -> Result<Option<LookupHit>, ResolveError> {
        let cleaned = title.replace('"', " ");
        let query = format!("TITLE:\"{}\"", cleaned.trim());
        let results = self.search(&query, SEARCH_PAGE_SIZE).await?;
        Ok(results.iter().find_map(SearchResult::hit))
    }
}

impl std::fmt::Debug for EuropePmc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EuropePmc")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PmidLookup for EuropePmc {
    fn name(&self) -> &'static str {
        services::EUROPE_PMC
    }

    #[instrument(skip(self, pmids), fields(service = services::EUROPE_PMC, batch = pmids.len()))]
    async fn lookup_batch(&self, pmids: &[String]) -> Result<HashMap<String, LookupHit>, ResolveError> {
        let query = pmid_batch_query(pmids);
        let results = self.search(&query, pmids.len().max(1)).await?;

        let requested: HashSet<&str> = pmids.iter().map(String::as_str).collect();
        let hits: HashMap<String, LookupHit> = results
            .iter()
            .filter(|row| row.pmid.as_deref().is_some_and(|p| requested.contains(p)))
            .filter_map(|row| Some((row.pmid.clone()?, row.hit()?)))
            .collect();
        debug!(requested = pmids.len(), matched = hits.len(), "Europe PMC batch parsed");
        Ok(hits)
    }
}

#[async_trait]
impl DoiLookup for EuropePmc {
    fn name(&self) -> &'static str {
        services::EUROPE_PMC
    }

    #[instrument(skip(self), fields(service = services::EUROPE_PMC))]
    async fn lookup(&self, doi: &str) -> Result<Option<LookupHit>, ResolveError> {
        let query = format!("DOI:\"{doi}\"");
        let results = self.search(&query, SEARCH_PAGE_SIZE).await?;
        Ok(match_doi(&results, doi))
    }
}

fn pmid_batch_query(pmids: &[String]) -> String {
    let ids: Vec<String> = pmids.iter().map(|pmid| format!("EXT_ID:{pmid}")).collect();
    format!("({}) AND SRC:MED", ids.join(" OR "))
}

/// First row whose DOI equals `doi` ignoring ASCII case and carries a PMCID.
fn match_doi(results: &[SearchResult], doi: &str) -> Option<LookupHit> {
    results
        .iter()
        .filter(|row| row.doi.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(doi)))
        .find_map(SearchResult::hit)
}
