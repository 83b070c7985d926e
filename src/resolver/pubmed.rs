//! NCBI E-utilities lookup: PMID → PMCID via `esummary`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::config::ConfigurationError;
use crate::parser::normalize_pmcid;
use crate::rate_limiter::{RateLimiter, services};

use super::http_client::{build_lookup_client, build_url, get_json};
use super::{LookupHit, PmidLookup, ResolveError};

/// Default E-utilities base URL.
pub const DEFAULT_EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Tool name reported to NCBI with every request.
const NCBI_TOOL: &str = "pmcfetch";

#[derive(Debug, Deserialize)]
struct EsummaryResponse {
    result: Option<EsummaryResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsummaryResult {
    #[serde(default)]
    uids: Vec<String>,
    #[serde(flatten)]
    records: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct EsummaryRecord {
    #[serde(default)]
    articleids: Vec<ArticleId>,
}

#[derive(Debug, Deserialize)]
struct ArticleId {
    idtype: String,
    value: String,
}

/// PMID lookup backed by NCBI `esummary.fcgi`.
///
/// One request covers a whole batch; the caller keeps batches at or below
/// [`MAX_BATCH_SIZE`](super::MAX_BATCH_SIZE).
pub struct NcbiEutils {
    client: Client,
    limiter: Arc<RateLimiter>,
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl NcbiEutils {
    /// Creates a lookup against `base_url` (use [`DEFAULT_EUTILS_BASE_URL`] in production).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        email: Option<String>,
        api_key: Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let client = build_lookup_client(services::NCBI_EUTILS, email.as_deref())?;
        Ok(Self {
            client,
            limiter,
            base_url: base_url.into(),
            email,
            api_key,
        })
    }
}

impl std::fmt::Debug for NcbiEutils {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NcbiEutils")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PmidLookup for NcbiEutils {
    fn name(&self) -> &'static str {
        services::NCBI_EUTILS
    }

    #[instrument(skip(self, pmids), fields(service = services::NCBI_EUTILS, batch = pmids.len()))]
    async fn lookup_batch(&self, pmids: &[String]) -> Result<HashMap<String, LookupHit>, ResolveError> {
        let ids = pmids.join(",");
        let mut query = vec![
            ("db", "pubmed"),
            ("retmode", "json"),
            ("id", ids.as_str()),
            ("tool", NCBI_TOOL),
        ];
        if let Some(email) = self.email.as_deref() {
            query.push(("email", email));
        }
        if let Some(key) = self.api_key.as_deref() {
            query.push(("api_key", key));
        }

        let url = build_url(services::NCBI_EUTILS, &self.base_url, "esummary.fcgi", &query)?;
        let response: EsummaryResponse =
            get_json(&self.client, &self.limiter, services::NCBI_EUTILS, url).await?;

        let hits = parse_esummary(response)?;
        debug!(requested = pmids.len(), matched = hits.len(), "esummary batch parsed");
        Ok(hits)
    }
}

/// Extracts PMID → PMCID pairs. A response without a `result` object is
/// malformed; a uid without a `pmc` article id is simply absent.
fn parse_esummary(response: EsummaryResponse) -> Result<HashMap<String, LookupHit>, ResolveError> {
    let Some(mut result) = response.result else {
        let reason = response
            .error
            .unwrap_or_else(|| "missing result object".to_string());
        return Err(ResolveError::malformed(services::NCBI_EUTILS, reason));
    };

    let mut hits = HashMap::new();
    for uid in result.uids {
        let Some(raw) = result.records.remove(&uid) else {
            continue;
        };
        let record: EsummaryRecord = serde_json::from_value(raw).unwrap_or_default();
        let pmcid = record
            .articleids
            .iter()
            .find(|id| id.idtype.eq_ignore_ascii_case("pmc"))
            .and_then(|id| normalize_pmcid(&id.value));
        if let Some(pmcid) = pmcid {
            hits.insert(
                uid,
                LookupHit {
                    pmcid,
                    open_access: None,
                },
            );
        }
    }
    Ok(hits)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<HashMap<String, LookupHit>, ResolveError> {
        parse_esummary(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn test_parse_esummary_extracts_pmc_article_ids() {
        let hits = parse(
            r#"{
                "header": {"type": "esummary"},
                "result": {
                    "uids": ["38238491", "111"],
                    "38238491": {
                        "uid": "38238491",
                        "articleids": [
                            {"idtype": "pubmed", "value": "38238491"},
                            {"idtype": "pmc", "value": "PMC10802741"},
                            {"idtype": "doi", "value": "10.1000/xyz"}
                        ]
                    },
                    "111": {
                        "uid": "111",
                        "articleids": [{"idtype": "pubmed", "value": "111"}]
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["38238491"].pmcid, "10802741");
    }

    #[test]
    fn test_parse_esummary_tolerates_error_records() {
        let hits = parse(
            r#"{"result": {"uids": ["9"], "9": {"uid": "9", "error": "cannot get document summary"}}}"#,
        )
        .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_parse_esummary_without_result_is_malformed() {
        let err = parse(r#"{"error": "API rate limit exceeded"}"#).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedResponse { .. }));
        assert!(err.to_string().contains("API rate limit exceeded"));
    }
}
