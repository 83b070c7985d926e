//! Shared HTTP plumbing for lookup services.
//!
//! Every lookup client is built here with the same timeout, user-agent and
//! compression policy, and every JSON call goes through [`get_json`] so rate
//! limiting, status mapping and `Retry-After` handling stay uniform.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::ConfigurationError;
use crate::rate_limiter::{RateLimiter, parse_retry_after};
use crate::user_agent;

use super::ResolveError;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

/// Builds the HTTP client used by lookup services.
///
/// # Errors
///
/// Returns [`ConfigurationError::HttpClient`] when the TLS backend or
/// system configuration prevents client construction.
pub fn build_lookup_client(
    service: &str,
    email: Option<&str>,
) -> Result<Client, ConfigurationError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
        .user_agent(user_agent::lookup_user_agent(email))
        .gzip(true)
        .build()
        .map_err(|e| ConfigurationError::http_client(service, e))
}

/// Builds `base` joined with `path` and the given query pairs.
pub(crate) fn build_url(
    service: &'static str,
    base: &str,
    path: &str,
    query: &[(&str, &str)],
) -> Result<Url, ResolveError> {
    let raw = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse_with_params(&raw, query).map_err(|_| ResolveError::InvalidUrl { service, url: raw })
}

/// Performs one rate-limited GET and decodes the JSON body.
///
/// A 429 response with `Retry-After` defers the next grant for `service`
/// before the error is returned.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    limiter: &RateLimiter,
    service: &'static str,
    url: Url,
) -> Result<T, ResolveError> {
    limiter.acquire(service).await;

    debug!(service, url = %url, "calling lookup service");
    let response = client
        .get(url.clone())
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| ResolveError::network(service, url.as_str(), e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        if status.as_u16() == 429
            && let Some(delay) = retry_after.as_deref().and_then(parse_retry_after)
        {
            warn!(service, delay_secs = delay.as_secs(), "lookup service rate limited");
            limiter.record_rate_limit(service, delay).await;
        }

        return Err(ResolveError::http_status(
            service,
            url.as_str(),
            status.as_u16(),
            retry_after,
        ));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| ResolveError::network(service, url.as_str(), e))?;

    serde_json::from_slice(&body).map_err(|e| ResolveError::malformed(service, e))
}
