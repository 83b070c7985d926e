//! Per-service rate limiting for outbound requests.
//!
//! This module provides the [`RateLimiter`] struct which enforces a minimum
//! interval between requests to the same external service, so that bulk
//! lookups and downloads stay inside the documented request ceilings of
//! NCBI, Europe PMC and Crossref.
//!
//! # Overview
//!
//! Each service is identified by a short id (see [`services`]). Requests to
//! different services proceed independently; only subsequent requests to the
//! *same* service are spaced. Contending callers are not served in strict
//! arrival order.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pmcfetch_core::rate_limiter::{RateLimiter, services};
//!
//! # async fn example() {
//! let limiter = Arc::new(
//!     RateLimiter::new(Duration::from_secs(1))
//!         .with_interval(services::NCBI_EUTILS, Duration::from_millis(334)),
//! );
//!
//! // First request proceeds immediately
//! limiter.acquire(services::NCBI_EUTILS).await;
//!
//! // Second request to the same service waits ~334ms
//! limiter.acquire(services::NCBI_EUTILS).await;
//!
//! // A different service is not affected
//! limiter.acquire(services::CROSSREF).await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Well-known service ids used across the crate.
pub mod services {
    /// NCBI E-utilities (esummary).
    pub const NCBI_EUTILS: &str = "ncbi_eutils";
    /// Europe PMC REST API (search, full text XML).
    pub const EUROPE_PMC: &str = "europe_pmc";
    /// Crossref REST API.
    pub const CROSSREF: &str = "crossref";
    /// PubMed Central article PDFs.
    pub const PMC: &str = "pmc";
    /// Europe PMC PDF rendering endpoint.
    pub const EUROPE_PMC_RENDER: &str = "europe_pmc_render";
}

/// Warning threshold for cumulative delay per service (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-service rate limiter.
///
/// Wrap in `Arc` and share across tasks. Per-service state lives in a
/// `DashMap`; the timing of each service is guarded by a `tokio::sync::Mutex`
/// so the check-sleep-update sequence is atomic per service.
#[derive(Debug)]
pub struct RateLimiter {
    /// Interval for services without an explicit entry.
    default_interval: Duration,

    /// Explicit per-service intervals.
    intervals: HashMap<String, Duration>,

    /// Whether rate limiting is disabled.
    disabled: bool,

    /// Per-service state.
    /// The Arc is cloned out so the `DashMap` shard lock is released before
    /// awaiting on the inner Mutex.
    services: DashMap<String, Arc<ServiceState>>,
}

/// State tracked for each service.
#[derive(Debug)]
struct ServiceState {
    /// Earliest instant the next grant may happen.
    /// `None` until the first grant (first request is immediate).
    next_allowed: Mutex<Option<Instant>>,

    /// Cumulative delay applied to this service (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Adds to the cumulative delay and returns the new total.
    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter applying `default_interval` to every service.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = default_interval.as_millis()))]
    pub fn new(default_interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_interval,
            intervals: HashMap::new(),
            disabled: false,
            services: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    #[instrument]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_interval: Duration::ZERO,
            intervals: HashMap::new(),
            disabled: true,
            services: DashMap::new(),
        }
    }

    /// Sets the minimum interval for one service.
    #[must_use]
    pub fn with_interval(mut self, service_id: &str, interval: Duration) -> Self {
        self.intervals.insert(service_id.to_string(), interval);
        self
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the minimum interval enforced for `service_id`.
    #[must_use]
    pub fn min_interval(&self, service_id: &str) -> Duration {
        if self.disabled {
            return Duration::ZERO;
        }
        self.intervals
            .get(service_id)
            .copied()
            .unwrap_or(self.default_interval)
    }

    fn state(&self, service_id: &str) -> Arc<ServiceState> {
        self.services
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(ServiceState::new()))
            .clone()
    }

    /// Waits until a request to `service_id` is allowed, then records the grant.
    ///
    /// The first request to any service proceeds immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, service_id: &str) {
        if self.disabled {
            return;
        }

        let interval = self.min_interval(service_id);
        let state = self.state(service_id);

        // Only the per-service Mutex is held across the sleep.
        let mut next_allowed = state.next_allowed.lock().await;

        if let Some(at) = *next_allowed {
            let now = Instant::now();
            if at > now {
                let delay = at - now;
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    service = service_id,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        service = service_id,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - consider reducing batch size for this service"
                    );
                }

                tokio::time::sleep_until(at).await;
            }
        } else {
            debug!(service = service_id, "first request to service - no delay");
        }

        *next_allowed = Some(Instant::now() + interval);
    }

    /// Records a server-mandated delay (from a `Retry-After` header).
    ///
    /// The next grant for `service_id` is pushed back to at least
    /// `now + delay`.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, service_id: &str, delay: Duration) {
        if self.disabled {
            return;
        }

        let state = self.state(service_id);
        let cumulative = state.add_cumulative_delay(delay);
        let until = Instant::now() + delay;

        let mut next_allowed = state.next_allowed.lock().await;
        if next_allowed.is_none_or(|at| at < until) {
            *next_allowed = Some(until);
        }

        debug!(
            service = service_id,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                service = service_id,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - service may be under heavy load"
            );
        }
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-date (RFC 7231). Returns `None` when
/// the value cannot be parsed. Values above one hour are capped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pmcfetch_core::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);

        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }

        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_min_interval_uses_default_and_overrides() {
        let limiter = RateLimiter::new(Duration::from_millis(500))
            .with_interval(services::CROSSREF, Duration::from_secs(1));
        assert_eq!(limiter.min_interval("anything"), Duration::from_millis(500));
        assert_eq!(limiter.min_interval(services::CROSSREF), Duration::from_secs(1));
        assert!(!limiter.is_disabled());
    }

    #[test]
    fn test_disabled_has_zero_interval() {
        let limiter = RateLimiter::disabled().with_interval(services::PMC, Duration::from_secs(5));
        assert!(limiter.is_disabled());
        assert_eq!(limiter.min_interval(services::PMC), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_disabled_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::disabled();
        let start = Instant::now();

        limiter.acquire(services::NCBI_EUTILS).await;
        limiter.acquire(services::NCBI_EUTILS).await;
        limiter.acquire(services::NCBI_EUTILS).await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_first_request_no_delay() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire(services::EUROPE_PMC).await;

        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_delays_same_service() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire(services::CROSSREF).await;
        assert!(start.elapsed() < Duration::from_millis(10));

        limiter.acquire(services::CROSSREF).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));

        limiter.acquire(services::CROSSREF).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_per_service_interval_applies() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_secs(1))
            .with_interval(services::NCBI_EUTILS, Duration::from_millis(334));
        let start = Instant::now();

        limiter.acquire(services::NCBI_EUTILS).await;
        limiter.acquire(services::NCBI_EUTILS).await;
        limiter.acquire(services::NCBI_EUTILS).await;

        assert!(start.elapsed() >= Duration::from_millis(668));
        assert!(start.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_different_services_independent() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_secs(1));

        let start = Instant::now();
        limiter.acquire(services::PMC).await;
        limiter.acquire(services::EUROPE_PMC_RENDER).await;
        limiter.acquire(services::CROSSREF).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_spaced() {
        tokio::time::pause();

        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(200)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire(services::EUROPE_PMC).await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_record_rate_limit_defers_next_grant() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_millis(100));
        limiter.acquire(services::NCBI_EUTILS).await;
        limiter
            .record_rate_limit(services::NCBI_EUTILS, Duration::from_secs(5))
            .await;

        let start = Instant::now();
        limiter.acquire(services::NCBI_EUTILS).await;
        assert!(start.elapsed() >= Duration::from_millis(4900));
    }

    #[tokio::test]
    async fn test_record_rate_limit_tracks_cumulative() {
        let limiter = RateLimiter::new(Duration::from_secs(1));

        limiter
            .record_rate_limit(services::CROSSREF, Duration::from_secs(5))
            .await;
        limiter
            .record_rate_limit(services::CROSSREF, Duration::from_secs(10))
            .await;

        let state = limiter.services.get(services::CROSSREF).unwrap();
        assert_eq!(state.cumulative_delay_ms.load(Ordering::SeqCst), 15000);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("  120  "), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("-5"), None);
        assert_eq!(parse_retry_after(""), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_past() {
        let past_date = "Wed, 01 Jan 2020 00:00:00 GMT";
        assert_eq!(parse_retry_after(past_date), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_http_date_future() {
        let future_time = std::time::SystemTime::now() + Duration::from_secs(60);
        let future_date = httpdate::fmt_http_date(future_time);

        let duration = parse_retry_after(&future_date).unwrap();
        assert!(
            duration >= Duration::from_secs(55) && duration <= Duration::from_secs(65),
            "Duration should be ~60s, got {duration:?}"
        );
    }
}
