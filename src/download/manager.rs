//! Concurrent PDF downloads with cache check and ordered source fallback.
//!
//! # Concurrency Model
//!
//! - Each request runs in its own Tokio task
//! - A semaphore permit is acquired before a task is spawned, so at most
//!   `concurrency` requests are in flight
//! - Permits are released when tasks finish (RAII)
//! - Results are collected by awaiting handles in submission order
//!
//! # Per-request flow
//!
//! `open_access == Some(false)` short-circuits to `NotOpenAccess`. Otherwise
//! the download cache is consulted; a recorded file that still exists is a
//! `CacheHit`. Then, after the courtesy delay, each source is tried once in
//! order until one yields a PDF.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::filename::pdf_filename;
use super::source::{Source, default_sources};
use crate::cache::{CacheStore, NS_DOWNLOAD};
use crate::config::{Config, ConfigurationError};
use crate::parser::format_pmcid;
use crate::rate_limiter::{RateLimiter, parse_retry_after};

/// One PMCID to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Canonical PMCID (digits only).
    pub pmcid: String,
    /// DOI, used in the output file name when known.
    pub doi: Option<String>,
    /// Open-access flag from resolution; `Some(false)` skips all sources.
    pub open_access: Option<bool>,
}

impl DownloadRequest {
    /// A request with only a PMCID.
    #[must_use]
    pub fn new(pmcid: impl Into<String>) -> Self {
        Self {
            pmcid: pmcid.into(),
            doi: None,
            open_access: None,
        }
    }

    /// Sets the DOI.
    #[must_use]
    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    /// Sets the open-access flag.
    #[must_use]
    pub fn with_open_access(mut self, open_access: Option<bool>) -> Self {
        self.open_access = open_access;
        self
    }
}

impl From<&str> for DownloadRequest {
    fn from(pmcid: &str) -> Self {
        Self::new(pmcid)
    }
}

impl From<String> for DownloadRequest {
    fn from(pmcid: String) -> Self {
        Self::new(pmcid)
    }
}

/// Final state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// A source delivered the PDF.
    Success,
    /// A previous download is still on disk.
    CacheHit,
    /// Known not to be open access; no source was tried.
    NotOpenAccess,
    /// Every source failed.
    SourceExhausted,
    /// The batch was aborted before this request was dispatched.
    Cancelled,
}

impl DownloadStatus {
    /// Stable snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CacheHit => "cache_hit",
            Self::NotOpenAccess => "not_open_access",
            Self::SourceExhausted => "source_exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    /// True when a PDF is available locally.
    #[must_use]
    pub fn has_file(self) -> bool {
        matches!(self, Self::Success | Self::CacheHit)
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source tried for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttempt {
    /// Source name.
    pub source: String,
    /// URL fetched.
    pub url: String,
    /// Failure description; `None` for the successful attempt.
    pub error: Option<String>,
}

/// Outcome of one request.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Canonical PMCID.
    pub pmcid: String,
    /// Final status.
    pub status: DownloadStatus,
    /// Local PDF path for `Success` and `CacheHit`.
    pub path: Option<PathBuf>,
    /// Sources tried, in order.
    pub attempts: Vec<SourceAttempt>,
    /// Wall time spent on the request.
    pub elapsed: Duration,
}

impl DownloadResult {
    fn finished(
        request: &DownloadRequest,
        status: DownloadStatus,
        path: Option<PathBuf>,
        attempts: Vec<SourceAttempt>,
        started: Instant,
    ) -> Self {
        Self {
            pmcid: request.pmcid.clone(),
            status,
            path,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    fn cancelled(request: &DownloadRequest) -> Self {
        Self {
            pmcid: request.pmcid.clone(),
            status: DownloadStatus::Cancelled,
            path: None,
            attempts: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

/// Cached record of a completed download.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadRecord {
    path: PathBuf,
    source: String,
    bytes: u64,
    downloaded_at: u64,
}

/// Live counters, readable while a batch runs.
#[derive(Debug, Default)]
pub struct DownloadStats {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    cache_hits: AtomicUsize,
    not_open_access: AtomicUsize,
    exhausted: AtomicUsize,
    cancelled: AtomicUsize,
}

impl DownloadStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests submitted in the current batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Requests downloaded from a source.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Requests served from the download cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Requests skipped as not open access.
    #[must_use]
    pub fn not_open_access(&self) -> usize {
        self.not_open_access.load(Ordering::SeqCst)
    }

    /// Requests for which every source failed.
    #[must_use]
    pub fn exhausted(&self) -> usize {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Requests never dispatched because of an abort.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Requests with a final status.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.succeeded()
            + self.cache_hits()
            + self.not_open_access()
            + self.exhausted()
            + self.cancelled()
    }

    fn record(&self, status: DownloadStatus) {
        let counter = match status {
            DownloadStatus::Success => &self.succeeded,
            DownloadStatus::CacheHit => &self.cache_hits,
            DownloadStatus::NotOpenAccess => &self.not_open_access,
            DownloadStatus::SourceExhausted => &self.exhausted,
            DownloadStatus::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stops dispatch of further requests. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Requests an abort. In-flight downloads finish; the rest are `Cancelled`.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether an abort was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// State shared by every download task.
struct Worker {
    sources: Vec<Arc<dyn Source>>,
    cache: CacheStore,
    limiter: Arc<RateLimiter>,
    output_dir: PathBuf,
    ttl: Duration,
    delay: Duration,
    jitter: Duration,
    stats: Arc<DownloadStats>,
}

/// Bounded-concurrency PDF downloader.
pub struct DownloadManager {
    worker: Arc<Worker>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    abort: AbortHandle,
}

impl DownloadManager {
    /// Creates a manager over explicit sources.
    ///
    /// Concurrency, output directory, TTL and courtesy delay come from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when `config` fails validation.
    #[instrument(level = "debug", skip_all, fields(concurrency = config.concurrency, sources = sources.len()))]
    pub fn new(
        config: &Config,
        sources: Vec<Arc<dyn Source>>,
        cache: CacheStore,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let concurrency = config.concurrency;

        debug!(
            concurrency,
            output_dir = %config.output_dir.display(),
            rate_limit_disabled = limiter.is_disabled(),
            "creating download manager"
        );

        Ok(Self {
            worker: Arc::new(Worker {
                sources,
                cache,
                limiter,
                output_dir: config.output_dir.clone(),
                ttl: config.download_ttl(),
                delay: config.courtesy_delay(),
                jitter: config.courtesy_jitter(),
                stats: Arc::new(DownloadStats::new()),
            }),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            abort: AbortHandle::default(),
        })
    }

    /// Creates a manager over the standard PMC and Europe PMC sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] on invalid configuration or when the
    /// HTTP client cannot be built.
    pub fn from_config(
        config: &Config,
        cache: CacheStore,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ConfigurationError> {
        let client = HttpClient::new(config.email.as_deref())?;
        let sources = default_sources(&config.endpoints, &client);
        Self::new(config, sources, cache, limiter)
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Handle that stops dispatch of the running batch.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Live counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        Arc::clone(&self.worker.stats)
    }

    /// Downloads every request, returning one result per request in input order.
    ///
    /// Individual failures never fail the batch.
    #[instrument(skip_all, fields(requests = requests.len(), concurrency = self.concurrency))]
    pub async fn download_all(&self, requests: Vec<DownloadRequest>) -> Vec<DownloadResult> {
        let stats = &self.worker.stats;
        stats.total.fetch_add(requests.len(), Ordering::SeqCst);

        if let Err(e) = tokio::fs::create_dir_all(&self.worker.output_dir).await {
            warn!(
                output_dir = %self.worker.output_dir.display(),
                error = %e,
                "cannot create output directory; downloads will fail"
            );
        }

        info!("starting downloads");

        let mut pending: Vec<(DownloadRequest, Option<JoinHandle<DownloadResult>>)> =
            Vec::with_capacity(requests.len());

        for request in requests {
            if self.abort.is_aborted() {
                pending.push((request, None));
                continue;
            }

            let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                warn!("download semaphore closed; cancelling remaining requests");
                self.abort.abort();
                pending.push((request, None));
                continue;
            };

            // Abort may have arrived while waiting for a permit.
            if self.abort.is_aborted() {
                drop(permit);
                pending.push((request, None));
                continue;
            }

            let worker = Arc::clone(&self.worker);
            let task_request = request.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                worker.process(task_request).await
            });
            pending.push((request, Some(handle)));
        }

        debug!(task_count = pending.len(), "waiting for downloads to complete");

        let mut results = Vec::with_capacity(pending.len());
        for (request, handle) in pending {
            let result = match handle {
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(pmcid = %request.pmcid, error = %e, "download task panicked");
                        let result = DownloadResult {
                            pmcid: request.pmcid.clone(),
                            status: DownloadStatus::SourceExhausted,
                            path: None,
                            attempts: Vec::new(),
                            elapsed: Duration::ZERO,
                        };
                        stats.record(result.status);
                        result
                    }
                },
                None => {
                    stats.record(DownloadStatus::Cancelled);
                    DownloadResult::cancelled(&request)
                }
            };
            results.push(result);
        }

        info!(
            succeeded = stats.succeeded(),
            cache_hits = stats.cache_hits(),
            not_open_access = stats.not_open_access(),
            exhausted = stats.exhausted(),
            cancelled = stats.cancelled(),
            "downloads complete"
        );
        results
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<&str> = self.worker.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("DownloadManager")
            .field("concurrency", &self.concurrency)
            .field("sources", &sources)
            .field("output_dir", &self.worker.output_dir)
            .finish_non_exhaustive()
    }
}

impl Worker {
    #[instrument(skip_all, fields(pmcid = %format_pmcid(&request.pmcid)))]
    async fn process(&self, request: DownloadRequest) -> DownloadResult {
        let started = Instant::now();

        let result = if request.open_access == Some(false) {
            debug!("not open access, skipping sources");
            DownloadResult::finished(&request, DownloadStatus::NotOpenAccess, None, Vec::new(), started)
        } else if let Some(path) = self.cached_path(&request.pmcid).await {
            debug!(path = %path.display(), "download cache hit");
            DownloadResult::finished(&request, DownloadStatus::CacheHit, Some(path), Vec::new(), started)
        } else {
            self.courtesy_pause().await;
            self.try_sources(&request, started).await
        };

        self.stats.record(result.status);
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = result.elapsed.as_millis() as u64;
        info!(status = %result.status, attempts = result.attempts.len(), elapsed_ms, "download finished");
        result
    }

    /// Path of a cached download whose file still exists.
    async fn cached_path(&self, pmcid: &str) -> Option<PathBuf> {
        let record = match self.cache.get::<DownloadRecord>(NS_DOWNLOAD, pmcid).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "download cache unreadable");
                return None;
            }
        };

        if tokio::fs::try_exists(&record.path).await.unwrap_or(false) {
            return Some(record.path);
        }

        debug!(path = %record.path.display(), "cached file is gone, invalidating entry");
        if let Err(e) = self.cache.invalidate(NS_DOWNLOAD, pmcid).await {
            debug!(error = %e, "failed to invalidate download cache entry");
        }
        None
    }

    async fn courtesy_pause(&self) {
        let jitter = self.jitter.mul_f64(rand::random::<f64>());
        let pause = self.delay + jitter;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    async fn try_sources(&self, request: &DownloadRequest, started: Instant) -> DownloadResult {
        let dest = self
            .output_dir
            .join(pdf_filename(&request.pmcid, request.doi.as_deref()));
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let url = source.url(&request.pmcid);
            self.limiter.acquire(source.service_id()).await;

            match source.fetch(&request.pmcid, &dest).await {
                Ok(bytes) => {
                    debug!(source = source.name(), bytes, "source delivered PDF");
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        url,
                        error: None,
                    });
                    self.remember(&request.pmcid, &dest, source.name(), bytes).await;
                    return DownloadResult::finished(
                        request,
                        DownloadStatus::Success,
                        Some(dest),
                        attempts,
                        started,
                    );
                }
                Err(e) => {
                    if let Some(delay) = e.rate_limit_retry_after().and_then(parse_retry_after) {
                        self.limiter.record_rate_limit(source.service_id(), delay).await;
                    }
                    debug!(source = source.name(), error = %e, "source failed, trying next");
                    attempts.push(SourceAttempt {
                        source: source.name().to_string(),
                        url,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        warn!(attempts = attempts.len(), "all sources failed");
        DownloadResult::finished(request, DownloadStatus::SourceExhausted, None, attempts, started)
    }

    async fn remember(&self, pmcid: &str, path: &Path, source: &str, bytes: u64) {
        let record = DownloadRecord {
            path: path.to_path_buf(),
            source: source.to_string(),
            bytes,
            downloaded_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        if let Err(e) = self.cache.put(NS_DOWNLOAD, pmcid, &record, Some(self.ttl)).await {
            warn!(error = %e, "failed to cache download record");
        }
    }
}
