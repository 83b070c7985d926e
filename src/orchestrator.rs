//! End-to-end batch runs: classify, resolve, download, report.
//!
//! [`Orchestrator::run`] returns exactly one [`ReportEntry`] per input token,
//! in input order, whatever happened to it. Only configuration problems fail
//! a run; per-identifier failures are recorded in the entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::abstracts::AbstractFetcher;
use crate::cache::{CacheError, CacheStore};
use crate::config::{Config, ConfigurationError};
use crate::download::{
    AbortHandle, DownloadManager, DownloadRequest, DownloadResult, DownloadStats, DownloadStatus,
};
use crate::parser::{ClassifyHint, Identifier, IdentifierKind, classify_all, format_pmcid};
use crate::rate_limiter::RateLimiter;
use crate::resolver::{IdentifierResolver, Resolution};

/// File name of the JSON report inside the output directory.
pub const REPORT_FILE_NAME: &str = "download_results.json";

/// Final state of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// PDF downloaded this run.
    Success,
    /// PDF already on disk from an earlier run.
    CacheHit,
    /// Resolution reported the article is not open access.
    NotOpenAccess,
    /// Every source failed.
    SourceExhausted,
    /// PMID or DOI with no PMCID, or the lookup failed.
    Unresolved,
    /// Token was not a recognizable identifier.
    Invalid,
    /// Batch was aborted before this item started.
    Cancelled,
}

impl ReportStatus {
    /// Snake-case label, as serialized.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CacheHit => "cache_hit",
            Self::NotOpenAccess => "not_open_access",
            Self::SourceExhausted => "source_exhausted",
            Self::Unresolved => "unresolved",
            Self::Invalid => "invalid",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<DownloadStatus> for ReportStatus {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Success => Self::Success,
            DownloadStatus::CacheHit => Self::CacheHit,
            DownloadStatus::NotOpenAccess => Self::NotOpenAccess,
            DownloadStatus::SourceExhausted => Self::SourceExhausted,
            DownloadStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Token exactly as given.
    pub original_input: String,
    /// Detected kind.
    pub identifier_type: IdentifierKind,
    /// `PMC`-prefixed PMCID, when known.
    pub resolved_pmcid: Option<String>,
    /// Outcome.
    pub status: ReportStatus,
    /// PDF location for `success` and `cache_hit`.
    pub local_path: Option<PathBuf>,
    /// Wall time spent downloading.
    pub elapsed_ms: u64,
    /// Source names in the order they were tried.
    pub attempted_sources: Vec<String>,
    /// Human-readable explanation.
    pub detail: String,
    /// Abstract text, when requested and available.
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

impl ReportEntry {
    fn without_download(identifier: &Identifier, status: ReportStatus, detail: String) -> Self {
        Self {
            original_input: identifier.raw().to_string(),
            identifier_type: identifier.kind(),
            resolved_pmcid: None,
            status,
            local_path: None,
            elapsed_ms: 0,
            attempted_sources: Vec::new(),
            detail,
            abstract_text: None,
        }
    }

    fn from_download(identifier: &Identifier, result: &DownloadResult, via: Option<String>) -> Self {
        let status = ReportStatus::from(result.status);
        let outcome = download_detail(result);
        let detail = match via {
            Some(via) => format!("{via}; {outcome}"),
            None => outcome,
        };
        Self {
            original_input: identifier.raw().to_string(),
            identifier_type: identifier.kind(),
            resolved_pmcid: Some(format_pmcid(&result.pmcid)),
            status,
            local_path: result.path.clone(),
            elapsed_ms: u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            attempted_sources: result.attempts.iter().map(|a| a.source.clone()).collect(),
            detail,
            abstract_text: None,
        }
    }
}

fn download_detail(result: &DownloadResult) -> String {
    match result.status {
        DownloadStatus::Success => {
            let source = result.attempts.last().map_or("unknown", |a| a.source.as_str());
            format!("downloaded from {source}")
        }
        DownloadStatus::CacheHit => "already downloaded".to_string(),
        DownloadStatus::NotOpenAccess => "not open access".to_string(),
        DownloadStatus::SourceExhausted => {
            let errors: Vec<String> = result
                .attempts
                .iter()
                .map(|a| {
                    format!(
                        "{}: {}",
                        a.source,
                        a.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            if errors.is_empty() {
                "no source attempted".to_string()
            } else {
                format!("all sources failed ({})", errors.join("; "))
            }
        }
        DownloadStatus::Cancelled => "batch aborted before download started".to_string(),
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Number of input entries.
    pub total: usize,
    /// PDFs downloaded in this run.
    pub success: usize,
    /// PDFs already present from an earlier run.
    pub cache_hit: usize,
    /// Resolved articles with no open-access PDF.
    pub not_open_access: usize,
    /// Open-access articles every source failed to deliver.
    pub source_exhausted: usize,
    /// Valid identifiers that mapped to no PMCID.
    pub unresolved: usize,
    /// Tokens that are not PMIDs, PMCIDs or DOIs.
    pub invalid: usize,
    /// Items never dispatched because the run was aborted.
    pub cancelled: usize,
}

impl BatchSummary {
    fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            let counter = match entry.status {
                ReportStatus::Success => &mut summary.success,
                ReportStatus::CacheHit => &mut summary.cache_hit,
                ReportStatus::NotOpenAccess => &mut summary.not_open_access,
                ReportStatus::SourceExhausted => &mut summary.source_exhausted,
                ReportStatus::Unresolved => &mut summary.unresolved,
                ReportStatus::Invalid => &mut summary.invalid,
                ReportStatus::Cancelled => &mut summary.cancelled,
            };
            *counter += 1;
        }
        summary
    }

    /// Inputs that ended with a PDF on disk.
    #[must_use]
    pub fn with_file(&self) -> usize {
        self.success + self.cache_hit
    }
}

/// Ordered entries plus summary counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per input, in input order.
    pub entries: Vec<ReportEntry>,
    /// Status counts over `entries`.
    pub summary: BatchSummary,
}

impl BatchReport {
    /// Builds a report, computing the summary from `entries`.
    #[must_use]
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        let summary = BatchSummary::from_entries(&entries);
        Self { entries, summary }
    }

    /// Writes the report as pretty-printed JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the file cannot be written.
    pub async fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await
    }
}

/// Runs batches against one cache, resolver and download manager.
pub struct Orchestrator {
    config: Config,
    cache: CacheStore,
    limiter: Arc<RateLimiter>,
    resolver: IdentifierResolver,
    manager: DownloadManager,
    abstracts: Option<AbstractFetcher>,
}

impl Orchestrator {
    /// Assembles an orchestrator from explicit parts.
    ///
    /// `limiter` is only used by [`Orchestrator::with_default_abstracts`];
    /// the resolver and manager carry their own.
    #[must_use]
    pub fn new(
        config: Config,
        cache: CacheStore,
        limiter: Arc<RateLimiter>,
        resolver: IdentifierResolver,
        manager: DownloadManager,
    ) -> Self {
        Self {
            config,
            cache,
            limiter,
            resolver,
            manager,
            abstracts: None,
        }
    }

    /// Builds every part from `config`: cache, rate limiter, lookup services
    /// and the standard PDF sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for invalid settings, an unusable cache
    /// directory, or an HTTP client that cannot be built.
    #[instrument(skip_all, fields(cache_dir = %config.cache_dir.display()))]
    pub async fn from_config(config: Config) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let cache = CacheStore::open(&config.cache_dir)
            .await
            .map_err(|e| cache_unusable(&config.cache_dir, e))?;
        let limiter = Arc::new(config.build_rate_limiter());
        let resolver = IdentifierResolver::from_config(&config, cache.clone(), Arc::clone(&limiter))?;
        let manager = DownloadManager::from_config(&config, cache.clone(), Arc::clone(&limiter))?;
        Ok(Self::new(config, cache, limiter, resolver, manager))
    }

    /// Attaches an abstract fetcher; successful items get an abstract.
    #[must_use]
    pub fn with_abstracts(mut self, fetcher: AbstractFetcher) -> Self {
        self.abstracts = Some(fetcher);
        self
    }

    /// Attaches a fetcher built from the configured Europe PMC endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] if the client cannot be built.
    pub fn with_default_abstracts(self) -> Result<Self, ConfigurationError> {
        let fetcher = AbstractFetcher::new(
            &self.config.endpoints.europe_pmc_rest,
            Arc::clone(&self.limiter),
            self.config.email.as_deref(),
        )?;
        Ok(self.with_abstracts(fetcher))
    }

    /// Settings this orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared cache, for maintenance before a run.
    #[must_use]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Handle that stops download dispatch; queued items become `cancelled`.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.manager.abort_handle()
    }

    /// Live download counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DownloadStats> {
        self.manager.stats()
    }

    /// Default report location: `{output_dir}/download_results.json`.
    #[must_use]
    pub fn default_report_path(&self) -> PathBuf {
        self.config.output_dir.join(REPORT_FILE_NAME)
    }

    /// Processes `inputs` and reports on every one of them, in order.
    ///
    /// `hint` disambiguates bare digit tokens, typically from a CSV column name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] only when the configuration is invalid.
    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn run(
        &self,
        inputs: &[String],
        hint: Option<ClassifyHint>,
    ) -> Result<BatchReport, ConfigurationError> {
        self.config.validate()?;

        let identifiers = classify_all(inputs, hint, self.config.ambiguous_default);
        let resolutions = self.resolver.resolve_batch(&identifiers).await;

        // One download per PMCID; later duplicates share the first request.
        let mut requests: Vec<DownloadRequest> = Vec::new();
        let mut request_index: HashMap<String, usize> = HashMap::new();
        let mut plan: Vec<Planned> = Vec::with_capacity(identifiers.len());

        for identifier in &identifiers {
            let target = match identifier.kind() {
                IdentifierKind::Invalid => {
                    warn!(input = %identifier.raw(), "skipping unrecognized identifier");
                    plan.push(Planned::Invalid);
                    continue;
                }
                IdentifierKind::Pmcid => Target {
                    pmcid: identifier.canonical().to_string(),
                    open_access: None,
                    via: None,
                },
                IdentifierKind::Pmid | IdentifierKind::Doi => {
                    match resolutions.get(identifier) {
                        Some(found @ Resolution::Found {
                            pmcid, open_access, ..
                        }) => Target {
                            pmcid: pmcid.clone(),
                            open_access: *open_access,
                            via: Some(found.detail()),
                        },
                        other => {
                            let detail = other.map_or_else(
                                || "identifier was not looked up".to_string(),
                                Resolution::detail,
                            );
                            warn!(
                                input = %identifier.raw(),
                                kind = %identifier.kind(),
                                detail = %detail,
                                "no PMCID for identifier"
                            );
                            plan.push(Planned::Unresolved(detail));
                            continue;
                        }
                    }
                }
            };

            let index = *request_index.entry(target.pmcid.clone()).or_insert_with(|| {
                let mut request =
                    DownloadRequest::new(target.pmcid.clone()).with_open_access(target.open_access);
                if identifier.kind() == IdentifierKind::Doi {
                    request = request.with_doi(identifier.canonical());
                }
                requests.push(request);
                requests.len() - 1
            });
            plan.push(Planned::Download {
                index,
                via: target.via,
            });
        }

        debug!(
            inputs = identifiers.len(),
            downloads = requests.len(),
            "download plan ready"
        );

        let results = self.manager.download_all(requests).await;
        let abstracts = self.collect_abstracts(&results).await;

        let entries: Vec<ReportEntry> = identifiers
            .iter()
            .zip(plan)
            .map(|(identifier, planned)| match planned {
                Planned::Invalid => ReportEntry::without_download(
                    identifier,
                    ReportStatus::Invalid,
                    "not a PMCID, PMID or DOI".to_string(),
                ),
                Planned::Unresolved(detail) => {
                    ReportEntry::without_download(identifier, ReportStatus::Unresolved, detail)
                }
                Planned::Download { index, via } => {
                    let result = &results[index];
                    let mut entry = ReportEntry::from_download(identifier, result, via);
                    entry.abstract_text = abstracts.get(&result.pmcid).cloned();
                    entry
                }
            })
            .collect();

        let report = BatchReport::new(entries);
        info!(
            total = report.summary.total,
            success = report.summary.success,
            cache_hit = report.summary.cache_hit,
            not_open_access = report.summary.not_open_access,
            source_exhausted = report.summary.source_exhausted,
            unresolved = report.summary.unresolved,
            invalid = report.summary.invalid,
            cancelled = report.summary.cancelled,
            "batch finished"
        );
        Ok(report)
    }

    async fn collect_abstracts(&self, results: &[DownloadResult]) -> HashMap<String, String> {
        let mut found = HashMap::new();
        let Some(fetcher) = &self.abstracts else {
            return found;
        };
        for result in results.iter().filter(|r| r.status.has_file()) {
            if let Some(text) = fetcher.fetch(&result.pmcid).await {
                found.insert(result.pmcid.clone(), text);
            }
        }
        debug!(abstracts = found.len(), "abstracts collected");
        found
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("abstracts", &self.abstracts.is_some())
            .finish_non_exhaustive()
    }
}

struct Target {
    pmcid: String,
    open_access: Option<bool>,
    via: Option<String>,
}

enum Planned {
    Invalid,
    Unresolved(String),
    Download { index: usize, via: Option<String> },
}

fn cache_unusable(root: &Path, error: CacheError) -> ConfigurationError {
    match error {
        CacheError::Io { path, source } => ConfigurationError::Cache { path, source },
        CacheError::Serialize { .. } => ConfigurationError::Cache {
            path: root.to_path_buf(),
            source: std::io::Error::other(error.to_string()),
        },
    }
}
