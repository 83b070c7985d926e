//! PMID and DOI → PMCID resolution.
//!
//! [`IdentifierResolver`] deduplicates a batch of identifiers, answers what it
//! can from the cache, and sends the rest to external lookup services.
//!
//! # Architecture
//!
//! - [`PmidLookup`] - batch PMID lookups ([`NcbiEutils`], [`EuropePmc`])
//! - [`DoiLookup`] - single DOI lookups, tried in order ([`EuropePmc`], then
//!   [`CrossrefTitleLookup`])
//! - [`ResolutionRecord`] - what gets cached, including definitive misses
//! - [`ResolutionMap`] - per-run answers keyed by identifier
//!
//! Only definitive answers are cached. A lookup that timed out, hit a 5xx or
//! a 429, or returned an unreadable body leaves the identifier unresolved for
//! this run and uncached.

mod crossref;
mod error;
mod europe_pmc;
mod http_client;
mod pubmed;

pub use crossref::{Crossref, CrossrefTitleLookup, DEFAULT_CROSSREF_BASE_URL};
pub use error::ResolveError;
pub use europe_pmc::{DEFAULT_EUROPE_PMC_BASE_URL, EuropePmc};
pub use http_client::build_lookup_client;
pub use pubmed::{DEFAULT_EUTILS_BASE_URL, NcbiEutils};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, NS_DOI_TO_PMCID, NS_PMID_TO_PMCID};
use crate::config::{Config, ConfigurationError, SourcePreference};
use crate::parser::{Identifier, IdentifierKind};
use crate::rate_limiter::RateLimiter;

/// Maximum number of PMIDs sent in one lookup request.
pub const MAX_BATCH_SIZE: usize = 100;

/// A PMCID found by a lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupHit {
    /// Canonical PMCID (digits only).
    pub pmcid: String,
    /// Open-access flag, when the service reports one.
    pub open_access: Option<bool>,
}

/// A service that maps PMIDs to PMCIDs in batches.
///
/// A successful call is definitive for every requested PMID: PMIDs missing
/// from the returned map have no PMCID according to this service.
#[async_trait]
pub trait PmidLookup: Send + Sync {
    /// Service id, used as the record source and in logs.
    fn name(&self) -> &'static str;

    /// Looks up at most [`MAX_BATCH_SIZE`] PMIDs in one request.
    async fn lookup_batch(&self, pmids: &[String]) -> Result<HashMap<String, LookupHit>, ResolveError>;
}

/// A service that maps one DOI to a PMCID.
#[async_trait]
pub trait DoiLookup: Send + Sync {
    /// Service id, used as the record source and in logs.
    fn name(&self) -> &'static str;

    /// `Ok(None)` is a definitive miss for this service.
    async fn lookup(&self, doi: &str) -> Result<Option<LookupHit>, ResolveError>;
}

/// Cached outcome of a resolution. `pmcid = None` records a definitive miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// Canonical PMCID, or `None` when no service knows one.
    pub pmcid: Option<String>,
    /// Service(s) that produced the answer.
    pub source: String,
    /// Unix seconds at resolution time.
    pub resolved_at: u64,
    /// Open-access flag, when known.
    #[serde(default)]
    pub open_access: Option<bool>,
}

/// Per-run answer for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A PMCID is known.
    Found {
        /// Canonical PMCID.
        pmcid: String,
        /// Service that found it.
        source: String,
        /// Open-access flag, when known.
        open_access: Option<bool>,
        /// Whether the answer came from the cache.
        cached: bool,
    },
    /// Every consulted service answered that there is no PMCID.
    NotFound {
        /// Services consulted.
        source: String,
        /// Whether the answer came from the cache.
        cached: bool,
    },
    /// No definitive answer this run.
    Failed {
        /// Last error seen.
        reason: String,
    },
}

impl Resolution {
    fn from_record(record: ResolutionRecord) -> Self {
        match record.pmcid {
            Some(pmcid) => Self::Found {
                pmcid,
                source: record.source,
                open_access: record.open_access,
                cached: true,
            },
            None => Self::NotFound {
                source: record.source,
                cached: true,
            },
        }
    }

    /// Canonical PMCID, when found.
    #[must_use]
    pub fn pmcid(&self) -> Option<&str> {
        match self {
            Self::Found { pmcid, .. } => Some(pmcid),
            _ => None,
        }
    }

    /// Open-access flag, when found and reported.
    #[must_use]
    pub fn open_access(&self) -> Option<bool> {
        match self {
            Self::Found { open_access, .. } => *open_access,
            _ => None,
        }
    }

    /// Whether the answer was served from the cache.
    #[must_use]
    pub fn is_cached(&self) -> bool {
        matches!(
            self,
            Self::Found { cached: true, .. } | Self::NotFound { cached: true, .. }
        )
    }

    /// Short human-readable description for reports.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Found { source, cached, .. } => {
                format!("resolved via {source}{}", if *cached { " (cached)" } else { "" })
            }
            Self::NotFound { source, cached } => format!(
                "no PMCID known to {source}{}",
                if *cached { " (cached)" } else { "" }
            ),
            Self::Failed { reason } => format!("lookup failed: {reason}"),
        }
    }
}

/// Answers of one `resolve_batch` call, keyed by kind and canonical value.
#[derive(Debug, Clone, Default)]
pub struct ResolutionMap {
    entries: HashMap<(IdentifierKind, String), Resolution>,
}

impl ResolutionMap {
    /// Answer for `identifier`, if it was part of the batch.
    #[must_use]
    pub fn get(&self, identifier: &Identifier) -> Option<&Resolution> {
        self.entries
            .get(&(identifier.kind(), identifier.canonical().to_string()))
    }

    /// Number of distinct identifiers answered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, kind: IdentifierKind, canonical: String, resolution: Resolution) {
        self.entries.insert((kind, canonical), resolution);
    }
}

/// Resolves PMIDs and DOIs to PMCIDs with caching.
pub struct IdentifierResolver {
    cache: CacheStore,
    ttl: Duration,
    pmid_lookups: Vec<Arc<dyn PmidLookup>>,
    doi_lookups: Vec<Arc<dyn DoiLookup>>,
}

impl IdentifierResolver {
    /// Creates a resolver with no lookup services.
    #[must_use]
    pub fn new(cache: CacheStore, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            pmid_lookups: Vec::new(),
            doi_lookups: Vec::new(),
        }
    }

    /// Appends a PMID lookup; lookups are consulted in insertion order.
    #[must_use]
    pub fn with_pmid_lookup(mut self, lookup: Arc<dyn PmidLookup>) -> Self {
        self.pmid_lookups.push(lookup);
        self
    }

    /// Appends a DOI lookup; lookups are consulted in insertion order.
    #[must_use]
    pub fn with_doi_lookup(mut self, lookup: Arc<dyn DoiLookup>) -> Self {
        self.doi_lookups.push(lookup);
        self
    }

    /// Builds the standard service chain for `config`.
    ///
    /// PMIDs go to the services selected by `source_preference`; DOIs go to
    /// Europe PMC, then Crossref title search.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::HttpClient`] if a client cannot be built.
    pub fn from_config(
        config: &Config,
        cache: CacheStore,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ConfigurationError> {
        let endpoints = &config.endpoints;
        let europe_pmc = Arc::new(EuropePmc::new(
            &endpoints.europe_pmc_rest,
            Arc::clone(&limiter),
            config.email.as_deref(),
        )?);

        let mut resolver = Self::new(cache, config.resolution_ttl());

        if matches!(
            config.source_preference,
            SourcePreference::Pubmed | SourcePreference::Both
        ) {
            let ncbi = NcbiEutils::new(
                &endpoints.eutils,
                Arc::clone(&limiter),
                config.email.clone(),
                config.api_key.clone(),
            )?;
            resolver = resolver.with_pmid_lookup(Arc::new(ncbi));
        }
        if matches!(
            config.source_preference,
            SourcePreference::EuropePmc | SourcePreference::Both
        ) {
            resolver = resolver.with_pmid_lookup(europe_pmc.clone());
        }

        let crossref = Crossref::new(&endpoints.crossref, limiter, config.email.clone())?;
        Ok(resolver
            .with_doi_lookup(europe_pmc.clone())
            .with_doi_lookup(Arc::new(CrossrefTitleLookup::new(crossref, europe_pmc))))
    }

    /// Resolves every PMID and DOI in `identifiers`; other kinds are ignored.
    ///
    /// Duplicates are resolved once. PMIDs and DOIs are processed
    /// concurrently; calls within each path are sequential.
    #[instrument(skip_all, fields(total = identifiers.len()))]
    pub async fn resolve_batch(&self, identifiers: &[Identifier]) -> ResolutionMap {
        let pmids = unique_canonicals(identifiers, IdentifierKind::Pmid);
        let dois = unique_canonicals(identifiers, IdentifierKind::Doi);
        debug!(pmids = pmids.len(), dois = dois.len(), "resolving unique identifiers");

        let (pmid_answers, doi_answers) =
            tokio::join!(self.resolve_pmids(pmids), self.resolve_dois(dois));

        let mut map = ResolutionMap::default();
        for (pmid, resolution) in pmid_answers {
            map.insert(IdentifierKind::Pmid, pmid, resolution);
        }
        for (doi, resolution) in doi_answers {
            map.insert(IdentifierKind::Doi, doi, resolution);
        }

        let found = map.entries.values().filter(|r| r.pmcid().is_some()).count();
        info!(resolved = found, requested = map.len(), "identifier resolution complete");
        map
    }

    async fn resolve_pmids(&self, pmids: Vec<String>) -> Vec<(String, Resolution)> {
        let (mut answers, misses) = self.split_cached(NS_PMID_TO_PMCID, pmids).await;
        if misses.is_empty() {
            return answers;
        }

        let mut found: HashMap<String, (LookupHit, &'static str)> = HashMap::new();
        let mut failures: HashMap<String, String> = HashMap::new();
        let mut remaining = misses.clone();

        for lookup in &self.pmid_lookups {
            if remaining.is_empty() {
                break;
            }
            for chunk in remaining.chunks(MAX_BATCH_SIZE) {
                match lookup.lookup_batch(chunk).await {
                    Ok(hits) => {
                        for (pmid, hit) in hits {
                            found.entry(pmid).or_insert((hit, lookup.name()));
                        }
                    }
                    Err(e) => {
                        warn!(
                            service = lookup.name(),
                            batch = chunk.len(),
                            transient = e.is_transient(),
                            error = %e,
                            "PMID lookup failed; batch left unresolved"
                        );
                        for pmid in chunk {
                            failures.insert(pmid.clone(), e.to_string());
                        }
                    }
                }
            }
            remaining.retain(|pmid| !found.contains_key(pmid));
        }

        let consulted = self.pmid_sources();
        for pmid in misses {
            let resolution = match found.remove(&pmid) {
                Some((hit, source)) => self.record_found(NS_PMID_TO_PMCID, &pmid, hit, source).await,
                None => match failures.remove(&pmid) {
                    Some(reason) => Resolution::Failed { reason },
                    None => self.record_not_found(NS_PMID_TO_PMCID, &pmid, &consulted).await,
                },
            };
            answers.push((pmid, resolution));
        }
        answers
    }

    async fn resolve_dois(&self, dois: Vec<String>) -> Vec<(String, Resolution)> {
        let (mut answers, misses) = self.split_cached(NS_DOI_TO_PMCID, dois).await;

        for doi in misses {
            let mut hit = None;
            let mut failure = None;
            for lookup in &self.doi_lookups {
                match lookup.lookup(&doi).await {
                    Ok(Some(found)) => {
                        hit = Some((found, lookup.name()));
                        break;
                    }
                    Ok(None) => debug!(doi = %doi, service = lookup.name(), "no PMCID for DOI"),
                    Err(e) => {
                        warn!(
                            doi = %doi,
                            service = lookup.name(),
                            transient = e.is_transient(),
                            error = %e,
                            "DOI lookup failed"
                        );
                        failure = Some(e.to_string());
                    }
                }
            }

            let resolution = match (hit, failure) {
                (Some((found, source)), _) => {
                    self.record_found(NS_DOI_TO_PMCID, &doi, found, source).await
                }
                (None, Some(reason)) => Resolution::Failed { reason },
                (None, None) => {
                    let consulted = self.doi_sources();
                    self.record_not_found(NS_DOI_TO_PMCID, &doi, &consulted).await
                }
            };
            answers.push((doi, resolution));
        }
        answers
    }

    /// Splits keys into cached answers and misses, preserving order.
    async fn split_cached(
        &self,
        namespace: &str,
        keys: Vec<String>,
    ) -> (Vec<(String, Resolution)>, Vec<String>) {
        let mut answers = Vec::new();
        let mut misses = Vec::new();
        for key in keys {
            match self.cache.get::<ResolutionRecord>(namespace, &key).await {
                Ok(Some(record)) => {
                    debug!(namespace, key = %key, pmcid = ?record.pmcid, "resolution cache hit");
                    answers.push((key, Resolution::from_record(record)));
                }
                Ok(None) => misses.push(key),
                Err(e) => {
                    debug!(namespace, key = %key, error = %e, "resolution cache unreadable");
                    misses.push(key);
                }
            }
        }
        (answers, misses)
    }

    async fn record_found(
        &self,
        namespace: &str,
        key: &str,
        hit: LookupHit,
        source: &str,
    ) -> Resolution {
        let record = ResolutionRecord {
            pmcid: Some(hit.pmcid.clone()),
            source: source.to_string(),
            resolved_at: unix_now(),
            open_access: hit.open_access,
        };
        self.store(namespace, key, &record).await;
        debug!(namespace, key, pmcid = %hit.pmcid, source, "resolved");
        Resolution::Found {
            pmcid: hit.pmcid,
            source: record.source,
            open_access: hit.open_access,
            cached: false,
        }
    }

    async fn record_not_found(&self, namespace: &str, key: &str, consulted: &str) -> Resolution {
        if consulted.is_empty() {
            return Resolution::Failed {
                reason: "no lookup service configured".to_string(),
            };
        }
        let record = ResolutionRecord {
            pmcid: None,
            source: consulted.to_string(),
            resolved_at: unix_now(),
            open_access: None,
        };
        self.store(namespace, key, &record).await;
        Resolution::NotFound {
            source: record.source,
            cached: false,
        }
    }

    async fn store(&self, namespace: &str, key: &str, record: &ResolutionRecord) {
        if let Err(e) = self.cache.put(namespace, key, record, Some(self.ttl)).await {
            warn!(namespace, key, error = %e, "failed to cache resolution");
        }
    }

    fn pmid_sources(&self) -> String {
        join_names(self.pmid_lookups.iter().map(|l| l.name()))
    }

    fn doi_sources(&self) -> String {
        join_names(self.doi_lookups.iter().map(|l| l.name()))
    }
}

impl std::fmt::Debug for IdentifierResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierResolver")
            .field("cache", &self.cache)
            .field("ttl", &self.ttl)
            .field("pmid_lookups", &self.pmid_sources())
            .field("doi_lookups", &self.doi_sources())
            .finish()
    }
}

fn unique_canonicals(identifiers: &[Identifier], kind: IdentifierKind) -> Vec<String> {
    let mut seen = HashSet::new();
    identifiers
        .iter()
        .filter(|id| id.kind() == kind)
        .map(|id| id.canonical().to_string())
        .filter(|canonical| seen.insert(canonical.clone()))
        .collect()
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique.join(",")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
