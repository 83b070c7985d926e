//! Run configuration passed to the orchestrator.
//!
//! [`Config`] is the already-merged configuration bag (defaults, config file,
//! CLI flags). The core only reads it; [`Config::validate`] is the single
//! place where values are checked.

mod error;

pub use error::ConfigurationError;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::parser::AmbiguousDefault;
use crate::rate_limiter::{RateLimiter, services};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default number of concurrent downloads.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default base delay before a worker starts a download, in seconds.
pub const DEFAULT_DELAY_SECONDS: f64 = 1.0;

/// Default random extra delay added to the base delay, in seconds.
pub const DEFAULT_DELAY_JITTER_SECONDS: f64 = 0.5;

/// Default lifetime of identifier resolutions (7 days).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Default lifetime of download records (24 hours).
pub const DEFAULT_DOWNLOAD_CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Service used to resolve PMIDs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePreference {
    /// NCBI E-utilities.
    #[default]
    Pubmed,
    /// Europe PMC search.
    EuropePmc,
    /// NCBI first, Europe PMC for whatever remains unresolved.
    Both,
}

impl SourcePreference {
    /// Parses a configuration label (`pubmed`, `europe_pmc`, `both`).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pubmed" => Some(Self::Pubmed),
            "europe_pmc" | "europepmc" => Some(Self::EuropePmc),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    /// Returns the stable configuration label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed",
            Self::EuropePmc => "europe_pmc",
            Self::Both => "both",
        }
    }
}

/// Base URLs of every external service, overridable for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// NCBI E-utilities root (`.../entrez/eutils`).
    pub eutils: String,
    /// Europe PMC REST root (`.../europepmc/webservices/rest`).
    pub europe_pmc_rest: String,
    /// Crossref REST root.
    pub crossref: String,
    /// PubMed Central site root (`.../pmc`).
    pub pmc: String,
    /// Europe PMC site root, serving rendered PDFs.
    pub europe_pmc_site: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            eutils: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            europe_pmc_rest: "https://www.ebi.ac.uk/europepmc/webservices/rest".to_string(),
            crossref: "https://api.crossref.org".to_string(),
            pmc: "https://www.ncbi.nlm.nih.gov/pmc".to_string(),
            europe_pmc_site: "https://europepmc.org".to_string(),
        }
    }
}

impl Endpoints {
    /// Points every service at a path prefix under one base URL.
    ///
    /// Used with a single mock server: `{base}/eutils`, `{base}/europepmc`,
    /// `{base}/crossref`, `{base}/pmc` and `{base}/epmc`.
    #[must_use]
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            eutils: format!("{base}/eutils"),
            europe_pmc_rest: format!("{base}/europepmc"),
            crossref: format!("{base}/crossref"),
            pmc: format!("{base}/pmc"),
            europe_pmc_site: format!("{base}/epmc"),
        }
    }
}

/// Resolved configuration for one batch run.
#[derive(Clone)]
pub struct Config {
    /// Maximum concurrent downloads (1-100).
    pub concurrency: usize,
    /// Base courtesy delay before each download, in seconds.
    pub delay_seconds: f64,
    /// Upper bound of the random extra delay, in seconds.
    pub delay_jitter_seconds: f64,
    /// Directory receiving downloaded PDFs.
    pub output_dir: PathBuf,
    /// Cache root directory.
    pub cache_dir: PathBuf,
    /// Lifetime of identifier resolutions, in seconds.
    pub cache_ttl_seconds: u64,
    /// Lifetime of download records, in seconds.
    pub download_cache_ttl_seconds: u64,
    /// Contact email sent to NCBI and Crossref.
    pub email: Option<String>,
    /// NCBI API key (raises the E-utilities ceiling to 10 requests/second).
    pub api_key: Option<String>,
    /// Which service resolves PMIDs.
    pub source_preference: SourcePreference,
    /// Classification of bare digit tokens without a hint.
    pub ambiguous_default: AmbiguousDefault,
    /// Whether per-service request spacing is enforced.
    pub rate_limiting: bool,
    /// External service base URLs.
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay_seconds: DEFAULT_DELAY_SECONDS,
            delay_jitter_seconds: DEFAULT_DELAY_JITTER_SECONDS,
            output_dir: PathBuf::from("data/pdfs"),
            cache_dir: PathBuf::from("data/cache"),
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            download_cache_ttl_seconds: DEFAULT_DOWNLOAD_CACHE_TTL_SECONDS,
            email: None,
            api_key: None,
            source_preference: SourcePreference::default(),
            ambiguous_default: AmbiguousDefault::default(),
            rate_limiting: true,
            endpoints: Endpoints::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("concurrency", &self.concurrency)
            .field("delay_seconds", &self.delay_seconds)
            .field("delay_jitter_seconds", &self.delay_jitter_seconds)
            .field("output_dir", &self.output_dir)
            .field("cache_dir", &self.cache_dir)
            .field("cache_ttl_seconds", &self.cache_ttl_seconds)
            .field("download_cache_ttl_seconds", &self.download_cache_ttl_seconds)
            .field("email", &self.email)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("source_preference", &self.source_preference)
            .field("ambiguous_default", &self.ambiguous_default)
            .field("rate_limiting", &self.rate_limiting)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl Config {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidConcurrency`] or
    /// [`ConfigurationError::InvalidDelay`].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigurationError::InvalidConcurrency {
                value: self.concurrency,
                min: MIN_CONCURRENCY,
                max: MAX_CONCURRENCY,
            });
        }
        for (field, value) in [
            ("delay_seconds", self.delay_seconds),
            ("delay_jitter_seconds", self.delay_jitter_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidDelay { field, value });
            }
        }
        Ok(())
    }

    /// Lifetime of identifier resolutions.
    #[must_use]
    pub fn resolution_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Lifetime of download records.
    #[must_use]
    pub fn download_ttl(&self) -> Duration {
        Duration::from_secs(self.download_cache_ttl_seconds)
    }

    /// Base courtesy delay.
    #[must_use]
    pub fn courtesy_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_seconds.max(0.0))
    }

    /// Upper bound of the random extra courtesy delay.
    #[must_use]
    pub fn courtesy_jitter(&self) -> Duration {
        Duration::from_secs_f64(self.delay_jitter_seconds.max(0.0))
    }

    /// Builds the shared rate limiter with the documented per-service ceilings.
    ///
    /// NCBI allows 3 requests/second without an API key and 10 with one.
    #[must_use]
    pub fn build_rate_limiter(&self) -> RateLimiter {
        if !self.rate_limiting {
            return RateLimiter::disabled();
        }

        let ncbi_interval = if self.api_key.is_some() {
            Duration::from_millis(100)
        } else {
            Duration::from_millis(334)
        };

        RateLimiter::new(Duration::from_secs(1))
            .with_interval(services::NCBI_EUTILS, ncbi_interval)
            .with_interval(services::EUROPE_PMC, Duration::from_secs(1))
            .with_interval(services::CROSSREF, Duration::from_secs(1))
            .with_interval(services::PMC, Duration::from_millis(334))
            .with_interval(services::EUROPE_PMC_RENDER, Duration::from_millis(334))
    }
}
