//! pmcfetch core library
//!
//! Turns mixed lists of literature identifiers (PMCIDs, PMIDs, DOIs) into
//! open-access PDFs on disk, with a per-input report of what happened.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`parser`] - Classifying raw tokens and reading identifier columns
//! - [`cache`] - File-backed key/value cache with per-entry TTL
//! - [`rate_limiter`] - Per-service request spacing and Retry-After handling
//! - [`resolver`] - PMID and DOI to PMCID resolution
//! - [`download`] - Ordered-fallback PDF downloads on a bounded worker pool
//! - [`abstracts`] - Abstract text from Europe PMC full-text XML
//! - [`orchestrator`] - Whole-batch runs producing a [`BatchReport`]
//! - [`config`] - Settings shared by all of the above

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![warn(missing_docs)]

pub mod abstracts;
pub mod cache;
pub mod config;
pub mod download;
pub mod orchestrator;
pub mod parser;
pub mod rate_limiter;
pub mod resolver;
mod user_agent;

// Re-export commonly used types
pub use cache::{CacheError, CacheStore};
pub use config::{Config, ConfigurationError, Endpoints, SourcePreference};
pub use download::{
    AbortHandle, DownloadError, DownloadManager, DownloadRequest, DownloadResult, DownloadStats,
    DownloadStatus,
};
pub use orchestrator::{BatchReport, BatchSummary, Orchestrator, ReportEntry, ReportStatus};
pub use parser::{AmbiguousDefault, ClassifyHint, Identifier, IdentifierKind, classify};
pub use rate_limiter::RateLimiter;
pub use resolver::{IdentifierResolver, Resolution, ResolveError};
