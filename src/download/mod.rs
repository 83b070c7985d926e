//! PDF downloads from ordered fallback sources.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pmcfetch_core::cache::CacheStore;
//! use pmcfetch_core::config::Config;
//! use pmcfetch_core::download::{DownloadManager, DownloadRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let cache = CacheStore::open(&config.cache_dir).await?;
//! let limiter = Arc::new(config.build_rate_limiter());
//! let manager = DownloadManager::from_config(&config, cache, limiter)?;
//!
//! let results = manager.download_all(vec![DownloadRequest::new("3531190")]).await;
//! println!("{}: {}", results[0].pmcid, results[0].status);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod filename;
mod manager;
mod source;

pub use client::{CONNECT_TIMEOUT_SECS, HttpClient, READ_TIMEOUT_SECS};
pub use error::DownloadError;
pub use filename::{partial_path, pdf_filename};
pub use manager::{
    AbortHandle, DownloadManager, DownloadRequest, DownloadResult, DownloadStats, DownloadStatus,
    SourceAttempt,
};
pub use source::{HttpSource, Source, SourceKind, default_sources};
