//! Error types for the on-disk cache.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`CacheStore`](super::CacheStore) operations.
///
/// Callers treat these as a cache miss: the cache is an optimization, never a
/// system of record.
#[derive(Debug, Error)]
pub enum CacheError {
    /// File system error while reading or writing an entry.
    #[error("cache IO error at {path}: {source}")]
    Io {
        /// Path of the entry or directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be encoded as JSON.
    #[error("failed to serialize cache entry for key '{key}': {source}")]
    Serialize {
        /// Logical key being written.
        key: String,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
