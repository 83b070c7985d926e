//! Content-addressed, time-expiring cache on the local file system.
//!
//! Entries are grouped by namespace (one directory each) and stored as one
//! JSON file per key, named by the SHA-256 of the key:
//!
//! ```text
//! {root}/{namespace}/{sha256(key)}.json
//! ```
//!
//! Each file holds `{ "key", "value", "timestamp", "ttl" }`. Expiry is
//! evaluated when an entry is read; expired files stay on disk until they are
//! overwritten or removed by [`CacheStore::cleanup_expired`].
//!
//! Writes go to a uniquely named temp file in the same directory and are then
//! renamed over the target, so a reader sees either the previous complete
//! entry or the new one. Concurrent writers of one key are last-write-wins.

mod error;

pub use error::CacheError;

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, trace};

/// Namespace for PMID → PMCID resolutions.
pub const NS_PMID_TO_PMCID: &str = "pmid_to_pmcid";

/// Namespace for DOI → PMCID resolutions.
pub const NS_DOI_TO_PMCID: &str = "doi_to_pmcid";

/// Namespace for downloaded-file records.
pub const NS_DOWNLOAD: &str = "download";

const ENTRY_EXTENSION: &str = "json";

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A stored cache record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Logical key (the canonical identifier, not its hash).
    pub key: String,
    /// Stored payload.
    pub value: T,
    /// Creation time in seconds since the Unix epoch.
    pub timestamp: f64,
    /// Lifetime in seconds, fractional part kept; `None` never expires.
    pub ttl: Option<f64>,
}

impl<T> CacheEntry<T> {
    /// True when the entry is older than its TTL at `now` (epoch seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.ttl.is_some_and(|ttl| now - self.timestamp > ttl)
    }
}

/// Entry count and size of the cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    /// Number of entry files across all namespaces.
    pub entries: usize,
    /// Total size of entry files in bytes.
    pub total_bytes: u64,
}

/// File-backed key/value store shared by the resolver and download manager.
#[derive(Clone)]
pub struct CacheStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Opens (and creates if needed) a cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the root directory cannot be created.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::io(&root, e))?;
        debug!("cache opened");
        Ok(Self {
            root,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `key` in `namespace`.
    #[must_use]
    pub fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root
            .join(namespace)
            .join(format!("{digest:x}.{ENTRY_EXTENSION}"))
    }

    fn now_secs(&self) -> f64 {
        self.clock
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
    }

    /// Reads a live entry.
    ///
    /// Missing, expired and undecodable entries all yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for file system failures other than a
    /// missing file.
    #[instrument(skip(self), level = "debug")]
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let path = self.entry_path(namespace, key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!("cache miss");
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "undecodable cache entry, treating as miss");
                return Ok(None);
            }
        };

        if entry.key != key {
            debug!(stored_key = %entry.key, "cache key mismatch, treating as miss");
            return Ok(None);
        }

        if entry.is_expired_at(self.now_secs()) {
            debug!("cache entry expired");
            return Ok(None);
        }

        trace!("cache hit");
        Ok(Some(entry.value))
    }

    /// Writes an entry, replacing any previous one atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialize`] when `value` cannot be encoded and
    /// [`CacheError::Io`] when the file cannot be written.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            timestamp: self.now_secs(),
            ttl: ttl.map(|t| t.as_secs_f64()),
        };
        let bytes = serde_json::to_vec_pretty(&entry).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;

        let path = self.entry_path(namespace, key);
        let dir = self.root.join(namespace);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let temp = dir.join(format!(".{:016x}.tmp", rand::random::<u64>()));
        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(&temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::io(&path, e));
        }

        trace!(path = %path.display(), "cache entry written");
        Ok(())
    }

    /// Removes an entry. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] for failures other than a missing file.
    #[instrument(skip(self), level = "debug")]
    pub async fn invalidate(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let path = self.entry_path(namespace, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Removes every entry of `namespace`, or of all namespaces when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when a directory cannot be listed or a file
    /// cannot be removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, namespace: Option<&str>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for dir in self.namespace_dirs(namespace).await? {
            for path in entry_files(&dir).await? {
                remove_if_present(&path).await?;
                removed += 1;
            }
        }
        debug!(removed, "cache cleared");
        Ok(removed)
    }

    /// Removes expired and undecodable entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when a directory cannot be listed or a file
    /// cannot be removed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, namespace: Option<&str>) -> Result<usize, CacheError> {
        let now = self.now_secs();
        let mut removed = 0;
        for dir in self.namespace_dirs(namespace).await? {
            for path in entry_files(&dir).await? {
                let stale = match tokio::fs::read(&path).await {
                    Ok(bytes) => serde_json::from_slice::<CacheEntry<serde_json::Value>>(&bytes)
                        .map_or(true, |entry| entry.is_expired_at(now)),
                    Err(e) if e.kind() == ErrorKind::NotFound => false,
                    Err(e) => return Err(CacheError::io(&path, e)),
                };
                if stale {
                    remove_if_present(&path).await?;
                    removed += 1;
                }
            }
        }
        debug!(removed, "expired cache entries removed");
        Ok(removed)
    }

    /// Counts entries and their total size.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when a directory cannot be listed.
    pub async fn info(&self) -> Result<CacheInfo, CacheError> {
        let mut info = CacheInfo::default();
        for dir in self.namespace_dirs(None).await? {
            for path in entry_files(&dir).await? {
                if let Ok(meta) = tokio::fs::metadata(&path).await {
                    info.entries += 1;
                    info.total_bytes += meta.len();
                }
            }
        }
        Ok(info)
    }

    async fn namespace_dirs(&self, namespace: Option<&str>) -> Result<Vec<PathBuf>, CacheError> {
        if let Some(namespace) = namespace {
            return Ok(vec![self.root.join(namespace)]);
        }

        let mut dirs = Vec::new();
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

async fn entry_files(dir: &Path) -> Result<Vec<PathBuf>, CacheError> {
    let mut files = Vec::new();
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(CacheError::io(dir, e)),
    };
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| CacheError::io(dir, e))?
    {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext == ENTRY_EXTENSION)
        {
            files.push(path);
        }
    }
    Ok(files)
}

async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
