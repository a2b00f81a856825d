//! Durable backends for the cache store
//!
//! `DurableStore` is the seam between the cache engine and whatever holds
//! entries across restarts. `FileStore` persists each entry as a JSON file in
//! an XDG-compliant cache directory; `MemoryStore` keeps entries in process
//! memory for tests and `--memory-only` runs.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use directories::ProjectDirs;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;

use super::entry::CacheEntry;

/// Distinguishes temp files of concurrent writes within one process
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Errors raised by a durable backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry could not be encoded or decoded
    #[error("cache entry is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),

    /// The backend cannot serve requests at all
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage that survives beyond a single process
///
/// Implementations only need upsert-by-key, lookup-by-key and bulk deletes;
/// freshness rules live in [`super::CacheStore`].
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Loads the entry stored under `key`, if any
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Inserts or replaces the entry under `entry.key`
    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Deletes every entry recorded for `endpoint`, returning how many were removed
    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize, StoreError>;

    /// Deletes every entry last written before `cutoff`
    async fn delete_updated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Returns every stored entry
    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError>;
}

/// Persists cache entries as JSON files on disk
///
/// Files live in `~/.cache/ongkir/` on Linux (or the platform equivalent).
/// Keys contain path separators, so each file is named after the SHA-256 of
/// its key.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl FileStore {
    /// Creates a FileStore in the XDG cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "ongkir")?;
        Some(Self {
            cache_dir: project_dirs.cache_dir().to_path_buf(),
        })
    }

    /// Creates a FileStore with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Directory the store writes into
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.cache_dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Unique sibling path for staging a write; never ends in `.json`
    fn staging_path(&self, key: &str) -> PathBuf {
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut path = self.cache_path(key).into_os_string();
        path.push(format!(".{}.{seq}.tmp", std::process::id()));
        PathBuf::from(path)
    }

    /// Reads every parseable entry together with its file path
    ///
    /// Unreadable or foreign files are skipped rather than failing the scan.
    async fn scan(&self) -> Result<Vec<(PathBuf, CacheEntry)>, StoreError> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut found = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path).await else {
                continue;
            };
            if let Ok(entry) = serde_json::from_str::<CacheEntry>(&content) {
                found.push((path, entry));
            }
        }
        Ok(found)
    }

    async fn remove_matching<F>(&self, predicate: F) -> Result<usize, StoreError>
    where
        F: Fn(&CacheEntry) -> bool + Send,
    {
        let mut removed = 0;
        for (path, entry) in self.scan().await? {
            if predicate(&entry) {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let content = match fs::read_to_string(self.cache_path(key)).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.cache_dir).await?;
        let json = serde_json::to_string_pretty(entry)?;

        // Readers see either the old file or the new one, never a partial write.
        let staging = self.staging_path(&entry.key);
        fs::write(&staging, json).await?;
        if let Err(err) = fs::rename(&staging, self.cache_path(&entry.key)).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize, StoreError> {
        self.remove_matching(|entry| entry.endpoint == endpoint).await
    }

    async fn delete_updated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.remove_matching(|entry| entry.updated_at < cutoff).await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        Ok(self.scan().await?.into_iter().map(|(_, entry)| entry).collect())
    }
}

/// Keeps entries in a concurrent map for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint: &str) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.endpoint != endpoint);
        Ok(before - self.entries.len())
    }

    async fn delete_updated_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.updated_at >= cutoff);
        Ok(before - self.entries.len())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        Ok(self.entries.iter().map(|entry| entry.value().clone()).collect())
    }
}
