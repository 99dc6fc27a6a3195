use crate::CacheEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codeatlas_core::{DurableStorage, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Bumped whenever the persisted layout changes; older documents are discarded.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Key the incremental cache is stored under.
pub const CACHE_DOCUMENT_KEY: &str = "cache.json";

/// On-disk form of the incremental cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCache {
    pub version: u32,
    pub written_at: DateTime<Utc>,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl PersistedCache {
    pub fn new(entries: BTreeMap<String, CacheEntry>) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            written_at: Utc::now(),
            entries,
        }
    }
}

/// Stores each key as a file inside one directory. Writes go to a
/// temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<root>/<cache_dir>`
    pub fn for_root(root: &Path, cache_dir: &str) -> Self {
        Self::new(root.join(cache_dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl DurableStorage for FsStorage {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(key);
        let staging = self.dir.join(format!(".{}.tmp", key));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &target).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local storage, handy when persistence should not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|blob| blob.value().clone()))
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }
}
