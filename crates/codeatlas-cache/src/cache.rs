// ABOUTME: Incremental per-file cache validated by content hash, not timestamps.
// ABOUTME: Keeps the dependency index in step with every write, eviction and invalidation.

use crate::{DependencyIndex, FsStorage, PersistedCache, CACHE_DOCUMENT_KEY, CACHE_FORMAT_VERSION};
use chrono::{DateTime, Utc};
use codeatlas_core::{
    BoundedStore, CacheSettings, DurableStorage, FileFacts, FileRecord, Language, Result,
};
use codeatlas_resilience::{operation, ExecutionStrategy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cached analysis of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub language: Language,
    /// Modification time of the file when it was parsed. Informational only.
    pub modified: DateTime<Utc>,
    pub facts: FileFacts,
    /// Relative paths this file depends on.
    pub dependencies: Vec<String>,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(content_hash: impl Into<String>, language: Language, facts: FileFacts) -> Self {
        let now = Utc::now();
        Self {
            content_hash: content_hash.into(),
            language,
            modified: now,
            dependencies: facts.dependencies.clone(),
            facts,
            cached_at: now,
        }
    }

    /// Entry for the facts parsed from `record`.
    pub fn for_record(record: &FileRecord, facts: FileFacts) -> Self {
        Self {
            modified: record.modified,
            ..Self::new(record.content_hash.clone(), record.language.clone(), facts)
        }
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct CacheState {
    entries: BoundedStore<String, CacheEntry>,
    index: DependencyIndex,
    stats: CacheStats,
}

impl CacheState {
    fn forget(&mut self, evicted: &[(String, CacheEntry)]) {
        for (path, _) in evicted {
            self.index.unlink(path);
        }
        self.stats.evictions += evicted.len() as u64;
    }
}

pub struct IncrementalCache {
    state: Mutex<CacheState>,
    storage: Arc<dyn DurableStorage>,
    io: Arc<ExecutionStrategy>,
    persistence_enabled: bool,
}

impl std::fmt::Debug for IncrementalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalCache")
            .field("entries", &self.len())
            .field("persistence_enabled", &self.persistence_enabled)
            .finish()
    }
}

impl IncrementalCache {
    /// `io` wraps every storage read and write; callers normally pass the
    /// selector's I/O retry strategy.
    pub fn new(
        settings: &CacheSettings,
        storage: Arc<dyn DurableStorage>,
        io: Arc<ExecutionStrategy>,
    ) -> Self {
        let ttl = settings.default_ttl_secs.map(Duration::from_secs);
        Self {
            state: Mutex::new(CacheState {
                entries: BoundedStore::new(Some(settings.max_cache_size), ttl),
                index: DependencyIndex::new(),
                stats: CacheStats::default(),
            }),
            storage,
            io,
            persistence_enabled: settings.enable_persistence,
        }
    }

    /// Cache persisted under `<root>/<cache_dir>/cache.json`.
    pub fn for_root(root: &Path, settings: &CacheSettings, io: Arc<ExecutionStrategy>) -> Self {
        let storage = FsStorage::for_root(root, &settings.cache_dir);
        Self::new(settings, Arc::new(storage), io)
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persistence_enabled
    }

    pub fn has_cache(&self, path: &str) -> bool {
        self.state.lock().entries.contains(path)
    }

    pub fn get_cache(&self, path: &str) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let found = state.entries.get(path).cloned();
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Store `entry`, returning the entry it replaced.
    pub fn set_cache(&self, path: &str, entry: CacheEntry) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let dependencies = entry.dependencies.clone();
        let insertion = state.entries.insert(path.to_string(), entry);

        state.forget(&insertion.evicted);
        state.index.link(path, dependencies);
        state.stats.writes += 1;

        if !insertion.evicted.is_empty() {
            debug!(
                "Cache at capacity, evicted {} oldest entries",
                insertion.evicted.len()
            );
        }
        insertion.previous
    }

    /// Remove the entry for `path`. Files depending on `path` keep their
    /// links so [`invalidate_dependents`](Self::invalidate_dependents) can
    /// still reach them.
    pub fn invalidate_cache(&self, path: &str) -> bool {
        let mut state = self.state.lock();
        state.index.unlink(path);
        let removed = state.entries.remove(path).is_some();
        if removed {
            state.stats.invalidations += 1;
        }
        removed
    }

    /// Invalidate every file that transitively depends on `path`. Returns
    /// the affected paths in breadth-first order.
    pub fn invalidate_dependents(&self, path: &str) -> Vec<String> {
        let mut state = self.state.lock();
        let affected = state.index.cascade(path);
        for dependent in &affected {
            state.index.unlink(dependent);
            if state.entries.remove(dependent.as_str()).is_some() {
                state.stats.invalidations += 1;
            }
        }
        if !affected.is_empty() {
            debug!("Invalidated {} dependents of {}", affected.len(), path);
        }
        affected
    }

    /// Direct dependents of `path`, sorted.
    pub fn find_dependents(&self, path: &str) -> Vec<String> {
        self.state.lock().index.dependents_of(path)
    }

    /// Whether a live entry for `path` was computed from `content_hash`.
    /// Does not count as a cache lookup.
    pub fn validate_file_hash(&self, path: &str, content_hash: &str) -> bool {
        self.state
            .lock()
            .entries
            .get(path)
            .is_some_and(|entry| entry.content_hash == content_hash)
    }

    pub fn clear_cache(&self) -> usize {
        let mut state = self.state.lock();
        state.index.clear();
        let dropped = state.entries.clear();
        info!("Cleared {} cache entries", dropped);
        dropped
    }

    /// Evict the oldest-inserted `fraction` of entries (rounded up).
    pub fn trim(&self, fraction: f64) -> usize {
        let mut state = self.state.lock();
        let len = state.entries.len();
        let count = ((len as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let evicted = state.entries.evict_oldest(count);
        state.forget(&evicted);
        debug!("Trimmed {} of {} cache entries", evicted.len(), len);
        evicted.len()
    }

    pub fn purge_expired(&self) -> usize {
        let mut state = self.state.lock();
        let expired = state.entries.purge_expired();
        state.forget(&expired);
        expired.len()
    }

    /// Release spare capacity held by the store.
    pub fn shrink(&self) {
        self.state.lock().entries.shrink_to_fit();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// Cached paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut paths: Vec<String> = state.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn document(&self) -> PersistedCache {
        let state = self.state.lock();
        let entries: BTreeMap<String, CacheEntry> = state
            .entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        PersistedCache::new(entries)
    }

    /// Write every live entry to durable storage. A no-op when persistence
    /// is disabled.
    pub async fn persist_cache(&self) -> Result<()> {
        if !self.persistence_enabled {
            debug!("Cache persistence disabled, skipping write");
            return Ok(());
        }

        let document = self.document();
        let bytes = serde_json::to_vec(&document)?;
        let storage = self.storage.as_ref();
        let payload = bytes.as_slice();
        self.io
            .execute(operation(move || async move {
                storage.write(CACHE_DOCUMENT_KEY, payload).await
            }))
            .await?;

        info!(
            "Persisted {} cache entries ({} bytes)",
            document.entries.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Replace the in-memory cache with the persisted document. Missing,
    /// unreadable or incompatible documents leave an empty cache. Returns the
    /// number of entries loaded.
    pub async fn load_cache(&self) -> usize {
        if !self.persistence_enabled {
            return 0;
        }

        let storage = self.storage.as_ref();
        let read = self
            .io
            .execute(operation(move || async move {
                storage.read(CACHE_DOCUMENT_KEY).await
            }))
            .await;

        let bytes = match read {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No persisted cache found, starting empty");
                self.clear_cache();
                return 0;
            }
            Err(e) => {
                warn!("Failed to read persisted cache, starting empty: {}", e);
                self.clear_cache();
                return 0;
            }
        };

        let document: PersistedCache = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                warn!("Persisted cache is corrupt, starting empty: {}", e);
                self.clear_cache();
                return 0;
            }
        };
        if document.version != CACHE_FORMAT_VERSION {
            warn!(
                "Persisted cache version {} does not match {}, starting empty",
                document.version, CACHE_FORMAT_VERSION
            );
            self.clear_cache();
            return 0;
        }

        let mut state = self.state.lock();
        state.entries.clear();
        state.index.clear();
        for (path, entry) in document.entries {
            let insertion = state.entries.insert(path, entry);
            state.stats.evictions += insertion.evicted.len() as u64;
        }
        let links: Vec<(String, Vec<String>)> = state
            .entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.dependencies.clone()))
            .collect();
        for (path, deps) in links {
            state.index.link(&path, deps);
        }

        let loaded = state.entries.len();
        info!(
            "Loaded {} cache entries written at {}",
            loaded, document.written_at
        );
        loaded
    }
}
