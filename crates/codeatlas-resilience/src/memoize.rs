// ABOUTME: Memoizing strategy keyed by serialized call arguments.
// ABOUTME: Successful results expire after a TTL and are evicted oldest-inserted first.

use crate::Operation;
use codeatlas_core::{BoundedStore, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type Memo = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MemoizeOptions {
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for MemoizeOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

pub struct MemoizingStrategy {
    entries: Mutex<BoundedStore<String, Memo>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for MemoizingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizingStrategy")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

impl MemoizingStrategy {
    pub fn new(options: MemoizeOptions) -> Self {
        Self {
            entries: Mutex::new(BoundedStore::new(
                Some(options.max_size),
                Some(options.ttl),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Drop every memoized result. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.entries.lock().clear();
        debug!("Cleared {} memoized results", dropped);
        dropped
    }

    fn lookup<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let entries = self.entries.lock();
        // a value stored under the same key by a different result type is a miss
        let found = entries
            .get(key)
            .and_then(|memo| memo.downcast_ref::<T>())
            .cloned();
        found
    }

    fn store<T>(&self, key: &str, value: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.entries.lock();
        if entries.max_size().is_some_and(|max| entries.len() >= max) {
            entries.purge_expired();
        }
        let insertion = entries.insert(key.to_string(), Arc::new(value) as Memo);
        if !insertion.evicted.is_empty() {
            debug!("Evicted {} memoized results", insertion.evicted.len());
        }
    }

    pub(crate) async fn run<'a, T>(&self, key: &str, op: Operation<'a, T>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.lookup::<T>(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = op().await?;
        self.store(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation;
    use codeatlas_core::CodeAtlasError;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_results_expire_after_ttl() {
        let memo = MemoizingStrategy::new(MemoizeOptions {
            ttl: Duration::from_secs(10),
            max_size: 10,
        });
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let op = operation(move || async move {
            Ok::<_, CodeAtlasError>(counter.fetch_add(1, Ordering::SeqCst))
        });

        assert_eq!(memo.run("[1,2]", op.clone()).await.unwrap(), 0);
        assert_eq!(memo.run("[1,2]", op.clone()).await.unwrap(), 0);
        assert_eq!(memo.hits(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(memo.run("[1,2]", op.clone()).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_eviction_is_insertion_ordered() {
        let memo = MemoizingStrategy::new(MemoizeOptions {
            ttl: Duration::from_secs(60),
            max_size: 2,
        });
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let op = operation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CodeAtlasError>("v".to_string())
        });

        memo.run("a", op.clone()).await.unwrap();
        memo.run("b", op.clone()).await.unwrap();
        // a hit on "a" does not protect it
        memo.run("a", op.clone()).await.unwrap();
        memo.run("c", op.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        memo.run("b", op.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        memo.run("a", op.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_failures_are_not_memoized() {
        let memo = MemoizingStrategy::new(MemoizeOptions::default());
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let op = operation(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(CodeAtlasError::Parse("nope".into()))
        });
        assert!(memo.run("k", op.clone()).await.is_err());
        assert!(memo.run("k", op).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(memo.is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_entries() {
        let memo = MemoizingStrategy::new(MemoizeOptions::default());
        memo.run("x", operation(|| async { Ok::<_, CodeAtlasError>(1u8) }))
            .await
            .unwrap();
        assert_eq!(memo.clear(), 1);
        assert!(memo.is_empty());
    }
}
