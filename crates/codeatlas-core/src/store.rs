// ABOUTME: Bounded key-value store with insertion-order (FIFO) eviction and optional TTL.
// ABOUTME: Shared by the memoizing strategy and the incremental file cache.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Result of [`BoundedStore::insert`].
#[derive(Debug)]
pub struct Insertion<K, V> {
    pub previous: Option<V>,
    pub evicted: Vec<(K, V)>,
}

/// A key-value store that evicts the oldest *inserted* key once `max_size`
/// is reached. Reads never change eviction order, and overwriting an
/// existing key keeps its original position.
#[derive(Debug, Clone)]
pub struct BoundedStore<K, V> {
    slots: HashMap<K, Slot<V>>,
    order: BTreeMap<u64, K>,
    next_seq: u64,
    max_size: Option<usize>,
    ttl: Option<Duration>,
}

impl<K, V> Default for BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<K, V> BoundedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(max_size: Option<usize>, ttl: Option<Duration>) -> Self {
        Self {
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            max_size: max_size.filter(|m| *m > 0),
            ttl,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_expired(&self, slot: &Slot<V>) -> bool {
        match self.ttl {
            Some(ttl) => slot.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }

    /// Returns the value unless it is missing or expired. Expired entries
    /// are left in place until [`purge_expired`](Self::purge_expired) or an
    /// overwrite.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.slots
            .get(key)
            .filter(|slot| !self.is_expired(slot))
            .map(|slot| &slot.value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: K, value: V) -> Insertion<K, V> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get_mut(&key) {
            let previous = std::mem::replace(&mut slot.value, value);
            slot.inserted_at = now;
            return Insertion {
                previous: Some(previous),
                evicted: Vec::new(),
            };
        }

        let mut evicted = Vec::new();
        if let Some(max) = self.max_size {
            while self.slots.len() >= max {
                match self.pop_oldest() {
                    Some(pair) => evicted.push(pair),
                    None => break,
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.slots.insert(
            key,
            Slot {
                value,
                inserted_at: now,
                seq,
            },
        );

        Insertion {
            previous: None,
            evicted,
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.seq);
        Some(slot.value)
    }

    fn pop_oldest(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        Some((key, slot.value))
    }

    /// Evicts up to `count` entries, oldest insertion first.
    pub fn evict_oldest(&mut self, count: usize) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(count.min(self.slots.len()));
        for _ in 0..count {
            match self.pop_oldest() {
                Some(pair) => out.push(pair),
                None => break,
            }
        }
        out
    }

    pub fn purge_expired(&mut self) -> Vec<(K, V)> {
        if self.ttl.is_none() {
            return Vec::new();
        }
        let expired: Vec<K> = self
            .order
            .values()
            .filter(|k| {
                self.slots
                    .get(*k)
                    .map(|slot| self.is_expired(slot))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        expired
            .into_iter()
            .filter_map(|k| self.remove(&k).map(|v| (k, v)))
            .collect()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.slots.len();
        self.slots.clear();
        self.order.clear();
        n
    }

    pub fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Unexpired entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        self.order.values().filter_map(move |k| {
            self.slots
                .get(k)
                .filter(|slot| !self.is_expired(slot))
                .map(|slot| (k, &slot.value))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }
}
