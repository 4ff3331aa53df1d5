//! Capacity-bounded LRU cache
//!
//! Every resident key carries a stamp from a per-cache counter that
//! increases on each `get` and `add`. The recency index maps stamps back to
//! keys, so the least recently used key is always the first index entry.
//! Stamps are unique, which means two entries are never equally stale.
//!
//! Shrinking the capacity is lazy: `set_capacity` never evicts by itself.
//! The next insert of a new key evicts least recently used entries until the
//! new key fits under the current capacity.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::num::NonZeroUsize;

struct Slot<V> {
    value: V,
    stamp: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    recency: BTreeMap<u64, K>,
    next_stamp: u64,
    capacity: NonZeroUsize,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn stamp(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    /// Move `key` to the most recently used position
    fn touch(&mut self, key: &K) {
        let stamp = self.stamp();
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.stamp);
            slot.stamp = stamp;
            self.recency.insert(stamp, key.clone());
        }
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }
}

/// Thread-safe LRU cache holding at most `capacity` entries
pub struct BoundedCache<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_stamp: 0,
                capacity,
            }),
        }
    }

    /// Get a value, marking it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(key) {
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).map(|slot| slot.value.clone())
    }

    /// Check residency without affecting recency
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Get a value without affecting recency
    pub fn peek(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.get(key).map(|slot| slot.value.clone())
    }

    /// Overwrite the value of a resident key, keeping its recency.
    ///
    /// Returns the previous value, or `None` without inserting anything if
    /// the key is not resident.
    pub fn replace(&self, key: &K, value: V) -> Option<V> {
        self.inner
            .lock()
            .entries
            .get_mut(key)
            .map(|slot| std::mem::replace(&mut slot.value, value))
    }

    /// Insert or overwrite a value, marking it most recently used.
    ///
    /// Inserting a new key while the cache is full evicts least recently
    /// used entries first. Returns the evicted entries.
    pub fn add(&self, key: K, value: V) -> Vec<(K, V)> {
        let mut inner = self.inner.lock();

        if let Some(slot) = inner.entries.get_mut(&key) {
            slot.value = value;
            inner.touch(&key);
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while inner.entries.len() >= inner.capacity.get() {
            match inner.evict_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }

        let stamp = inner.stamp();
        inner.recency.insert(stamp, key.clone());
        inner.entries.insert(key, Slot { value, stamp });

        evicted
    }

    /// Remove an entry if present
    pub fn delete(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let slot = inner.entries.remove(key)?;
        inner.recency.remove(&slot.stamp);
        Some(slot.value)
    }

    /// Snapshot of resident keys, least recently used first
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().recency.values().cloned().collect()
    }

    /// Change the capacity, returning the previous one. Does not evict.
    pub fn set_capacity(&self, capacity: NonZeroUsize) -> NonZeroUsize {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.capacity, capacity)
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }
}
