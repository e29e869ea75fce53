// Copyright 2025 Strobe project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::hash::Hash;
use std::sync::atomic::{self, AtomicU64};
use std::time::{Duration, Instant};

use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;

/// Point-in-time counters for a cache.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
    // Monotonic recency tick; cheaper to order by than Instants.
    tick: u64,
}

struct Inner<K, V> {
    // key -> signature -> entry. Nested so that invalidating a key is O(1).
    entries: HashMap<K, HashMap<u64, Entry<V>>>,
    len: usize,
    tick: u64,
}

impl<K: Clone + Eq + Hash, V> Inner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    ///
    /// Drops the least-recently-used half of the cache in one pass. Amortizes eviction cost over
    /// many inserts rather than paying an ordering structure on every access.
    ///
    fn evict_half(&mut self) {
        let mut ticks: Vec<u64> = self
            .entries
            .values()
            .flat_map(|sigs| sigs.values().map(|e| e.tick))
            .collect();
        ticks.sort_unstable();
        // Everything at or below the cutoff (the older half) is dropped.
        let cutoff = ticks[(ticks.len() / 2).saturating_sub(1)];

        for sigs in self.entries.values_mut() {
            sigs.retain(|_, e| e.tick > cutoff);
        }
        self.entries.retain(|_, sigs| !sigs.is_empty());
        self.len = self.entries.values().map(|sigs| sigs.len()).sum();
    }
}

///
/// A bounded `(key, signature) -> value` store with least-recently-used eviction on insert
/// overflow and idle-time expiry on access.
///
/// The signature is an opaque fingerprint computed by the caller: two lookups with the same key
/// but different signatures never observe each other's values. The cache is internally
/// synchronized and is never authoritative over the caller's dirty state.
///
pub struct ResultCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: usize,
    idle_ttl: Duration,
}

impl<K: Clone + Eq + Hash, V: Clone> ResultCache<K, V> {
    pub const DEFAULT_CAPACITY: usize = 4096;
    pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(300);

    pub fn new() -> ResultCache<K, V> {
        Self::with_capacity(Self::DEFAULT_CAPACITY, Self::DEFAULT_IDLE_TTL)
    }

    pub fn with_capacity(capacity: usize, idle_ttl: Duration) -> ResultCache<K, V> {
        assert!(capacity > 0, "cache capacity must be non-zero");
        ResultCache {
            inner: Mutex::new(Inner {
                entries: HashMap::default(),
                len: 0,
                tick: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity,
            idle_ttl,
        }
    }

    ///
    /// Returns the value stored for `(key, signature)`, refreshing its recency. An entry which
    /// has been idle for longer than the configured TTL is dropped and reported as a miss.
    ///
    pub fn get(&self, key: &K, signature: u64) -> Option<V> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();
        let now = Instant::now();

        let mut expired = false;
        let result = match inner.entries.get_mut(key).and_then(|sigs| sigs.get_mut(&signature)) {
            Some(entry) if now.duration_since(entry.last_access) > self.idle_ttl => {
                expired = true;
                None
            }
            Some(entry) => {
                entry.last_access = now;
                entry.tick = tick;
                Some(entry.value.clone())
            }
            None => None,
        };

        if expired {
            let removed = inner
                .entries
                .get_mut(key)
                .and_then(|sigs| sigs.remove(&signature))
                .is_some();
            if removed {
                inner.len -= 1;
            }
        }

        match result {
            Some(_) => {
                self.hits.fetch_add(1, atomic::Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, atomic::Ordering::Relaxed);
            }
        }
        result
    }

    ///
    /// Stores a value for `(key, signature)`, evicting the least-recently-used half of the cache
    /// first if the insert would overflow capacity.
    ///
    pub fn put(&self, key: K, signature: u64, value: V) {
        let mut inner = self.inner.lock();
        if inner.len >= self.capacity
            && !inner
                .entries
                .get(&key)
                .is_some_and(|sigs| sigs.contains_key(&signature))
        {
            log::debug!("Result cache at capacity ({}): evicting", self.capacity);
            inner.evict_half();
        }

        let tick = inner.next_tick();
        let now = Instant::now();
        let sigs = inner.entries.entry(key).or_default();
        let replaced = sigs
            .insert(
                signature,
                Entry {
                    value,
                    inserted_at: now,
                    last_access: now,
                    tick,
                },
            )
            .is_some();
        if !replaced {
            inner.len += 1;
        }
    }

    /// Drops every entry for the given key, regardless of signature.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock();
        if let Some(sigs) = inner.entries.remove(key) {
            inner.len -= sigs.len();
        }
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.len = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Age of the entry for `(key, signature)`, if present. Test/diagnostic surface.
    pub fn age(&self, key: &K, signature: u64) -> Option<Duration> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .and_then(|sigs| sigs.get(&signature))
            .map(|e| e.inserted_at.elapsed())
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        CacheStats {
            hits: self.hits.load(atomic::Ordering::Relaxed),
            misses: self.misses.load(atomic::Ordering::Relaxed),
            size,
            capacity: self.capacity,
            utilization: size as f64 / self.capacity as f64,
        }
    }
}

#[cfg(test)]
mod tests;
