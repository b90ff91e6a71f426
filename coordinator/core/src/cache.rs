//! Time-bounded cache shared by the embedding and discovery layers
//!
//! Reads of populated keys go straight to the `DashMap` shard and never touch
//! a population lock. First-time population of a key is serialized so two
//! concurrent misses for the same key run the populating future once.
//!
//! Memory is bounded two ways:
//! - at most `max_entries` entries; inserting past the bound evicts the
//!   least recently used entry
//! - expired entries are swept at most once per TTL, driven by ordinary
//!   `get`/`insert` traffic

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default entry bound
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// A cached value and its expiry
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,
    /// Entry is dead once `now > expires_at`
    pub expires_at: Instant,
    /// Last read or write, in milliseconds since the cache was created
    last_used_ms: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// What a populating future decided
#[derive(Debug, Clone, PartialEq)]
pub enum Fill<V> {
    /// Store the value and return it
    Cache(V),
    /// Return the value without storing it
    Skip(V),
}

/// Outcome of [`TtlCache::get_or_populate`]
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// Served from a live entry
    Hit(V),
    /// Produced by the populating future
    Miss(V),
}

impl<V> Lookup<V> {
    /// Whether the value came from the cache
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Unwrap the value
    pub fn into_value(self) -> V {
        match self {
            Self::Hit(v) | Self::Miss(v) => v,
        }
    }
}

/// Counters for operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from a live entry
    pub hits: u64,
    /// Lookups that found nothing live
    pub misses: u64,
    /// Entries written
    pub inserts: u64,
    /// Live entries dropped to stay within the entry bound
    pub evictions: u64,
}

/// A key's population lock and how many callers hold it
#[derive(Debug)]
struct Population {
    lock: Arc<Mutex<()>>,
    holders: usize,
}

/// Holds a key's population lock and releases its map entry on drop
///
/// The entry is removed by the last holder only, so a waiter still queued
/// on the lock keeps serializing with later arrivals. Drop also runs when
/// the caller's future is cancelled.
struct PopulationSlot<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Population>,
    key: K,
    lock: Arc<Mutex<()>>,
}

impl<'a, K: Eq + Hash + Clone> PopulationSlot<'a, K> {
    fn enter(locks: &'a DashMap<K, Population>, key: K) -> Self {
        let lock = {
            let mut population = locks.entry(key.clone()).or_insert_with(|| Population {
                lock: Arc::new(Mutex::new(())),
                holders: 0,
            });
            population.holders += 1;
            Arc::clone(&population.lock)
        };
        Self { locks, key, lock }
    }
}

impl<K: Eq + Hash> Drop for PopulationSlot<'_, K> {
    fn drop(&mut self) {
        self.locks.remove_if_mut(&self.key, |_, population| {
            population.holders = population.holders.saturating_sub(1);
            population.holders == 0
        });
    }
}

/// TTL cache keyed by `K`
#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CacheEntry<V>>,
    populating: DashMap<K, Population>,
    ttl: Duration,
    max_entries: usize,
    epoch: Instant,
    last_sweep_ms: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache whose entries live for `ttl`, bounded at
    /// [`DEFAULT_MAX_ENTRIES`]
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            populating: DashMap::new(),
            ttl,
            max_entries: DEFAULT_MAX_ENTRIES,
            epoch: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Bound the number of entries (at least one)
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry bound
    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn live(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                entry
                    .last_used_ms
                    .store(self.elapsed_ms(now), Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        None
    }

    /// Purge expired entries if a TTL has passed since the last sweep
    fn maybe_sweep(&self) {
        let now_ms = self.elapsed_ms(Instant::now());
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        let ttl_ms = self.ttl.as_millis() as u64;
        if now_ms.saturating_sub(last) < ttl_ms.max(1) {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = self.entries.len(), "Swept expired cache entries");
            }
        }
    }

    /// Drop the least recently used entry; `false` when empty
    fn evict_lru(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().last_used_ms.load(Ordering::Relaxed))
            .map(|e| e.key().clone());

        match victim {
            Some(key) => {
                if self.entries.remove(&key).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// Live value for `key`; expired entries are evicted on the way
    pub fn get(&self, key: &K) -> Option<V> {
        let found = self.live(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_sweep();
        found
    }

    /// Store `value`, expiring `ttl` from now
    ///
    /// A new key inserted at the bound first drops expired entries, then the
    /// least recently used ones.
    pub fn insert(&self, key: K, value: V) {
        self.maybe_sweep();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.purge_expired();
            while self.entries.len() >= self.max_entries && self.evict_lru() {}
        }

        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_used_ms: AtomicU64::new(self.elapsed_ms(now)),
            },
        );
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Return the live value for `key`, or run `populate` under the key's
    /// population lock
    ///
    /// After acquiring the lock the cache is checked again, so a waiter that
    /// lost the race is served the winner's value.
    pub async fn get_or_populate<F, Fut>(&self, key: K, populate: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Fill<V>>,
    {
        if let Some(v) = self.get(&key) {
            return Lookup::Hit(v);
        }

        let slot = PopulationSlot::enter(&self.populating, key.clone());
        let _held = slot.lock.lock().await;

        if let Some(v) = self.live(&key) {
            return Lookup::Hit(v);
        }

        match populate().await {
            Fill::Cache(v) => {
                self.insert(key, v.clone());
                Lookup::Miss(v)
            }
            Fill::Skip(v) => Lookup::Miss(v),
        }
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries (live or not yet purged)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any stored value matches `pred`
    pub fn any_value(&self, pred: impl Fn(&V) -> bool) -> bool {
        self.entries.iter().any(|e| pred(&e.value().value))
    }

    /// Hit/miss/insert counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
