//! Bounded TTL + LRU caches backing query resolution.
//!
//! A [`Cache`] holds at most `max_size` entries, each with its own expiry.
//! Expired entries are removed lazily on access and actively by
//! [`Cache::cleanup`], which the supervisor runs on every sweep. Inserting a
//! new key at capacity evicts the least recently used entry first, so the
//! size bound holds at all times.
//!
//! All methods take `&self`; the store sits behind a short-lived mutex that
//! is never held across an `await`.

use std::{
    fmt,
    future::Future,
    hash::Hash,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tokio::time::Instant;

use crate::{
    backend::{BackendKind, Candidate},
    config::{BucketConfig, CacheConfig},
    error::Result,
    track::StreamHandle,
};

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    access_count: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, Entry<V>>,
    hits: u64,
    misses: u64,
}

/// Hit and miss counters of one bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub name: &'static str,
    pub len: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl Stats {
    /// Ratio of hits over all lookups, or zero without lookups.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} entries, {} hits, {} misses ({:.1}%)",
            self.name,
            self.len,
            self.max_size,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )
    }
}

/// A live entry as exported by [`Cache::export`].
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exported<K, V> {
    pub key: K,
    pub value: V,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub remaining_ttl: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default)]
    pub age: Duration,

    #[serde(default)]
    pub access_count: u64,
}

/// A bounded map with per-entry expiry and least-recently-used eviction.
pub struct Cache<K: Hash + Eq, V> {
    name: &'static str,
    ttl: Duration,
    max_size: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty cache. A `max_size` of zero is treated as one.
    #[must_use]
    pub fn new(name: &'static str, ttl: Duration, max_size: usize) -> Self {
        Self {
            name,
            ttl,
            max_size: max_size.max(1),
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    #[must_use]
    pub fn with_config(name: &'static str, config: BucketConfig) -> Self {
        Self::new(name, config.ttl, config.max_size)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // Entries stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Inserts with the default time to live.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.ttl);
    }

    /// Inserts with a specific time to live, replacing any previous value.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let mut inner = self.lock();

        if !inner.entries.contains(&key) && inner.entries.len() >= self.max_size {
            if inner.entries.pop_lru().is_some() {
                trace!("{}: evicted least recently used entry", self.name);
            }
        }

        inner.entries.put(
            key,
            Entry {
                value,
                created_at: now,
                expires_at: now + ttl,
                access_count: 0,
            },
        );
    }

    /// Returns a live value and marks it most recently used.
    ///
    /// An expired entry is removed and counts as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                inner.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                inner.entries.pop(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether a live value exists, without touching recency or counters.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired = match inner.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => return false,
        };

        if expired {
            inner.entries.pop(key);
        }
        !expired
    }

    /// Removes an entry, returning whether one existed.
    pub fn delete(&self, key: &K) -> bool {
        self.lock().entries.pop(key).is_some()
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();

        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.pop(key);
        }

        expired.len()
    }

    /// Removes the least recently used entry.
    pub fn evict_lru(&self) -> Option<K> {
        self.lock().entries.pop_lru().map(|(key, _)| key)
    }

    /// Evicts until the size bound holds again. Returns the number of
    /// evicted entries, which is zero unless the bound was violated.
    pub fn trim(&self) -> usize {
        let mut inner = self.lock();
        let mut evicted = 0;
        while inner.entries.len() > self.max_size {
            if inner.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }

        if evicted > 0 {
            error!(
                "{}: cache held {} entries over its bound of {}",
                self.name, evicted, self.max_size
            );
        }
        evicted
    }

    /// Number of entries, including expired ones not yet cleaned up.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry and resets the counters.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            name: self.name,
            len: inner.entries.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Snapshot of the live entries, most recently used first.
    #[must_use]
    pub fn export(&self) -> Vec<Exported<K, V>> {
        let now = Instant::now();
        self.lock()
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| Exported {
                key: key.clone(),
                value: entry.value.clone(),
                remaining_ttl: entry.expires_at - now,
                age: now - entry.created_at,
                access_count: entry.access_count,
            })
            .collect()
    }

    /// Restores exported entries with their remaining time to live. Returns
    /// the number of entries imported.
    pub fn import<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = Exported<K, V>>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let mut imported = 0;
        // Least recently used first, so recency survives the round trip.
        for entry in entries.into_iter().rev() {
            if entry.remaining_ttl.is_zero() {
                continue;
            }
            self.set_with_ttl(entry.key, entry.value, entry.remaining_ttl);
            imported += 1;
        }
        imported
    }

    /// Returns the cached value or computes, stores and returns a new one.
    ///
    /// The producer runs at most once per call. If it yields `None` nothing
    /// is stored; if it fails the error is returned unchanged and nothing is
    /// stored.
    ///
    /// # Errors
    ///
    /// Propagates the producer's error.
    pub async fn get_or_set<F, Fut>(
        &self,
        key: K,
        producer: F,
        ttl: Option<Duration>,
    ) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(Some(value));
        }

        let value = producer().await?;
        if let Some(ref value) = value {
            self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.ttl));
        }
        Ok(value)
    }
}

impl<K: Hash + Eq, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

/// Lookup key of the resolution buckets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub backend: BackendKind,
    pub query: String,
}

impl Key {
    /// Key of a free-text search: whitespace collapsed, case folded.
    #[must_use]
    pub fn search(backend: BackendKind, query: &str) -> Self {
        let query = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        Self { backend, query }
    }

    /// Key of a canonical URL, kept verbatim apart from surrounding space.
    #[must_use]
    pub fn url(backend: BackendKind, url: &str) -> Self {
        Self {
            backend,
            query: url.trim().to_owned(),
        }
    }
}

/// The cache buckets shared by resolver, preloader and supervisor.
#[derive(Debug)]
pub struct Caches {
    pub search: Cache<Key, Candidate>,
    pub urls: Cache<Key, Candidate>,
    pub metadata: Cache<Key, Candidate>,
    pub streams: Cache<String, StreamHandle>,
}

impl Caches {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            search: Cache::with_config("search", config.search),
            urls: Cache::with_config("urls", config.urls),
            metadata: Cache::with_config("metadata", config.metadata),
            streams: Cache::with_config("streams", config.streams),
        }
    }

    /// Purges expired entries in every bucket.
    pub fn cleanup(&self) -> usize {
        self.search.cleanup()
            + self.urls.cleanup()
            + self.metadata.cleanup()
            + self.streams.cleanup()
    }

    /// Restores the size bound of every bucket.
    pub fn trim(&self) -> usize {
        self.search.trim() + self.urls.trim() + self.metadata.trim() + self.streams.trim()
    }

    pub fn clear(&self) {
        self.search.clear();
        self.urls.clear();
        self.metadata.clear();
        self.streams.clear();
    }

    #[must_use]
    pub fn stats(&self) -> [Stats; 4] {
        [
            self.search.stats(),
            self.urls.stats(),
            self.metadata.stats(),
            self.streams.stats(),
        ]
    }
}
