//! In-memory request cache with TTL and capacity bounds.

use super::key::{CacheKey, CacheKeyGenerator};
use crate::{Error, ErrorContext, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "default_ttl_ms", with = "crate::config::duration_ms")]
    pub default_ttl: Duration,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_size: 1000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration_with_context(
                "max_size must be at least 1",
                ErrorContext::new()
                    .with_field_path("cache.max_size")
                    .with_source("request_cache"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Min-heap on expiry. Stale items (overwritten or removed keys) are skipped
    /// by comparing generations against the live entry.
    expiry: BinaryHeap<Reverse<(Instant, u64, String)>>,
    next_generation: u64,
}

impl<V> Inner<V> {
    fn remove_soonest(&mut self) -> Option<String> {
        while let Some(Reverse((_, generation, key))) = self.expiry.pop() {
            let live = self
                .entries
                .get(&key)
                .map(|e| e.generation == generation)
                .unwrap_or(false);
            if live {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn compact_if_needed(&mut self) {
        if self.expiry.len() > 2 * self.entries.len() + 64 {
            self.expiry = self
                .entries
                .iter()
                .map(|(k, e)| Reverse((e.expires_at, e.generation, k.clone())))
                .collect();
        }
    }
}

/// TTL and size bounded memo of idempotent responses.
///
/// Expiry is lazy: a stale entry is dropped when it is next looked up. When the
/// cache is full, the entry closest to expiry is evicted, which approximates LRU
/// without tracking access order. Every operation holds one mutex for its whole
/// check-then-write sequence.
///
/// The cache does not look at HTTP methods; callers decide what is cacheable.
pub struct RequestCache<V> {
    config: CacheConfig,
    keys: CacheKeyGenerator,
    inner: Mutex<Inner<V>>,
    stats: AtomicStats,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            keys: CacheKeyGenerator::new(),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                expiry: BinaryHeap::new(),
                next_generation: 0,
            }),
            stats: AtomicStats::new(),
        })
    }

    /// Use a salted key generator, e.g. to keep tenants apart.
    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key_for(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) -> CacheKey {
        self.keys.generate(method, url, params, body)
    }

    pub fn get(
        &self,
        method: &str,
        url: &str,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Option<V> {
        self.get_by_key(&self.key_for(method, url, params, body))
    }

    pub fn get_by_key(&self, key: &CacheKey) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(key.as_str()) {
            Some(entry) if !entry.is_expired(now) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                trace!(key = %key, "cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key.as_str());
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache entry expired");
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value`; `ttl` falls back to the configured default.
    pub fn set(
        &self,
        method: &str,
        url: &str,
        value: V,
        ttl: Option<Duration>,
        params: &[(String, String)],
        body: Option<&[u8]>,
    ) {
        let key = self.key_for(method, url, params, body);
        self.set_by_key(key, value, ttl);
    }

    pub fn set_by_key(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));

        let mut inner = self.lock();
        if !inner.entries.contains_key(key.as_str()) && inner.entries.len() >= self.config.max_size {
            if let Some(evicted) = inner.remove_soonest() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %evicted, "cache full, evicted soonest-expiring entry");
            }
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner
            .expiry
            .push(Reverse((expires_at, generation, key.hash.clone())));
        inner.entries.insert(
            key.hash,
            CacheEntry {
                value,
                expires_at,
                generation,
            },
        );
        inner.compact_if_needed();
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.lock().entries.remove(key.as_str()).is_some()
    }

    /// Drop every expired entry now instead of waiting for lookups.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| !e.is_expired(now));
        let purged = before - inner.entries.len();
        inner.compact_if_needed();
        self.stats
            .expirations
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.expiry.clear();
    }

    /// Number of resident entries, including expired ones not yet purged.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }
}
