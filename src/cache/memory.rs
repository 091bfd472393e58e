//! Sharded in-memory cache store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::cache::pattern::KeyPattern;
use crate::cache::store::{CachePriority, CacheStore, GetOptions, SetOptions};
use crate::config::CacheConfig;
use crate::correction::hooks::MemoryReclaimer;
use crate::observability::metrics;

/// One cached value with its freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub ttl: Duration,
    pub priority: CachePriority,
    pub inserted_at: Instant,
    /// Approximate serialized size, for memory accounting.
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }

    fn is_retained(&self, now: Instant, stale_retention: Duration) -> bool {
        now.duration_since(self.inserted_at) < self.ttl + stale_retention
    }
}

/// Counts for the admin API.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub entries: usize,
    pub fresh: usize,
    pub stale: usize,
    pub held_bytes: u64,
}

/// A thread-safe TTL cache. Entries past their TTL are kept for
/// `stale_retention` so they can still serve stale fallbacks.
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    inner: Arc<DashMap<String, CacheEntry>>,
    held_bytes: Arc<AtomicU64>,
    max_entries: usize,
    /// Entries evicted at once when the store is full of fresh entries.
    evict_batch: usize,
    stale_retention: Duration,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            held_bytes: Arc::new(AtomicU64::new(0)),
            max_entries: config.max_entries.max(1),
            evict_batch: (config.max_entries / 20).max(1),
            stale_retention: Duration::from_secs(config.stale_retention_secs),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn summary(&self) -> CacheSummary {
        let now = Instant::now();
        let mut summary = CacheSummary {
            held_bytes: self.held_bytes.load(Ordering::Relaxed),
            ..Default::default()
        };
        for entry in self.inner.iter() {
            summary.entries += 1;
            if entry.is_fresh(now) {
                summary.fresh += 1;
            } else {
                summary.stale += 1;
            }
        }
        summary
    }

    /// Drop entries past `ttl + stale_retention`. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        self.remove_where(|e| !e.is_retained(now, self.stale_retention)).0
    }

    fn remove_where<P>(&self, predicate: P) -> (usize, u64)
    where
        P: Fn(&CacheEntry) -> bool,
    {
        let mut removed = 0;
        let mut freed = 0;
        self.inner.retain(|_, entry| {
            if predicate(entry) {
                removed += 1;
                freed += entry.size_bytes;
                false
            } else {
                true
            }
        });
        self.held_bytes.fetch_sub(freed, Ordering::Relaxed);
        if removed > 0 {
            metrics::record_cache_size(self.inner.len());
        }
        (removed, freed)
    }

    fn remove_key(&self, key: &str) -> bool {
        match self.inner.remove(key) {
            Some((_, entry)) => {
                self.held_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Make room for one more entry: stale entries first, then a batch of
    /// the lowest-priority, oldest entries. Full scans happen once per batch
    /// rather than once per insert.
    fn make_room(&self) {
        if self.inner.len() < self.max_entries {
            return;
        }
        let now = Instant::now();
        self.remove_where(|e| !e.is_fresh(now));
        if self.inner.len() < self.max_entries {
            return;
        }

        let mut candidates: Vec<(CachePriority, Instant, String)> = self
            .inner
            .iter()
            .map(|e| (e.priority, e.inserted_at, e.key().clone()))
            .collect();
        let batch = self.evict_batch.min(candidates.len());
        if batch < candidates.len() {
            candidates.select_nth_unstable(batch);
        }
        candidates.truncate(batch);

        for (_, _, key) in &candidates {
            self.remove_key(key);
        }
        tracing::debug!(evicted = batch, "Evicted cache entries");
        metrics::record_cache_size(self.inner.len());
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, opts: GetOptions) -> Option<Value> {
        let now = Instant::now();
        let entry = self.inner.get(key)?;
        if opts.allow_stale {
            if entry.is_retained(now, self.stale_retention) {
                return Some(entry.value.clone());
            }
        } else if entry.is_fresh(now) {
            return Some(entry.value.clone());
        }
        None
    }

    async fn set(&self, key: &str, value: Value, opts: SetOptions) {
        if opts.ttl.is_zero() {
            return;
        }
        if !self.inner.contains_key(key) {
            self.make_room();
        }

        let size_bytes = serde_json::to_vec(&value).map_or(0, |v| v.len() as u64) + key.len() as u64;
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            ttl: opts.ttl,
            priority: opts.priority,
            inserted_at: Instant::now(),
            size_bytes,
        };
        self.held_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        if let Some(previous) = self.inner.insert(key.to_string(), entry) {
            self.held_bytes.fetch_sub(previous.size_bytes, Ordering::Relaxed);
        }
        metrics::record_cache_size(self.inner.len());
    }

    async fn delete(&self, key: &str) -> bool {
        self.remove_key(key)
    }

    async fn invalidate_pattern(&self, pattern: &str) -> usize {
        match KeyPattern::new(pattern) {
            Ok(glob) => self.remove_where(|e| glob.matches(&e.key)).0,
            Err(e) => {
                tracing::error!(pattern, error = %e, "Invalid invalidation pattern, clearing all entries");
                self.remove_where(|_| true).0
            }
        }
    }
}

#[async_trait]
impl MemoryReclaimer for MemoryCacheStore {
    fn name(&self) -> &str {
        "cache"
    }

    fn held_bytes(&self) -> u64 {
        self.held_bytes.load(Ordering::Relaxed)
    }

    /// Release everything past its TTL plus all low-priority entries.
    async fn reclaim(&self) -> u64 {
        let now = Instant::now();
        let (removed, freed) =
            self.remove_where(|e| !e.is_fresh(now) || e.priority == CachePriority::Low);
        tracing::info!(removed, freed_bytes = freed, "Cache memory reclaimed");
        freed
    }
}
