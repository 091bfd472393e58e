//! Cache store contract.
//!
//! A key/value store with per-entry TTL and glob pattern invalidation. An
//! empty cache is always a legal state, so every caller must cope with a miss.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Eviction priority; low-priority entries go first under memory pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Serve entries past their TTL (stale fallback).
    pub allow_stale: bool,
}

impl GetOptions {
    pub fn fresh() -> Self {
        Self { allow_stale: false }
    }

    pub fn stale() -> Self {
        Self { allow_stale: true }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetOptions {
    /// Zero means "not cacheable"; the store drops the write.
    pub ttl: Duration,
    pub priority: CachePriority,
}

impl SetOptions {
    pub fn new(ttl: Duration, priority: CachePriority) -> Self {
        Self { ttl, priority }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str, opts: GetOptions) -> Option<Value>;

    async fn set(&self, key: &str, value: Value, opts: SetOptions);

    /// Remove one key. Returns whether it was present.
    async fn delete(&self, key: &str) -> bool;

    /// Remove every key matching a `*` glob. Returns the number removed.
    async fn invalidate_pattern(&self, pattern: &str) -> usize;

    /// Reachability check for health sweeps.
    async fn ping(&self) -> bool {
        true
    }
}

/// Typed helpers over any [`CacheStore`].
#[async_trait]
pub trait CacheStoreExt: CacheStore {
    async fn get_as<T>(&self, key: &str, opts: GetOptions) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let value = self.get(key, opts).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                self.delete(key).await;
                None
            }
        }
    }

    async fn get_or<T>(&self, key: &str, default: T, opts: GetOptions) -> T
    where
        T: DeserializeOwned + Send,
    {
        self.get_as(key, opts).await.unwrap_or(default)
    }

    async fn set_as<T>(&self, key: &str, value: &T, opts: SetOptions) -> Result<(), serde_json::Error>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value, opts).await;
        Ok(())
    }
}

impl<S: CacheStore + ?Sized> CacheStoreExt for S {}
