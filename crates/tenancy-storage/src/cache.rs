//! Tenant-scoped cache namespace.
//!
//! Every entry lives under exactly one tag, `tenant_{id}`, and keys are only
//! unique within their tag: two tenants caching `products_home_list` hold two
//! independent entries. Invalidation drops a whole tag at once; there is no
//! per-key delete.
//!
//! # Degradation
//!
//! Backend failures surface as [`TenancyError::CacheUnavailable`] from the
//! [`TagCacheBackend`] but never from [`ScopedCache`]: reads fall through to
//! the producer and writes are skipped with a warning. `invalidate` is the
//! exception and returns the error to the caller.

use crate::TenantContext;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use storefront_tenancy_core::{Result, TenancyError};
use tracing::{debug, info, warn};

/// Default number of entries kept per tag.
pub const DEFAULT_ENTRIES_PER_TAG: usize = 256;

// ============================================================================
// Backend
// ============================================================================

/// A key-value store with TTL and tag partitions.
///
/// Values are opaque bytes; [`ScopedCache`] owns serialization.
#[async_trait]
pub trait TagCacheBackend: Send + Sync {
    /// Fetch a live entry under `tag`.
    async fn get(&self, tag: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store an entry under `tag`, replacing any previous value.
    async fn put(&self, tag: &str, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    /// Drop every entry under `tag`. Returns the number of entries removed.
    async fn flush_tag(&self, tag: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process backend: one LRU per tag.
pub struct InMemoryTagCache {
    tags: Mutex<HashMap<String, LruCache<String, CachedEntry>>>,
    entries_per_tag: NonZeroUsize,
}

impl std::fmt::Debug for InMemoryTagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTagCache")
            .field("tags", &self.tags.lock().len())
            .field("entries_per_tag", &self.entries_per_tag)
            .finish()
    }
}

impl Default for InMemoryTagCache {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRIES_PER_TAG)
    }
}

impl InMemoryTagCache {
    pub fn new(entries_per_tag: usize) -> Self {
        let entries_per_tag = NonZeroUsize::new(entries_per_tag).unwrap_or(NonZeroUsize::MIN);
        Self {
            tags: Mutex::new(HashMap::new()),
            entries_per_tag,
        }
    }

    /// Number of live tags.
    pub fn tag_count(&self) -> usize {
        self.tags.lock().len()
    }
}

#[async_trait]
impl TagCacheBackend for InMemoryTagCache {
    async fn get(&self, tag: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let mut tags = self.tags.lock();
        let Some(partition) = tags.get_mut(tag) else {
            return Ok(None);
        };

        match partition.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                partition.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, tag: &str, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut tags = self.tags.lock();
        let partition = tags
            .entry(tag.to_string())
            .or_insert_with(|| LruCache::new(self.entries_per_tag));
        partition.put(
            key.to_string(),
            CachedEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn flush_tag(&self, tag: &str) -> Result<u64> {
        Ok(self
            .tags
            .lock()
            .remove(tag)
            .map(|p| p.len() as u64)
            .unwrap_or(0))
    }
}

// ============================================================================
// Scoped cache
// ============================================================================

/// Hit/miss counters.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Calls that bypassed the cache because the backend failed
    pub fallbacks: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    invalidations: AtomicU64,
}

/// Cache-aside access partitioned by tenant tag.
#[derive(Clone)]
pub struct ScopedCache {
    backend: Arc<dyn TagCacheBackend>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ScopedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ScopedCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ScopedCache {
    pub fn new(backend: Arc<dyn TagCacheBackend>) -> Self {
        Self {
            backend,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Scoped cache over a fresh [`InMemoryTagCache`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryTagCache::default()))
    }

    /// Read a cached value, treating backend errors and undecodable entries as a miss.
    pub async fn get<T: DeserializeOwned>(&self, tenant: &TenantContext, key: &str) -> Option<T> {
        let tag = tenant.cache_tag();
        match self.backend.get(&tag, key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(tag = %tag, key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    warn!(tag = %tag, key = %key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(tag = %tag, key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(tag = %tag, key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// Only producer errors propagate. A backend that fails on write leaves the
    /// computed value uncached.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        tenant: &TenantContext,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(tenant, key).await {
            return Ok(value);
        }

        let value = producer().await?;
        if ttl.is_zero() {
            return Ok(value);
        }

        let tag = tenant.cache_tag();
        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                if let Err(e) = self.backend.put(&tag, key, bytes, ttl).await {
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    warn!(tag = %tag, key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(tag = %tag, key = %key, error = %e, "Cache value not serializable"),
        }
        Ok(value)
    }

    /// Drop every entry under the tenant's tag.
    pub async fn invalidate(&self, tenant: &TenantContext) -> Result<u64> {
        let tag = tenant.cache_tag();
        let removed = self.backend.flush_tag(&tag).await.map_err(|e| match e {
            TenancyError::CacheUnavailable(_) => e,
            other => TenancyError::CacheUnavailable(other.to_string()),
        })?;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        info!(tenant_id = %tenant, tag = %tag, removed, "Invalidated tenant cache");
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}
