//! Memory Cache Implementation
//!
//! In-process LRU cache used as the metadata backing store when Redis is not
//! configured. Entries carry an optional absolute expiry.

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::{
    config::CacheConfig,
    error::{PipelineError, PipelineResult},
};

use super::{Cache, CacheOp, CacheStats, InternalCacheStats};

/// Assumed average entry size when sizing the LRU from a byte budget
const AVG_ENTRY_SIZE_BYTES: u64 = 1024;

/// Cache entry with expiration
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<u64>, // Unix timestamp in seconds
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

impl CacheEntry {
    /// Create a new cache entry
    fn new(data: Vec<u8>, ttl_seconds: Option<u64>) -> Self {
        let expires_at = ttl_seconds.map(|ttl| now_secs().saturating_add(ttl));
        Self { data, expires_at }
    }

    /// Check if entry has expired
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| now_secs() >= expires_at)
    }
}

/// In-memory LRU cache implementation
#[derive(Debug)]
pub struct MemoryCache {
    cache: Arc<parking_lot::Mutex<LruCache<String, CacheEntry>>>,
    stats: Arc<parking_lot::Mutex<InternalCacheStats>>,
}

impl MemoryCache {
    /// Create a new memory cache sized from `config.memory_cache_size_bytes`
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if the size cannot be represented.
    pub fn new(config: &CacheConfig) -> PipelineResult<Self> {
        let max_entries = config.memory_cache_size_bytes / AVG_ENTRY_SIZE_BYTES;
        Self::with_capacity(usize::try_from(max_entries.max(1)).map_err(|e| {
            PipelineError::configuration(format!("Cache size conversion error: {e}"))
        })?)
    }

    /// Create a memory cache holding at most `max_entries`
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if `max_entries` is zero.
    pub fn with_capacity(max_entries: usize) -> PipelineResult<Self> {
        let capacity = NonZeroUsize::new(max_entries)
            .ok_or_else(|| PipelineError::configuration("Invalid cache size"))?;

        tracing::info!("Memory cache created with capacity: {} entries", max_entries);

        Ok(Self {
            cache: Arc::new(parking_lot::Mutex::new(LruCache::new(capacity))),
            stats: Arc::new(parking_lot::Mutex::new(InternalCacheStats::default())),
        })
    }

    /// Clean expired entries from cache
    fn cleanup_expired(&self) {
        let mut cache = self.cache.lock();
        let expired_keys: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired_keys {
            cache.pop(&key);
        }
    }

    fn record_stats(&self, op: CacheOp, hit: bool, duration: Duration) {
        self.stats.lock().record(op, hit, duration);
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let start = Instant::now();

        // 1% chance to sweep expired entries
        if fastrand::f32() < 0.01 {
            self.cleanup_expired();
        }

        let result = {
            let mut cache = self.cache.lock();
            match cache.peek(key).map(CacheEntry::is_expired) {
                Some(true) => {
                    cache.pop(key);
                    None
                }
                Some(false) => cache.get(key).map(|entry| entry.data.clone()),
                None => None,
            }
        };

        self.record_stats(CacheOp::Get, result.is_some(), start.elapsed());

        tracing::trace!(
            "Memory GET {}: {}",
            key,
            if result.is_some() { "HIT" } else { "MISS" }
        );
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> PipelineResult<()> {
        let start = Instant::now();

        let entry = CacheEntry::new(value.to_vec(), ttl_seconds);
        self.cache.lock().put(key.to_string(), entry);

        self.record_stats(CacheOp::Set, true, start.elapsed());

        tracing::trace!(
            "Memory SET {}: {} bytes, TTL: {:?}",
            key,
            value.len(),
            ttl_seconds
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> PipelineResult<bool> {
        let start = Instant::now();

        let was_present = self.cache.lock().pop(key).is_some();

        self.record_stats(CacheOp::Delete, was_present, start.elapsed());

        tracing::trace!(
            "Memory DEL {}: {}",
            key,
            if was_present { "DELETED" } else { "NOT_FOUND" }
        );
        Ok(was_present)
    }

    async fn exists(&self, key: &str) -> PipelineResult<bool> {
        let cache = self.cache.lock();
        let exists = cache.peek(key).is_some_and(|entry| !entry.is_expired());

        tracing::trace!("Memory EXISTS {}: {}", key, exists);
        Ok(exists)
    }

    async fn stats(&self) -> PipelineResult<CacheStats> {
        let entries = u64::try_from(self.cache.lock().len()).unwrap_or(u64::MAX);
        Ok(self.stats.lock().snapshot(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cache_basic_operations() -> PipelineResult<()> {
        let cache = MemoryCache::new(&CacheConfig::default())?;

        cache.set("test_key", b"test_value", None).await?;
        let result = cache.get("test_key").await?;
        assert_eq!(result, Some(b"test_value".to_vec()));
        assert!(cache.exists("test_key").await?);

        let deleted = cache.delete("test_key").await?;
        assert!(deleted);

        let result = cache.get("test_key").await?;
        assert_eq!(result, None);

        let stats = cache.stats().await?;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.deletes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_cache_expiration() -> PipelineResult<()> {
        let cache = MemoryCache::new(&CacheConfig::default())?;

        cache.set("expire_key", b"expire_value", Some(1)).await?;

        let result = cache.get("expire_key").await?;
        assert_eq!(result, Some(b"expire_value".to_vec()));

        tokio::time::sleep(Duration::from_secs(2)).await;

        let result = cache.get("expire_key").await?;
        assert_eq!(result, None);
        assert!(!cache.exists("expire_key").await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_cache_evicts_least_recently_used() -> PipelineResult<()> {
        let cache = MemoryCache::with_capacity(2)?;

        cache.set("a", b"1", None).await?;
        cache.set("b", b"2", None).await?;
        cache.get("a").await?;
        cache.set("c", b"3", None).await?;

        assert!(cache.exists("a").await?);
        assert!(!cache.exists("b").await?);
        assert!(cache.exists("c").await?);
        Ok(())
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(MemoryCache::with_capacity(0).is_err());
    }
}
