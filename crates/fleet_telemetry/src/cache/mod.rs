//! Cache implementations for vehicle metadata
//!
//! Provides the byte-level [`Cache`] backing stores (Redis and in-memory LRU)
//! and the read-through [`MetadataCache`] built on top of them.

/// Safe casting utilities for cache statistics
mod safe_cast {
    /// Safely convert u64 to f64 with precision warning for large values
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Intentional, large values are only warned about
    pub fn u64_to_f64_safe(value: u64) -> f64 {
        // f64 mantissa is 52 bits, so values > 2^52 lose precision
        const MAX_SAFE_U64_FOR_F64: u64 = (1_u64 << 52) - 1;

        if value > MAX_SAFE_U64_FOR_F64 {
            tracing::warn!("Precision loss detected in u64->f64 conversion: {}", value);
        }

        value as f64
    }

    /// Calculate ratio, zero when the denominator is zero
    #[must_use]
    pub fn safe_ratio(numerator: u64, denominator: u64) -> f64 {
        if denominator == 0 {
            0.0_f64
        } else {
            u64_to_f64_safe(numerator) / u64_to_f64_safe(denominator)
        }
    }
}

pub mod memory_cache;
pub mod metadata_cache;
#[cfg(feature = "redis")]
pub mod redis_cache;

pub use memory_cache::MemoryCache;
pub use metadata_cache::{MetadataCache, MetadataLookup, MetadataOrigin};
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
pub use safe_cast::{safe_ratio, u64_to_f64_safe};

use std::sync::Arc;

use crate::config::CacheConfig;
use crate::error::PipelineResult;

/// Cache trait for different backing stores
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Get value from cache
    async fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>>;

    /// Set value in cache, optionally expiring after `ttl_seconds`
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> PipelineResult<()>;

    /// Delete value from cache
    async fn delete(&self, key: &str) -> PipelineResult<bool>;

    /// Check if key exists in cache
    async fn exists(&self, key: &str) -> PipelineResult<bool>;

    /// Get cache statistics
    async fn stats(&self) -> PipelineResult<CacheStats>;
}

/// Build the backing store selected by `config`
///
/// # Errors
///
/// Returns error if the selected backend cannot be initialised
pub async fn backing_store(config: &CacheConfig) -> PipelineResult<Arc<dyn Cache>> {
    if config.enable_redis {
        #[cfg(feature = "redis")]
        {
            let cache = RedisCache::new(config.clone()).await?;
            return Ok(Arc::new(cache));
        }

        #[cfg(not(feature = "redis"))]
        {
            return Err(crate::error::PipelineError::configuration(
                "cache.enable_redis is set but the `redis` feature is disabled",
            ));
        }
    }

    Ok(Arc::new(MemoryCache::new(config)?))
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of cache sets
    pub sets: u64,

    /// Number of cache deletes
    pub deletes: u64,

    /// Number of entries in cache (0 when the backend cannot tell)
    pub entries: u64,

    /// Hit ratio (hits / (hits + misses))
    pub hit_ratio: f64,

    /// Average latency in microseconds
    pub avg_latency_us: u64,
}

/// Counters shared by the cache implementations
#[derive(Debug, Clone, Default)]
pub(crate) struct InternalCacheStats {
    pub(crate) hits: u64,
    pub(crate) misses: u64,
    pub(crate) sets: u64,
    pub(crate) deletes: u64,
    pub(crate) avg_latency_us: u64,
}

/// Cache operation being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOp {
    Get,
    Set,
    Delete,
}

impl InternalCacheStats {
    /// Record one operation
    pub(crate) fn record(&mut self, op: CacheOp, hit: bool, duration: std::time::Duration) {
        match op {
            CacheOp::Get => {
                if hit {
                    self.hits += 1;
                } else {
                    self.misses += 1;
                }
            }
            CacheOp::Set => self.sets += 1,
            CacheOp::Delete => self.deletes += 1,
        }

        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.avg_latency_us = self.avg_latency_us / 2 + duration_us / 2;
    }

    /// Snapshot as public stats
    pub(crate) fn snapshot(&self, entries: u64) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            sets: self.sets,
            deletes: self.deletes,
            entries,
            hit_ratio: safe_ratio(self.hits, self.hits + self.misses),
            avg_latency_us: self.avg_latency_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_safe_ratio() {
        assert!((safe_ratio(0, 0) - 0.0).abs() < f64::EPSILON);
        assert!((safe_ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stats_recording() {
        let mut stats = InternalCacheStats::default();
        stats.record(CacheOp::Get, true, Duration::from_micros(10));
        stats.record(CacheOp::Get, false, Duration::from_micros(10));
        stats.record(CacheOp::Set, true, Duration::from_micros(10));

        let snapshot = stats.snapshot(1);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.entries, 1);
        assert!((snapshot.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_backing_store_defaults_to_memory() -> PipelineResult<()> {
        let config = CacheConfig::default();
        let cache = backing_store(&config).await?;
        cache.set("k", b"v", None).await?;
        assert_eq!(cache.get("k").await?, Some(b"v".to_vec()));
        Ok(())
    }
}
