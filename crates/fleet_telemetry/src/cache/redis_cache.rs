//! Redis Cache Implementation
//!
//! Shared metadata backing store. Every ingestion worker talks to the same
//! Redis, which is what lets a default synthesized by one worker be reused
//! by the others.

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool as RedisPool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{
    config::CacheConfig,
    error::{ErrorCode, PipelineError, PipelineResult},
};

use super::{Cache, CacheOp, CacheStats, InternalCacheStats};

/// Redis cache implementation with connection pooling
pub struct RedisCache {
    pool: RedisPool,
    config: CacheConfig,
    stats: Arc<parking_lot::Mutex<InternalCacheStats>>,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("redis_url", &self.config.redis_url)
            .field("stats", &self.stats)
            .finish()
    }
}

impl RedisCache {
    /// Create a new Redis cache instance
    ///
    /// Connections are opened lazily. An unreachable Redis at startup is
    /// logged and every later lookup faults over to the fallback metadata.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if no Redis URL is configured
    /// or the pool cannot be built
    pub async fn new(config: CacheConfig) -> PipelineResult<Self> {
        let pool = create_redis_pool(&config)?;

        if let Err(e) = verify_redis_connection(&pool).await {
            tracing::warn!(
                code = ErrorCode::CacheConnection.as_u16(),
                redis_url = ?config.redis_url,
                "Redis unavailable at startup, metadata lookups fall back to defaults: {e}"
            );
        }

        Ok(Self {
            pool,
            config,
            stats: Arc::new(parking_lot::Mutex::new(InternalCacheStats::default())),
        })
    }

    async fn connection(&self) -> PipelineResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| PipelineError::connection(format!("Failed to get Redis connection: {e}")))
    }

    fn record_stats(&self, op: CacheOp, hit: bool, duration: Duration) {
        self.stats.lock().record(op, hit, duration);
    }
}

/// Create a Redis connection pool from the cache configuration
///
/// Waiting for a pooled connection and opening a new one are both bounded
/// by `redis_timeout_ms`.
///
/// # Errors
///
/// Returns error if the URL is missing or the pool cannot be built
pub fn create_redis_pool(config: &CacheConfig) -> PipelineResult<RedisPool> {
    let redis_url = config
        .redis_url
        .as_ref()
        .ok_or_else(|| PipelineError::configuration("Redis URL not configured"))?;

    let timeout = Duration::from_millis(config.redis_timeout_ms);
    let mut pool_config = PoolConfig::default();
    pool_config.timeouts = Timeouts {
        wait: Some(timeout),
        create: Some(timeout),
        recycle: Some(timeout),
    };

    let mut redis_config = RedisConfig::from_url(redis_url);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| PipelineError::configuration(format!("Failed to create Redis pool: {e}")))?;

    tracing::info!(timeout_ms = config.redis_timeout_ms, "Redis connection pool created");
    Ok(pool)
}

/// Verify Redis connection is working
async fn verify_redis_connection(pool: &RedisPool) -> PipelineResult<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| PipelineError::connection(format!("Failed to get Redis connection: {e}")))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| PipelineError::connection(format!("Redis ping failed: {e}")))?;

    tracing::info!("Redis connection verified successfully");
    Ok(())
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> PipelineResult<Option<Vec<u8>>> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let result: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| PipelineError::cache("redis_get", e.to_string()))?;

        self.record_stats(CacheOp::Get, result.is_some(), start.elapsed());

        tracing::trace!(
            "Redis GET {}: {}",
            key,
            if result.is_some() { "HIT" } else { "MISS" }
        );
        Ok(result)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> PipelineResult<()> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        if let Some(ttl) = ttl_seconds {
            conn.set_ex::<_, _, ()>(key, value, ttl)
                .await
                .map_err(|e| PipelineError::cache("redis_set_ex", e.to_string()))?;
        } else {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(|e| PipelineError::cache("redis_set", e.to_string()))?;
        }

        self.record_stats(CacheOp::Set, true, start.elapsed());

        tracing::trace!(
            "Redis SET {}: {} bytes, TTL: {:?}",
            key,
            value.len(),
            ttl_seconds
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> PipelineResult<bool> {
        let start = Instant::now();
        let mut conn = self.connection().await?;

        let deleted: u64 = conn
            .del(key)
            .await
            .map_err(|e| PipelineError::cache("redis_del", e.to_string()))?;

        let was_deleted = deleted > 0;
        self.record_stats(CacheOp::Delete, was_deleted, start.elapsed());

        tracing::trace!(
            "Redis DEL {}: {}",
            key,
            if was_deleted { "DELETED" } else { "NOT_FOUND" }
        );
        Ok(was_deleted)
    }

    async fn exists(&self, key: &str) -> PipelineResult<bool> {
        let mut conn = self.connection().await?;

        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| PipelineError::cache("redis_exists", e.to_string()))?;

        tracing::trace!("Redis EXISTS {}: {}", key, exists);
        Ok(exists)
    }

    async fn stats(&self) -> PipelineResult<CacheStats> {
        // Redis doesn't expose a per-client entry count cheaply
        Ok(self.stats.lock().snapshot(0))
    }
}
