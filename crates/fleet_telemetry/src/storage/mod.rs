//! Persisted record storage
//!
//! The consumer writes through the [`RecordStore`] trait. [`RedbStore`] is the
//! embedded implementation; records carry an absolute `ttl` and are removed by
//! [`RedbStore::purge_expired`], not on read.

pub mod redb_store;

pub use redb_store::{RedbStore, StoreStats};

use async_trait::async_trait;

use crate::{
    error::PipelineResult,
    types::{PersistedRecord, RecordKey},
};

/// Keyed store for persisted telemetry
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or overwrite the record under its key
    async fn upsert(&self, record: &PersistedRecord) -> PipelineResult<()>;

    /// Fetch a record by key
    async fn get(&self, key: &RecordKey) -> PipelineResult<Option<PersistedRecord>>;

    /// Number of stored records
    async fn len(&self) -> PipelineResult<u64>;

    /// Whether the store holds no records
    async fn is_empty(&self) -> PipelineResult<bool> {
        Ok(self.len().await? == 0)
    }
}
