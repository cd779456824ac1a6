//! Record store on redb
//!
//! One table keyed by the JSON-encoded `(vehicle_id, timestamp)` pair, values
//! are JSON [`PersistedRecord`]s. `insert` replaces an existing value, which
//! makes redelivered messages idempotent.

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    config::StoreConfig,
    error::{PipelineError, PipelineResult},
    storage::RecordStore,
    types::{PersistedRecord, RecordKey},
};

const RECORDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("telemetry_records");

/// Default redb page cache when the configured size does not fit `usize`
const FALLBACK_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Embedded record store
#[derive(Debug)]
pub struct RedbStore {
    database: Arc<Database>,
    config: StoreConfig,
}

impl RedbStore {
    /// Open or create the store described by `config`
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be created or its table opened
    pub async fn new(config: &StoreConfig) -> PipelineResult<Self> {
        let cache_size = usize::try_from(config.cache_size_bytes).unwrap_or(FALLBACK_CACHE_BYTES);

        let database = if config.use_memory_storage {
            Database::builder()
                .set_cache_size(cache_size)
                .create_with_backend(redb::backends::InMemoryBackend::new())
                .map_err(|e| {
                    PipelineError::store(
                        "database_open",
                        format!("Failed to create in-memory database: {e}"),
                    )
                })?
        } else if let Some(ref path) = config.database_path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PipelineError::store(
                        "create_directory",
                        format!("Failed to create directory {}: {}", parent.display(), e),
                    )
                })?;
            }

            Database::builder()
                .set_cache_size(cache_size)
                .create(path)
                .map_err(|e| {
                    PipelineError::store(
                        "database_open",
                        format!("Failed to open database {}: {}", path.display(), e),
                    )
                })?
        } else {
            return Err(PipelineError::configuration(
                "Either use_memory_storage must be true or database_path must be provided",
            ));
        };

        let write_txn = database
            .begin_write()
            .map_err(|e| PipelineError::store("begin_write", e.to_string()))?;
        {
            let _records = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| PipelineError::store("open_records_table", e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| PipelineError::store("commit_init", e.to_string()))?;

        tracing::info!(
            in_memory = config.use_memory_storage,
            path = ?config.database_path,
            "Record store opened"
        );

        Ok(Self {
            database: Arc::new(database),
            config: config.clone(),
        })
    }

    /// Insert or overwrite a record
    ///
    /// # Errors
    ///
    /// Returns error if the write transaction fails
    pub fn put(&self, record: &PersistedRecord) -> PipelineResult<()> {
        let start = Instant::now();
        let key = record.key().storage_key();
        let value = serde_json::to_vec(record)?;

        let write_txn = self
            .database
            .begin_write()
            .map_err(|e| PipelineError::store("begin_write", e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| PipelineError::store("open_table", e.to_string()))?;

            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| PipelineError::store("insert", e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| PipelineError::store("commit", e.to_string()))?;

        tracing::trace!(%key, bytes = value.len(), elapsed = ?start.elapsed(), "Record stored");
        Ok(())
    }

    /// Read a record
    ///
    /// Expired records stay readable until the next purge.
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or the stored value does not decode
    pub fn fetch(&self, key: &RecordKey) -> PipelineResult<Option<PersistedRecord>> {
        let read_txn = self
            .database
            .begin_read()
            .map_err(|e| PipelineError::store("begin_read", e.to_string()))?;

        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|e| PipelineError::store("open_table", e.to_string()))?;

        let value = table
            .get(key.storage_key().as_str())
            .map_err(|e| PipelineError::store("get", e.to_string()))?;

        match value {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Number of stored records
    ///
    /// # Errors
    ///
    /// Returns error if the table cannot be read
    pub fn count(&self) -> PipelineResult<u64> {
        let read_txn = self
            .database
            .begin_read()
            .map_err(|e| PipelineError::store("begin_read", e.to_string()))?;

        let table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|e| PipelineError::store("open_table", e.to_string()))?;

        table
            .len()
            .map_err(|e| PipelineError::store("count", e.to_string()))
    }

    /// Remove every record whose `ttl` is at or before `now_epoch_secs`
    ///
    /// Values that no longer decode are left in place and logged.
    ///
    /// # Errors
    ///
    /// Returns error if a transaction fails
    pub fn purge_expired(&self, now_epoch_secs: i64) -> PipelineResult<u64> {
        let write_txn = self
            .database
            .begin_write()
            .map_err(|e| PipelineError::store("begin_write", e.to_string()))?;

        let purged = {
            let mut table = write_txn
                .open_table(RECORDS_TABLE)
                .map_err(|e| PipelineError::store("open_table", e.to_string()))?;

            let mut expired = Vec::new();
            for entry in table
                .iter()
                .map_err(|e| PipelineError::store("iter", e.to_string()))?
            {
                let (key, value) = entry.map_err(|e| PipelineError::store("iter", e.to_string()))?;
                match serde_json::from_slice::<PersistedRecord>(value.value()) {
                    Ok(record) if record.is_expired(now_epoch_secs) => {
                        expired.push(key.value().to_string());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(key = key.value(), "Undecodable record left in store: {e}");
                    }
                }
            }

            for key in &expired {
                table
                    .remove(key.as_str())
                    .map_err(|e| PipelineError::store("remove", e.to_string()))?;
            }
            u64::try_from(expired.len()).unwrap_or(u64::MAX)
        };

        write_txn
            .commit()
            .map_err(|e| PipelineError::store("commit", e.to_string()))?;

        if purged > 0 {
            tracing::info!(purged, "Expired records purged");
        }
        Ok(purged)
    }

    /// Perform health check on storage
    ///
    /// # Errors
    ///
    /// Returns error if the records table cannot be opened
    pub fn health_check(&self) -> PipelineResult<()> {
        let read_txn = self
            .database
            .begin_read()
            .map_err(|e| PipelineError::store("health_check_read", e.to_string()))?;

        let _table = read_txn
            .open_table(RECORDS_TABLE)
            .map_err(|e| PipelineError::store("health_check_table", e.to_string()))?;

        Ok(())
    }

    /// Get store statistics
    ///
    /// # Errors
    ///
    /// Returns error if the table cannot be read
    pub fn stats(&self) -> PipelineResult<StoreStats> {
        Ok(StoreStats {
            record_count: self.count()?,
            retention_days: self.config.retention_days,
            in_memory: self.config.use_memory_storage,
        })
    }
}

#[async_trait]
impl RecordStore for RedbStore {
    async fn upsert(&self, record: &PersistedRecord) -> PipelineResult<()> {
        self.put(record)
    }

    async fn get(&self, key: &RecordKey) -> PipelineResult<Option<PersistedRecord>> {
        self.fetch(key)
    }

    async fn len(&self) -> PipelineResult<u64> {
        self.count()
    }
}

/// Record store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of stored records
    pub record_count: u64,

    /// Configured retention
    pub retention_days: u32,

    /// Whether the store lives in memory
    pub in_memory: bool,
}
