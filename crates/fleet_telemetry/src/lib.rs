//! Fleet Telemetry - Streaming Ingestion and Priority Routing
//!
//! Reads vehicle telemetry from bulk CSV drops, enriches every row with
//! cached vehicle metadata and its distance from the vehicle's depot, routes
//! moving vehicles to a high-priority channel and everything else to a
//! low-priority one, and persists routed records with a fixed retention.

#![allow(clippy::significant_drop_tightening)] // Short parking_lot critical sections
#![allow(clippy::missing_fields_in_debug)] // Debug impls skip trait objects
#![allow(clippy::module_name_repetitions)]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌────────────────┐   ┌──────────────┐
//! │ CSV file │──▶│ StreamIngestor │──▶│ PriorityRouter │──▶│ high / low   │
//! └──────────┘   │  validate      │   └────────────────┘   │  Channel     │
//!                │  MetadataCache │                        └──────┬───────┘
//!                │  distance_km   │                               ▼
//!                └────────────────┘                        ┌──────────────┐
//!                                                          │ConsumerWriter│
//!                                                          │ RecordStore  │
//!                                                          └──────────────┘
//! ```
//!
//! Rows that fail validation, exceed the vehicle's speed limit or carry
//! unusable coordinates are skipped and counted; they never stop a file.
//! Metadata lookups never fail: a backing-store fault falls back to the
//! configured default metadata.
//!
//! # Quick Start
//!
//! ```rust
//! use fleet_telemetry::{PipelineSettings, TelemetryPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut settings = PipelineSettings::default();
//!     settings.store.use_memory_storage = true;
//!
//!     let pipeline = TelemetryPipeline::new(settings).await?;
//!     let (processor, mut high_rx, _low_rx) = pipeline.in_process_channels();
//!
//!     let csv = "vehicle_id,timestamp,lat,lon,speed_kmh,engine_status,fuel_level\n\
//!                VH_001,2024-03-01T10:15:00,12.97,77.59,40,moving,80\n";
//!     let summary = processor.process_reader("inline.csv", csv.as_bytes()).await?;
//!     assert_eq!(summary.high, 1);
//!
//!     let store = std::sync::Arc::new(pipeline.open_store().await?);
//!     let consumer = pipeline.consumer(store);
//!     drop(processor);
//!     let persisted = consumer.consume(&mut high_rx, 10).await;
//!     assert_eq!(persisted.processed, 1);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;

pub use config::*;
pub use error::*;
pub use types::*;

pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod geo;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use cache::{Cache, CacheStats, MemoryCache, MetadataCache, MetadataLookup, MetadataOrigin};
pub use consumer::{BatchSummary, ConsumerWriter, MessageBatch};
pub use geo::{distance_km, Coordinates, CoordinateError};
pub use pipeline::{
    Channel, FileProcessor, FileSummary, MpscChannel, PipelineMetrics, PriorityRouter,
    QueueMessage, RoutedMessage, RowOutcome, StreamIngestor,
};
pub use storage::{RecordStore, RedbStore};

/// Wiring of the pipeline components from one set of settings
///
/// Holds the shared metadata cache and ingestor; channels and stores are
/// supplied by the caller or built from the settings on request.
#[derive(Debug, Clone)]
pub struct TelemetryPipeline {
    settings: PipelineSettings,
    ingestor: Arc<StreamIngestor>,
}

impl TelemetryPipeline {
    /// Build the metadata cache and ingestor
    ///
    /// # Errors
    ///
    /// Returns error if the settings are invalid or the cache backend cannot
    /// be built. An unreachable Redis is not an error here; lookups fall
    /// back to the configured default metadata.
    pub async fn new(settings: PipelineSettings) -> PipelineResult<Self> {
        settings.validate()?;

        let backend = cache::backing_store(&settings.cache).await?;
        let metadata = Arc::new(MetadataCache::new(backend, &settings.cache));

        Ok(Self {
            ingestor: Arc::new(StreamIngestor::new(metadata)),
            settings,
        })
    }

    /// Settings in effect
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Shared metadata cache
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        self.ingestor.metadata()
    }

    /// File processor dispatching to the given channels
    #[must_use]
    pub fn file_processor(&self, high: Arc<dyn Channel>, low: Arc<dyn Channel>) -> FileProcessor {
        let router = Arc::new(PriorityRouter::new(high, low));
        let workers = usize::try_from(self.settings.pipeline.worker_threads).unwrap_or(1);
        FileProcessor::new(Arc::clone(&self.ingestor), router, workers)
    }

    /// File processor over in-process channels, with their receivers
    ///
    /// The receivers report closed once the processor and every clone of it
    /// are dropped.
    #[must_use]
    pub fn in_process_channels(
        &self,
    ) -> (
        FileProcessor,
        mpsc::Receiver<QueueMessage>,
        mpsc::Receiver<QueueMessage>,
    ) {
        let buffer = usize::try_from(self.settings.pipeline.channel_buffer).unwrap_or(1);
        let (high, high_rx) = MpscChannel::new(&self.settings.channels.high_priority_name, buffer);
        let (low, low_rx) = MpscChannel::new(&self.settings.channels.low_priority_name, buffer);

        (
            self.file_processor(Arc::new(high), Arc::new(low)),
            high_rx,
            low_rx,
        )
    }

    /// Redis list channels, if both list keys are configured
    ///
    /// # Errors
    ///
    /// Returns error if the Redis pool cannot be created
    #[cfg(feature = "redis")]
    pub fn redis_channels(&self) -> PipelineResult<Option<(Arc<dyn Channel>, Arc<dyn Channel>)>> {
        let channels = &self.settings.channels;
        let (Some(high_list), Some(low_list)) =
            (&channels.high_priority_list, &channels.low_priority_list)
        else {
            return Ok(None);
        };

        let pool = cache::redis_cache::create_redis_pool(&self.settings.cache)?;
        let high = pipeline::RedisListChannel::new(
            &channels.high_priority_name,
            high_list,
            pool.clone(),
        );
        let low = pipeline::RedisListChannel::new(&channels.low_priority_name, low_list, pool);

        Ok(Some((Arc::new(high), Arc::new(low))))
    }

    /// Open the configured record store
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened
    pub async fn open_store(&self) -> PipelineResult<RedbStore> {
        RedbStore::new(&self.settings.store).await
    }

    /// Consumer writing into `store` with the configured retention
    #[must_use]
    pub fn consumer(&self, store: Arc<dyn RecordStore>) -> ConsumerWriter {
        ConsumerWriter::new(store, self.settings.store.retention_days)
    }
}
