//! Ingestion Pipeline Module
//!
//! Streams telemetry rows out of raw files, validates and enriches them with
//! vehicle metadata and depot distance, and routes each enriched record to
//! its priority channel.

pub mod file_processor;
pub mod ingestion;
pub mod routing;
pub mod validation;

pub use file_processor::{FileProcessor, FileSummary};
pub use ingestion::StreamIngestor;
pub use routing::{Channel, MpscChannel, PriorityRouter, QueueMessage, RoutedMessage};
#[cfg(feature = "redis")]
pub use routing::RedisListChannel;
pub use validation::{RawRow, RecordValidator};

use serde::Serialize;
use std::time::Duration;

use crate::types::{EnrichedRecord, SkipReason};

/// Result of reading one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Row passed every check and is ready for routing
    Enriched(EnrichedRecord),
    /// Row was dropped
    Skipped {
        /// 1-based line in the source file
        line: u64,
        /// Why it was dropped
        reason: SkipReason,
    },
}

impl RowOutcome {
    /// Whether the row produced a record
    #[must_use]
    pub const fn is_enriched(&self) -> bool {
        matches!(self, Self::Enriched(_))
    }
}

/// Pipeline metrics
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    /// Stage name
    pub stage_name: String,

    /// Number of items processed
    pub items_processed: u64,

    /// Number of items failed
    pub items_failed: u64,

    /// Average processing time in microseconds
    pub avg_processing_time_us: u64,

    /// Total processing time in microseconds
    pub total_processing_time_us: u64,
}

impl PipelineMetrics {
    /// Create new pipeline metrics
    #[must_use]
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            items_processed: 0,
            items_failed: 0,
            avg_processing_time_us: 0,
            total_processing_time_us: 0,
        }
    }

    /// Account for one item
    pub fn record(&mut self, success: bool, duration: Duration) {
        self.items_processed += 1;

        if !success {
            self.items_failed += 1;
        }

        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_processing_time_us = self.total_processing_time_us.saturating_add(duration_us);
        self.avg_processing_time_us = self.total_processing_time_us / self.items_processed;
    }

    /// Share of items that failed, 0.0 when nothing ran
    #[must_use]
    pub fn failure_ratio(&self) -> f64 {
        crate::cache::safe_ratio(self.items_failed, self.items_processed)
    }
}
