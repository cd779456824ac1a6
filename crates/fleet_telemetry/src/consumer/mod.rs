//! Consumer side of the priority channels
//!
//! Decodes routed messages, converts their floating point fields to
//! [`ExactNumber`] text, attaches an absolute expiry and upserts them into a
//! [`RecordStore`]. A bad message is counted and logged; only an envelope that
//! cannot be read at all fails the batch.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::{
    error::{ErrorCode, PipelineError, PipelineResult},
    pipeline::{PipelineMetrics, QueueMessage},
    storage::RecordStore,
    types::{EnrichedRecord, ExactNumber, PersistedRecord},
};

const SECONDS_PER_DAY: i64 = 86_400;

/// Batch envelope as delivered by the queue
///
/// Records are kept as raw JSON so one malformed entry fails alone.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBatch {
    /// Delivered messages
    #[serde(rename = "Records")]
    pub records: Vec<serde_json::Value>,
}

/// Outcome counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Messages persisted
    pub processed: u64,
    /// Messages that could not be persisted
    pub failed: u64,
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.failed += other.failed;
    }
}

/// Persists routed records
pub struct ConsumerWriter {
    store: Arc<dyn RecordStore>,
    retention: ChronoDuration,
    metrics: Arc<parking_lot::Mutex<PipelineMetrics>>,
}

impl std::fmt::Debug for ConsumerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWriter")
            .field("retention", &self.retention)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ConsumerWriter {
    /// Create a writer keeping records for `retention_days`
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, retention_days: u32) -> Self {
        Self {
            store,
            retention: ChronoDuration::seconds(i64::from(retention_days) * SECONDS_PER_DAY),
            metrics: Arc::new(parking_lot::Mutex::new(PipelineMetrics::new("consumer"))),
        }
    }

    /// Convert a record for storage as of `now`
    ///
    /// # Errors
    ///
    /// Returns a validation error if a numeric field is not finite
    pub fn to_persisted(
        &self,
        record: &EnrichedRecord,
        now: DateTime<Utc>,
    ) -> PipelineResult<PersistedRecord> {
        let telemetry = &record.telemetry;

        Ok(PersistedRecord {
            vehicle_id: telemetry.vehicle_id.clone(),
            timestamp: telemetry.timestamp.clone(),
            lat: ExactNumber::from_f64("lat", telemetry.lat)?,
            lon: ExactNumber::from_f64("lon", telemetry.lon)?,
            speed_kmh: ExactNumber::from_f64("speed_kmh", telemetry.speed_kmh)?,
            engine_status: telemetry.engine_status,
            fuel_level: telemetry.fuel_level,
            distance_from_depot: ExactNumber::from_f64(
                "distance_from_depot",
                record.distance_from_depot,
            )?,
            service_region: record.service_region.clone(),
            processed_at: record.processed_at,
            ttl: (now + self.retention).timestamp(),
        })
    }

    /// Persist a record, expiring `retention_days` from now
    ///
    /// # Errors
    ///
    /// Returns error if conversion fails or the store rejects the write
    pub async fn write(&self, record: &EnrichedRecord) -> PipelineResult<PersistedRecord> {
        self.write_at(record, Utc::now()).await
    }

    /// Persist a record as of `now`
    ///
    /// # Errors
    ///
    /// Returns error if conversion fails or the store rejects the write
    pub async fn write_at(
        &self,
        record: &EnrichedRecord,
        now: DateTime<Utc>,
    ) -> PipelineResult<PersistedRecord> {
        let persisted = self.to_persisted(record, now)?;
        self.store.upsert(&persisted).await?;
        Ok(persisted)
    }

    /// Decode and persist one message
    ///
    /// # Errors
    ///
    /// Returns error if the body is not an enriched record or the write fails
    pub async fn handle_message(&self, message: &QueueMessage) -> PipelineResult<PersistedRecord> {
        let start = Instant::now();

        let result = match serde_json::from_str::<EnrichedRecord>(&message.body) {
            Ok(record) => self.write(&record).await,
            Err(e) => Err(PipelineError::from(e)),
        };

        self.metrics.lock().record(result.is_ok(), start.elapsed());
        result
    }

    /// Persist a slice of messages, counting failures instead of stopping
    pub async fn handle_messages(&self, messages: &[QueueMessage]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for message in messages {
            match self.handle_message(message).await {
                Ok(record) => {
                    summary.processed += 1;
                    tracing::info!(
                        vehicle_id = %record.vehicle_id,
                        message_id = %message.message_id,
                        "Successfully processed record"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        message_id = %message.message_id,
                        code = e.code().as_u16(),
                        "Error processing record: {e}"
                    );
                }
            }
        }

        summary
    }

    /// Persist every message of a JSON batch envelope
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::MalformedBatch` if the envelope is not JSON or
    /// lacks a `Records` array. Individual messages never fail the batch.
    pub async fn handle_batch(&self, envelope: &str) -> PipelineResult<BatchSummary> {
        let batch: MessageBatch = serde_json::from_str(envelope).map_err(|e| {
            tracing::error!(
                code = ErrorCode::ConsumerEnvelope.as_u16(),
                "Malformed batch envelope: {e}"
            );
            PipelineError::malformed_batch(e.to_string())
        })?;

        tracing::info!("Processing {} records", batch.records.len());

        let mut summary = BatchSummary::default();
        let mut messages = Vec::with_capacity(batch.records.len());
        for entry in batch.records {
            match serde_json::from_value::<QueueMessage>(entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    summary.failed += 1;
                    self.metrics.lock().record(false, std::time::Duration::ZERO);
                    tracing::warn!(
                        code = ErrorCode::ConsumerMessage.as_u16(),
                        "Error processing record: {e}"
                    );
                }
            }
        }

        summary += self.handle_messages(&messages).await;
        tracing::info!(
            processed = summary.processed,
            failed = summary.failed,
            "Batch complete"
        );
        Ok(summary)
    }

    /// Drain a channel in batches of up to `batch_size` until every sender is gone
    pub async fn consume(
        &self,
        receiver: &mut mpsc::Receiver<QueueMessage>,
        batch_size: usize,
    ) -> BatchSummary {
        let batch_size = batch_size.max(1);
        let mut total = BatchSummary::default();
        let mut batch = Vec::with_capacity(batch_size);

        while let Some(first) = receiver.recv().await {
            batch.push(first);
            while batch.len() < batch_size {
                match receiver.try_recv() {
                    Ok(message) => batch.push(message),
                    Err(_) => break,
                }
            }

            total += self.handle_messages(&batch).await;
            batch.clear();
        }

        total
    }

    /// Consumer counters so far
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::RedbStore;
    use crate::types::{EngineStatus, RecordKey, TelemetryRecord};
    use async_trait::async_trait;

    /// Store that is always down
    struct UnavailableStore;

    #[async_trait]
    impl RecordStore for UnavailableStore {
        async fn upsert(&self, _record: &PersistedRecord) -> PipelineResult<()> {
            Err(PipelineError::store("put_item", "store unavailable"))
        }
        async fn get(&self, _key: &RecordKey) -> PipelineResult<Option<PersistedRecord>> {
            Err(PipelineError::store("get_item", "store unavailable"))
        }
        async fn len(&self) -> PipelineResult<u64> {
            Ok(0)
        }
    }

    async fn writer() -> PipelineResult<(ConsumerWriter, Arc<RedbStore>)> {
        let store = Arc::new(
            RedbStore::new(&StoreConfig {
                use_memory_storage: true,
                database_path: None,
                ..StoreConfig::default()
            })
            .await?,
        );
        Ok((ConsumerWriter::new(store.clone(), 30), store))
    }

    fn enriched(vehicle_id: &str, timestamp: &str) -> EnrichedRecord {
        EnrichedRecord {
            telemetry: TelemetryRecord {
                vehicle_id: vehicle_id.to_string(),
                timestamp: timestamp.to_string(),
                lat: 12.97,
                lon: 77.59,
                speed_kmh: 40.1,
                engine_status: EngineStatus::Moving,
                fuel_level: 80,
            },
            distance_from_depot: 0.53,
            service_region: "default".to_string(),
            processed_at: Utc::now(),
        }
    }

    fn envelope(bodies: &[String]) -> String {
        let records: Vec<serde_json::Value> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| serde_json::json!({"messageId": format!("m-{i}"), "body": body}))
            .collect();
        serde_json::json!({ "Records": records }).to_string()
    }

    #[tokio::test]
    async fn test_write_converts_numbers_and_sets_ttl() -> PipelineResult<()> {
        let (writer, store) = writer().await?;
        let now = DateTime::parse_from_rfc3339("2024-03-01T00:00:00Z")
            .map_err(|e| PipelineError::internal(e.to_string()))?
            .with_timezone(&Utc);

        let persisted = writer
            .write_at(&enriched("VH_001", "2024-03-01T10:15:00"), now)
            .await?;

        assert_eq!(persisted.speed_kmh.as_str(), "40.1");
        assert_eq!(persisted.lat.as_str(), "12.97");
        assert_eq!(persisted.distance_from_depot.as_str(), "0.53");
        assert_eq!(persisted.ttl, now.timestamp() + 30 * SECONDS_PER_DAY);

        let stored = store
            .get(&RecordKey::new("VH_001", "2024-03-01T10:15:00"))
            .await?;
        assert_eq!(stored, Some(persisted));
        Ok(())
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() -> PipelineResult<()> {
        let (writer, store) = writer().await?;
        let record = enriched("VH_001", "2024-03-01T10:15:00");

        writer.write(&record).await?;
        writer.write(&record).await?;

        assert_eq!(store.len().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_with_missing_field() -> PipelineResult<()> {
        let (writer, store) = writer().await?;

        let good_a = serde_json::to_string(&enriched("VH_001", "2024-03-01T10:15:00"))?;
        let good_b = serde_json::to_string(&enriched("VH_002", "2024-03-01T10:15:00"))?;
        let mut missing = serde_json::to_value(enriched("VH_003", "2024-03-01T10:15:00"))?;
        if let Some(fields) = missing.as_object_mut() {
            fields.remove("speed_kmh");
        }

        let summary = writer
            .handle_batch(&envelope(&[good_a, missing.to_string(), good_b]))
            .await?;

        assert_eq!(
            summary,
            BatchSummary {
                processed: 2,
                failed: 1
            }
        );
        assert_eq!(store.len().await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_entries_and_envelopes() -> PipelineResult<()> {
        let (writer, _store) = writer().await?;

        let summary = writer
            .handle_batch(r#"{"Records": [{"messageId": "m-0"}, {"messageId": "m-1", "body": "not json"}]}"#)
            .await?;
        assert_eq!(
            summary,
            BatchSummary {
                processed: 0,
                failed: 2
            }
        );

        assert!(matches!(
            writer.handle_batch("{\"Messages\": []}").await,
            Err(PipelineError::MalformedBatch { .. })
        ));
        assert!(matches!(
            writer.handle_batch("[").await,
            Err(PipelineError::MalformedBatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_store_outage_counts_as_failed() -> PipelineResult<()> {
        let writer = ConsumerWriter::new(Arc::new(UnavailableStore), 30);
        let body = serde_json::to_string(&enriched("VH_001", "2024-03-01T10:15:00"))?;

        let summary = writer.handle_batch(&envelope(&[body])).await?;
        assert_eq!(
            summary,
            BatchSummary {
                processed: 0,
                failed: 1
            }
        );
        assert_eq!(writer.metrics().items_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_consume_drains_until_senders_drop() -> PipelineResult<()> {
        let (writer, store) = writer().await?;
        let (sender, mut receiver) = mpsc::channel(16);

        for i in 0..5 {
            let body = serde_json::to_string(&enriched("VH_001", &format!("2024-03-01T10:1{i}:00")))?;
            sender
                .send(QueueMessage::new(body))
                .await
                .map_err(|e| PipelineError::internal(e.to_string()))?;
        }
        drop(sender);

        let summary = writer.consume(&mut receiver, 2).await;
        assert_eq!(summary.processed, 5);
        assert_eq!(store.len().await?, 5);
        Ok(())
    }
}
