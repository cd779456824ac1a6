//! Priority Routing
//!
//! Moving vehicles go to the high-priority channel, everything else to the
//! low-priority one. Channels are reached through the [`Channel`] trait so the
//! queueing substrate can be swapped: in-process tokio channels for a single
//! binary, Redis lists when producers and consumers run separately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::{PipelineError, PipelineResult},
    pipeline::PipelineMetrics,
    types::{EnrichedRecord, Priority},
};

/// Message as carried by a channel
///
/// Field names follow the consumer batch envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Id assigned on send
    #[serde(rename = "messageId")]
    pub message_id: String,

    /// JSON-encoded [`EnrichedRecord`]
    pub body: String,
}

impl QueueMessage {
    /// Wrap a body under a fresh message id
    #[must_use]
    pub fn new(body: String) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body,
        }
    }
}

/// Outbound queue
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name, used in logs and errors
    fn name(&self) -> &str;

    /// Enqueue a message body and return the assigned message id
    async fn send(&self, body: String) -> PipelineResult<String>;
}

/// Channel backed by a bounded tokio mpsc queue
#[derive(Debug, Clone)]
pub struct MpscChannel {
    name: String,
    sender: mpsc::Sender<QueueMessage>,
}

impl MpscChannel {
    /// Create a channel and the receiver its consumer drains
    #[must_use]
    pub fn new(name: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<QueueMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }
}

#[async_trait]
impl Channel for MpscChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> PipelineResult<String> {
        let message = QueueMessage::new(body);
        let message_id = message.message_id.clone();

        self.sender
            .send(message)
            .await
            .map_err(|_| PipelineError::dispatch(&self.name, "receiver dropped"))?;

        Ok(message_id)
    }
}

/// Channel pushing onto a Redis list
///
/// Messages are stored as JSON [`QueueMessage`] values via `LPUSH`, so a
/// consumer popping from the other end sees them in send order.
#[cfg(feature = "redis")]
pub struct RedisListChannel {
    name: String,
    list_key: String,
    pool: deadpool_redis::Pool,
}

#[cfg(feature = "redis")]
impl std::fmt::Debug for RedisListChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisListChannel")
            .field("name", &self.name)
            .field("list_key", &self.list_key)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "redis")]
impl RedisListChannel {
    /// Create a channel writing to `list_key`
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        list_key: impl Into<String>,
        pool: deadpool_redis::Pool,
    ) -> Self {
        Self {
            name: name.into(),
            list_key: list_key.into(),
            pool,
        }
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl Channel for RedisListChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String) -> PipelineResult<String> {
        use redis::AsyncCommands;

        let message = QueueMessage::new(body);
        let payload = serde_json::to_string(&message)?;

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PipelineError::dispatch(&self.name, e.to_string()))?;

        conn.lpush::<_, _, ()>(&self.list_key, payload)
            .await
            .map_err(|e| PipelineError::dispatch(&self.name, e.to_string()))?;

        Ok(message.message_id)
    }
}

/// Where a record was sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutedMessage {
    /// Priority class
    pub priority: Priority,
    /// Channel name
    pub channel: String,
    /// Id assigned by the channel
    pub message_id: String,
}

/// Classifies enriched records and dispatches them
pub struct PriorityRouter {
    high: Arc<dyn Channel>,
    low: Arc<dyn Channel>,
    metrics: Arc<parking_lot::Mutex<PipelineMetrics>>,
}

impl std::fmt::Debug for PriorityRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityRouter")
            .field("high", &self.high.name())
            .field("low", &self.low.name())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl PriorityRouter {
    /// Create a router over the two priority channels
    #[must_use]
    pub fn new(high: Arc<dyn Channel>, low: Arc<dyn Channel>) -> Self {
        Self {
            high,
            low,
            metrics: Arc::new(parking_lot::Mutex::new(PipelineMetrics::new("routing"))),
        }
    }

    /// Channel serving `priority`
    #[must_use]
    pub fn channel(&self, priority: Priority) -> &Arc<dyn Channel> {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    /// Send a record to the channel matching its engine status
    ///
    /// # Errors
    ///
    /// Returns a dispatch error if the record cannot be encoded or the channel
    /// rejects it. The record is not retried.
    pub async fn route(&self, record: EnrichedRecord) -> PipelineResult<RoutedMessage> {
        let start = Instant::now();
        let priority = record.priority();
        let channel = self.channel(priority);

        let result = match serde_json::to_string(&record) {
            Ok(body) => channel.send(body).await,
            Err(e) => Err(PipelineError::dispatch(channel.name(), e.to_string())),
        };

        self.metrics.lock().record(result.is_ok(), start.elapsed());

        let message_id = result?;
        tracing::debug!(
            vehicle_id = %record.telemetry.vehicle_id,
            channel = channel.name(),
            %message_id,
            "Message dispatched"
        );

        Ok(RoutedMessage {
            priority,
            channel: channel.name().to_string(),
            message_id,
        })
    }

    /// Routing counters so far
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngineStatus, TelemetryRecord};
    use chrono::Utc;

    /// Channel that refuses everything
    struct ClosedChannel;

    #[async_trait]
    impl Channel for ClosedChannel {
        fn name(&self) -> &str {
            "closed"
        }

        async fn send(&self, _body: String) -> PipelineResult<String> {
            Err(PipelineError::dispatch("closed", "queue unavailable"))
        }
    }

    fn record(engine_status: EngineStatus) -> EnrichedRecord {
        EnrichedRecord {
            telemetry: TelemetryRecord {
                vehicle_id: "VH_001".to_string(),
                timestamp: "2024-03-01T10:15:00".to_string(),
                lat: 12.97,
                lon: 77.59,
                speed_kmh: 40.0,
                engine_status,
                fuel_level: 80,
            },
            distance_from_depot: 0.53,
            service_region: "default".to_string(),
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_moving_goes_high_idle_goes_low() -> PipelineResult<()> {
        let (high, mut high_rx) = MpscChannel::new("high", 8);
        let (low, mut low_rx) = MpscChannel::new("low", 8);
        let router = PriorityRouter::new(Arc::new(high), Arc::new(low));

        let routed = router.route(record(EngineStatus::Moving)).await?;
        assert_eq!(routed.priority, Priority::High);
        assert_eq!(routed.channel, "high");

        let routed_low = router.route(record(EngineStatus::Idle)).await?;
        assert_eq!(routed_low.channel, "low");

        let message = high_rx
            .recv()
            .await
            .ok_or_else(|| PipelineError::internal("high channel empty"))?;
        assert_eq!(message.message_id, routed.message_id);
        let body: EnrichedRecord = serde_json::from_str(&message.body)?;
        assert_eq!(body.telemetry.engine_status, EngineStatus::Moving);

        assert!(low_rx.recv().await.is_some());
        assert!(high_rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_reported() -> PipelineResult<()> {
        let (low, _low_rx) = MpscChannel::new("low", 8);
        let router = PriorityRouter::new(Arc::new(ClosedChannel), Arc::new(low));

        let err = router.route(record(EngineStatus::Moving)).await;
        assert!(matches!(err, Err(PipelineError::Dispatch { .. })));

        router.route(record(EngineStatus::Idle)).await?;

        let metrics = router.metrics();
        assert_eq!(metrics.items_processed, 2);
        assert_eq!(metrics.items_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_a_dispatch_error() {
        let (high, high_rx) = MpscChannel::new("high", 1);
        drop(high_rx);

        let err = high.send("{}".to_string()).await;
        assert!(matches!(
            err,
            Err(PipelineError::Dispatch { channel, .. }) if channel == "high"
        ));
    }

    #[test]
    fn test_queue_message_wire_names() -> PipelineResult<()> {
        let message = QueueMessage::new("{}".to_string());
        let value = serde_json::to_value(&message)?;
        assert!(value.get("messageId").is_some());
        assert_eq!(value["body"], "{}");
        Ok(())
    }
}
