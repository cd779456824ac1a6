//! Stream Ingestion
//!
//! Reads a telemetry CSV one row at a time and turns every row into a
//! [`RowOutcome`]. Rows are enriched with vehicle metadata from the
//! [`MetadataCache`] and the great-circle distance to the vehicle's depot.
//!
//! The returned stream is lazy and holds a single row in memory. Row-level
//! problems become [`RowOutcome::Skipped`]; only a fault of the file itself
//! (I/O error, bytes that are not UTF-8) ends the stream with an error.

use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::Read;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    cache::MetadataCache,
    error::{PipelineError, PipelineResult},
    geo::{distance_km, Coordinates},
    pipeline::{
        validation::{RawRow, RecordValidator, REQUIRED_COLUMNS},
        PipelineMetrics, RowOutcome,
    },
    types::{EnrichedRecord, SkipReason},
};

/// Reader state carried between rows
type RowCursor<R> = (csv::StringRecordsIntoIter<R>, csv::StringRecord);

/// Row-by-row CSV ingestor
#[derive(Debug)]
pub struct StreamIngestor {
    metadata: Arc<MetadataCache>,
    validator: RecordValidator,
    metrics: Arc<parking_lot::Mutex<PipelineMetrics>>,
}

impl StreamIngestor {
    /// Create an ingestor enriching from `metadata`
    #[must_use]
    pub fn new(metadata: Arc<MetadataCache>) -> Self {
        Self {
            metadata,
            validator: RecordValidator::new(),
            metrics: Arc::new(parking_lot::Mutex::new(PipelineMetrics::new("ingestion"))),
        }
    }

    /// Stream the rows of a CSV document
    ///
    /// The header row is read eagerly; everything after it is read on demand.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::FileFault` if the header cannot be read. Items
    /// of the stream are `Err` only for a file fault, which is always the
    /// last item.
    pub fn ingest<'a, R>(
        &'a self,
        reader: R,
    ) -> PipelineResult<BoxStream<'a, PipelineResult<RowOutcome>>>
    where
        R: Read + Send + 'a,
    {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|e| PipelineError::file_fault(format!("Cannot read header row: {e}")))?
            .clone();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|column| !headers.iter().any(|h| h == *column))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                ?missing,
                "Header lacks required columns, affected rows will be skipped"
            );
        }

        let cursor: Option<RowCursor<R>> = Some((csv_reader.into_records(), headers));

        let rows = stream::unfold(cursor, move |cursor| async move {
            let (mut records, headers) = cursor?;

            match records.next()? {
                Ok(record) => {
                    let line = record.position().map_or(0, csv::Position::line);
                    let outcome = match record.deserialize::<RawRow>(Some(&headers)) {
                        Ok(row) => self.enrich(line, &row).await,
                        Err(e) => self.skip(line, SkipReason::MalformedRow(e.to_string())),
                    };
                    Some((Ok(outcome), Some((records, headers))))
                }
                Err(e) if is_file_fault(&e) => {
                    tracing::error!("Aborting file: {e}");
                    Some((Err(PipelineError::file_fault(e.to_string())), None))
                }
                Err(e) => {
                    let line = e.position().map_or(0, csv::Position::line);
                    let outcome = self.skip(line, SkipReason::MalformedRow(e.to_string()));
                    Some((Ok(outcome), Some((records, headers))))
                }
            }
        });

        Ok(rows.boxed())
    }

    /// Validate and enrich one decoded row
    async fn enrich(&self, line: u64, row: &RawRow) -> RowOutcome {
        let start = Instant::now();

        let outcome = match self.enrich_row(row).await {
            Ok(record) => {
                tracing::trace!(line, vehicle_id = %record.telemetry.vehicle_id, "Row enriched");
                RowOutcome::Enriched(record)
            }
            Err(reason) => return self.skip(line, reason),
        };

        self.metrics.lock().record(true, start.elapsed());
        outcome
    }

    async fn enrich_row(&self, row: &RawRow) -> Result<EnrichedRecord, SkipReason> {
        let telemetry = self.validator.validate(row)?;
        let metadata = self.metadata.get(&telemetry.vehicle_id).await;

        if telemetry.speed_kmh > metadata.max_speed {
            return Err(SkipReason::SpeedExceedsLimit {
                speed: telemetry.speed_kmh,
                max_speed: metadata.max_speed,
            });
        }

        let distance_from_depot = distance_km(
            Coordinates::new(telemetry.lat, telemetry.lon),
            Coordinates::new(metadata.depot_lat, metadata.depot_lon),
        )?;

        Ok(EnrichedRecord {
            telemetry,
            distance_from_depot,
            service_region: metadata.service_region,
            processed_at: Utc::now(),
        })
    }

    fn skip(&self, line: u64, reason: SkipReason) -> RowOutcome {
        tracing::warn!(line, code = reason.code().as_u16(), "Skipping row: {reason}");
        self.metrics.lock().record(false, std::time::Duration::ZERO);
        RowOutcome::Skipped { line, reason }
    }

    /// Metadata cache used for enrichment
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Ingestion counters so far
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().clone()
    }

    /// Validation counters so far
    #[must_use]
    pub fn validation_metrics(&self) -> PipelineMetrics {
        self.validator.metrics()
    }
}

/// Errors after which the rest of the file cannot be trusted
fn is_file_fault(error: &csv::Error) -> bool {
    matches!(
        error.kind(),
        csv::ErrorKind::Io(_) | csv::ErrorKind::Utf8 { .. }
    )
}
