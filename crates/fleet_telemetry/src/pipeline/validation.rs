//! Row Validation
//!
//! Structural and range checks that turn a raw CSV row into a
//! [`TelemetryRecord`]. A failed check yields a [`SkipReason`]; the row is
//! dropped and never retried.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{
    geo::Coordinates,
    pipeline::PipelineMetrics,
    types::{EngineStatus, SkipReason, TelemetryRecord},
};

/// Columns every input file must carry
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "vehicle_id",
    "timestamp",
    "lat",
    "lon",
    "speed_kmh",
    "engine_status",
    "fuel_level",
];

/// Upper bound of the fuel gauge
const MAX_FUEL_LEVEL: u8 = 100;

/// A CSV row before any checks
///
/// Every column is optional so a missing or empty cell becomes a skip reason
/// instead of a decode failure. Unknown columns are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawRow {
    /// Vehicle identifier
    pub vehicle_id: Option<String>,
    /// Reading timestamp
    pub timestamp: Option<String>,
    /// Latitude text
    pub lat: Option<String>,
    /// Longitude text
    pub lon: Option<String>,
    /// Speed text
    pub speed_kmh: Option<String>,
    /// Engine status text
    pub engine_status: Option<String>,
    /// Fuel level text
    pub fuel_level: Option<String>,
}

/// Per-row validator
#[derive(Debug)]
pub struct RecordValidator {
    metrics: Arc<parking_lot::Mutex<PipelineMetrics>>,
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordValidator {
    /// Create a validator with fresh metrics
    #[must_use]
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(parking_lot::Mutex::new(PipelineMetrics::new("validation"))),
        }
    }

    /// Check a raw row and build the typed record
    ///
    /// # Errors
    ///
    /// Returns the first [`SkipReason`] found, checked in column order
    pub fn validate(&self, row: &RawRow) -> Result<TelemetryRecord, SkipReason> {
        let start = Instant::now();
        let result = Self::check(row);
        self.metrics.lock().record(result.is_ok(), start.elapsed());
        result
    }

    /// Validation counters so far
    #[must_use]
    pub fn metrics(&self) -> PipelineMetrics {
        self.metrics.lock().clone()
    }

    fn check(row: &RawRow) -> Result<TelemetryRecord, SkipReason> {
        let vehicle_id = required(&row.vehicle_id, "vehicle_id")?;
        let timestamp = required(&row.timestamp, "timestamp")?;

        let lat = number(&row.lat, "lat")?;
        let lon = number(&row.lon, "lon")?;
        let position = Coordinates::new(lat, lon).validate()?;

        let speed_kmh = number(&row.speed_kmh, "speed_kmh")?;
        if !speed_kmh.is_finite() {
            return Err(SkipReason::InvalidNumber {
                field: "speed_kmh",
                value: speed_kmh.to_string(),
            });
        }
        if speed_kmh < 0.0 {
            return Err(SkipReason::NegativeSpeed(speed_kmh));
        }

        let engine_status = required(&row.engine_status, "engine_status")?.parse::<EngineStatus>()?;

        let fuel_text = required(&row.fuel_level, "fuel_level")?;
        let fuel_level = fuel_text
            .parse::<u8>()
            .ok()
            .filter(|level| *level <= MAX_FUEL_LEVEL)
            .ok_or_else(|| SkipReason::InvalidFuelLevel(fuel_text.to_string()))?;

        Ok(TelemetryRecord {
            vehicle_id: vehicle_id.to_string(),
            timestamp: timestamp.to_string(),
            lat: position.lat,
            lon: position.lon,
            speed_kmh,
            engine_status,
            fuel_level,
        })
    }
}

/// Present, non-blank cell
fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, SkipReason> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(SkipReason::MissingField(field))
}

fn number(value: &Option<String>, field: &'static str) -> Result<f64, SkipReason> {
    let text = required(value, field)?;
    text.parse::<f64>().map_err(|_| SkipReason::InvalidNumber {
        field,
        value: text.to_string(),
    })
}
