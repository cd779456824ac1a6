//! Fleet Telemetry Types
//!
//! Records as they move through the pipeline: raw telemetry, cached vehicle
//! metadata, enriched records on the channels and persisted records in the
//! store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::{ErrorCode, PipelineError, PipelineResult};
use crate::geo::CoordinateError;

/// Engine state reported by the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Vehicle is driving
    Moving,
    /// Engine running, vehicle stationary
    Idle,
}

impl EngineStatus {
    /// Wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Moving => "moving",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineStatus {
    type Err = SkipReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moving" => Ok(Self::Moving),
            "idle" => Ok(Self::Idle),
            other => Err(SkipReason::UnknownEngineStatus(other.to_string())),
        }
    }
}

/// Priority channel a record is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Moving vehicles
    High,
    /// Everything else
    Low,
}

impl Priority {
    /// Channel label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated telemetry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Vehicle identifier
    pub vehicle_id: String,

    /// Reading timestamp (ISO-8601, kept as received)
    pub timestamp: String,

    /// Latitude in decimal degrees
    pub lat: f64,

    /// Longitude in decimal degrees
    pub lon: f64,

    /// Speed in km/h
    pub speed_kmh: f64,

    /// Engine state
    pub engine_status: EngineStatus,

    /// Fuel level percentage (0-100)
    pub fuel_level: u8,
}

/// Operating metadata for a vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleMetadata {
    /// Maximum allowed speed in km/h
    pub max_speed: f64,

    /// Depot latitude
    pub depot_lat: f64,

    /// Depot longitude
    pub depot_lon: f64,

    /// Service region label
    pub service_region: String,
}

impl Default for VehicleMetadata {
    fn default() -> Self {
        Self {
            max_speed: 120.0,
            depot_lat: 12.9716,
            depot_lon: 77.5946,
            service_region: "default".to_string(),
        }
    }
}

/// Telemetry record enriched with depot distance and region
///
/// This is the JSON body carried on the priority channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Source telemetry fields
    #[serde(flatten)]
    pub telemetry: TelemetryRecord,

    /// Great-circle distance to the depot in km, 2 decimals
    pub distance_from_depot: f64,

    /// Service region from the vehicle metadata
    pub service_region: String,

    /// When the pipeline produced this record
    pub processed_at: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Channel this record belongs on
    #[must_use]
    pub const fn priority(&self) -> Priority {
        match self.telemetry.engine_status {
            EngineStatus::Moving => Priority::High,
            EngineStatus::Idle => Priority::Low,
        }
    }

    /// Store key of the record
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.telemetry.vehicle_id, &self.telemetry.timestamp)
    }
}

/// Decimal number carried in its shortest round-trip textual form
///
/// Converting through the text keeps `0.1` as `0.1` instead of the binary
/// expansion of the nearest double.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExactNumber(String);

impl ExactNumber {
    /// Convert a float through its textual form
    ///
    /// # Errors
    ///
    /// Returns a validation error for NaN and infinities
    pub fn from_f64(field: &str, value: f64) -> PipelineResult<Self> {
        if !value.is_finite() {
            return Err(PipelineError::validation(
                field,
                format!("{value} has no exact decimal form"),
            ));
        }
        Ok(Self(value.to_string()))
    }

    /// Decimal text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse back into a float
    ///
    /// # Errors
    ///
    /// Returns a validation error if the stored text is not a number
    pub fn to_f64(&self) -> PipelineResult<f64> {
        self.0
            .parse::<f64>()
            .map_err(|e| PipelineError::validation("exact_number", e.to_string()))
    }
}

impl fmt::Display for ExactNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Primary key of a persisted record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Vehicle identifier
    pub vehicle_id: String,
    /// Reading timestamp
    pub timestamp: String,
}

impl RecordKey {
    /// Create a new key
    #[must_use]
    pub fn new(vehicle_id: &str, timestamp: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    /// Unambiguous single-string encoding used as the store key
    #[must_use]
    pub fn storage_key(&self) -> String {
        serde_json::json!([self.vehicle_id, self.timestamp]).to_string()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.vehicle_id, self.timestamp)
    }
}

/// Record as written to the persistent store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// Vehicle identifier (partition key)
    pub vehicle_id: String,

    /// Reading timestamp (sort key)
    pub timestamp: String,

    /// Latitude
    pub lat: ExactNumber,

    /// Longitude
    pub lon: ExactNumber,

    /// Speed in km/h
    pub speed_kmh: ExactNumber,

    /// Engine state
    pub engine_status: EngineStatus,

    /// Fuel level percentage
    pub fuel_level: u8,

    /// Distance to depot in km
    pub distance_from_depot: ExactNumber,

    /// Service region
    pub service_region: String,

    /// When the ingestion side produced the record
    pub processed_at: DateTime<Utc>,

    /// Absolute expiry, epoch seconds
    pub ttl: i64,
}

impl PersistedRecord {
    /// Store key of the record
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.vehicle_id, &self.timestamp)
    }

    /// Whether the record is past its expiry at `now_epoch_secs`
    #[must_use]
    pub const fn is_expired(&self, now_epoch_secs: i64) -> bool {
        now_epoch_secs >= self.ttl
    }
}

/// Why a row was dropped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// A required column is missing or empty
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A numeric column did not parse
    #[error("field '{field}' is not a valid number: '{value}'")]
    InvalidNumber {
        /// Column name
        field: &'static str,
        /// Raw value
        value: String,
    },

    /// Speed below zero
    #[error("speed {0} km/h is negative")]
    NegativeSpeed(f64),

    /// Engine status other than `moving` / `idle`
    #[error("unrecognized engine status '{0}'")]
    UnknownEngineStatus(String),

    /// Fuel level outside 0..=100
    #[error("fuel level '{0}' is not a percentage")]
    InvalidFuelLevel(String),

    /// Vehicle is over its allowed speed
    #[error("speed {speed} km/h exceeds max {max_speed} km/h")]
    SpeedExceedsLimit {
        /// Reported speed
        speed: f64,
        /// Allowed maximum
        max_speed: f64,
    },

    /// Row or depot coordinates are unusable
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(#[from] CoordinateError),

    /// The CSV row itself could not be decoded
    #[error("malformed row: {0}")]
    MalformedRow(String),
}

impl SkipReason {
    /// Monitoring code for this skip
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SpeedExceedsLimit { .. } => ErrorCode::RowSpeedLimit,
            Self::InvalidCoordinates(_) => ErrorCode::RowCoordinates,
            _ => ErrorCode::RowValidation,
        }
    }
}
