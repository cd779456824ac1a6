//! Great-circle distance between coordinate pairs.
//!
//! Distances use the haversine formula on a spherical Earth and are rounded
//! to two decimals with [`f64::round`], i.e. halves round away from zero.
//! Rounding only affects the reported value; no routing decision depends on
//! the distance.
//!
//! # Coordinate System
//!
//! - Latitude: degrees north (-90 to 90)
//! - Longitude: degrees east (-180 to 180)
//! - Distance: kilometres

use std::f64::consts::PI;
use thiserror::Error;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Degrees to radians conversion factor.
const DEG_TO_RAD: f64 = PI / 180.0;

/// Why a coordinate pair was rejected
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CoordinateError {
    /// Latitude outside [-90, 90]
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    /// Longitude outside [-180, 180]
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    /// NaN or infinite component
    #[error("coordinate ({lat}, {lon}) is not a finite number")]
    NotFinite {
        /// Latitude component
        lat: f64,
        /// Longitude component
        lon: f64,
    },
}

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lon: f64,
}

impl Coordinates {
    /// Create a coordinate pair without checking it
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check both components are finite and in range
    ///
    /// # Errors
    ///
    /// Returns the first problem found
    pub fn validate(self) -> Result<Self, CoordinateError> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err(CoordinateError::NotFinite {
                lat: self.lat,
                lon: self.lon,
            });
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(CoordinateError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(CoordinateError::LongitudeOutOfRange(self.lon));
        }
        Ok(self)
    }
}

impl From<(f64, f64)> for Coordinates {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self::new(lat, lon)
    }
}

/// Distance in km between two positions, rounded to 2 decimals
///
/// # Errors
///
/// Returns [`CoordinateError`] if either pair is out of range or not finite;
/// no distance is produced in that case.
///
/// # Example
///
/// ```
/// use fleet_telemetry::geo::{distance_km, Coordinates};
///
/// // One degree of latitude along a meridian
/// let d = distance_km(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0)).unwrap();
/// assert_eq!(d, 111.19);
/// ```
pub fn distance_km(from: Coordinates, to: Coordinates) -> Result<f64, CoordinateError> {
    let from = from.validate()?;
    let to = to.validate()?;
    Ok(round_to_hundredths(haversine_km(from, to)))
}

/// Unrounded haversine distance; inputs are assumed valid.
///
/// Deltas are taken as absolute values so the result is bit-identical when
/// the arguments are swapped.
#[must_use]
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1_rad = from.lat * DEG_TO_RAD;
    let lat2_rad = to.lat * DEG_TO_RAD;
    let delta_lat = (to.lat - from.lat).abs() * DEG_TO_RAD;
    let delta_lon = (to.lon - from.lon).abs() * DEG_TO_RAD;

    let half_lat = (delta_lat / 2.0).sin();
    let half_lon = (delta_lon / 2.0).sin();
    let a = half_lat * half_lat + lat1_rad.cos() * lat2_rad.cos() * half_lon * half_lon;
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Round to two decimal places, halves away from zero
#[must_use]
pub fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEPOT: Coordinates = Coordinates::new(12.9716, 77.5946);

    #[test]
    fn test_distance_near_depot() -> Result<(), CoordinateError> {
        let d = distance_km(Coordinates::new(12.97, 77.59), DEPOT)?;
        assert!((d - 0.53).abs() < 1e-9, "unexpected distance {d}");
        Ok(())
    }

    #[test]
    fn test_known_city_pair() -> Result<(), CoordinateError> {
        let new_york = Coordinates::new(40.7128, -74.0060);
        let london = Coordinates::new(51.5074, -0.1278);
        assert_eq!(distance_km(new_york, london)?, 5570.22);
        Ok(())
    }

    #[test]
    fn test_zero_distance_to_self() -> Result<(), CoordinateError> {
        assert_eq!(distance_km(DEPOT, DEPOT)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_out_of_range_is_invalid() {
        assert_eq!(
            distance_km(Coordinates::new(95.0, 0.0), DEPOT),
            Err(CoordinateError::LatitudeOutOfRange(95.0))
        );
        assert_eq!(
            distance_km(DEPOT, Coordinates::new(0.0, -180.5)),
            Err(CoordinateError::LongitudeOutOfRange(-180.5))
        );
        assert!(distance_km(Coordinates::new(999.0, 77.59), DEPOT).is_err());
        assert!(distance_km(Coordinates::new(f64::NAN, 0.0), DEPOT).is_err());
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        assert!(distance_km(Coordinates::new(90.0, 180.0), Coordinates::new(-90.0, -180.0)).is_ok());
    }

    #[test]
    fn test_rounding_mode() {
        assert_eq!(round_to_hundredths(1.005_000_001), 1.01);
        assert_eq!(round_to_hundredths(0.125), 0.13);
        assert_eq!(round_to_hundredths(2.0), 2.0);
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric(
            lat1 in -90.0_f64..=90.0,
            lon1 in -180.0_f64..=180.0,
            lat2 in -90.0_f64..=90.0,
            lon2 in -180.0_f64..=180.0,
        ) {
            let a = Coordinates::new(lat1, lon1);
            let b = Coordinates::new(lat2, lon2);
            prop_assert_eq!(distance_km(a, b), distance_km(b, a));
        }

        #[test]
        fn prop_distance_to_self_is_zero(lat in -90.0_f64..=90.0, lon in -180.0_f64..=180.0) {
            let p = Coordinates::new(lat, lon);
            prop_assert_eq!(distance_km(p, p), Ok(0.0));
        }

        #[test]
        fn prop_out_of_range_latitude_never_yields_distance(lat in 90.000_001_f64..1.0e6) {
            prop_assert!(distance_km(Coordinates::new(lat, 0.0), DEPOT).is_err());
            prop_assert!(distance_km(DEPOT, Coordinates::new(-lat, 0.0)).is_err());
        }
    }
}
