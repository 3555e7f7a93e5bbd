//! Great-circle distance and the distance-based transmission loss model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Loss fraction per 10 km of line (0.05% per km)
pub const LOSS_PER_10_KM: f64 = 0.005;

/// Upper bound on the fraction of power lost in a single transfer
pub const MAX_LOSS_RATE: f64 = 0.5;

#[derive(Debug, Error, PartialEq)]
pub enum LossModelError {
    #[error("Distance must be finite and non-negative, got {0} km")]
    InvalidDistance(f64),
}

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to another coordinate in kilometres
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        distance_km(self, other)
    }
}

/// Haversine great-circle distance between two coordinates in kilometres.
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push antipodal points just past 1.0. NaN must stay NaN.
    let h = if h > 1.0 { 1.0 } else { h };
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Fraction of transferred power lost over `distance_km` of line.
///
/// Grows linearly at 0.05% per km and saturates at 50%.
pub fn loss_rate(distance_km: f64) -> Result<f64, LossModelError> {
    if !distance_km.is_finite() || distance_km < 0.0 {
        return Err(LossModelError::InvalidDistance(distance_km));
    }
    Ok((LOSS_PER_10_KM * (distance_km / 10.0)).min(MAX_LOSS_RATE))
}
