//! Great-circle distances, cumulative distance lookups and per-sample validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RouteData;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Haversine distance between two coordinates, in kilometres.
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Total path length in kilometres.
pub fn calculate_distance(coords: &[Coordinate]) -> f64 {
    coords
        .windows(2)
        .map(|w| haversine_distance(w[0], w[1]))
        .sum()
}

/// Cumulative distance (km) at every sample, starting at zero. One entry
/// per coordinate.
pub fn build_cumulative_distances(coords: &[Coordinate]) -> Vec<f64> {
    if coords.is_empty() {
        return Vec::new();
    }
    let mut distances = Vec::with_capacity(coords.len());
    distances.push(0.0);
    let mut total = 0.0;
    for w in coords.windows(2) {
        total += haversine_distance(w[0], w[1]);
        distances.push(total);
    }
    distances
}

/// Last index whose cumulative distance does not exceed `target_km`.
///
/// Targets at or below zero map to the first sample and targets at or past
/// the end map to the last one.
pub fn find_index_at_distance(distances: &[f64], target_km: f64) -> usize {
    if distances.is_empty() || target_km <= 0.0 {
        return 0;
    }
    let last = distances.len() - 1;
    if target_km >= distances[last] {
        return last;
    }
    // First index strictly beyond the target, minus one.
    distances
        .partition_point(|&d| d <= target_km)
        .saturating_sub(1)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GpsLimits {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
    /// Dead Sea shore sits around -430 m.
    pub elev_min: f64,
    /// Everest summit is about 8849 m.
    pub elev_max: f64,
    pub max_speed_kmh: f64,
    /// Metres per second squared.
    pub max_acceleration: f64,
}

impl Default for GpsLimits {
    fn default() -> Self {
        Self {
            lat_min: -90.0,
            lat_max: 90.0,
            lng_min: -180.0,
            lng_max: 180.0,
            elev_min: -500.0,
            elev_max: 9000.0,
            max_speed_kmh: 35.0,
            max_acceleration: 10.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Missing,
    InvalidNumber,
    LatOutOfRange,
    LngOutOfRange,
    OutOfRange,
    NotChronological,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidReason::Missing => "missing",
            InvalidReason::InvalidNumber => "invalid_number",
            InvalidReason::LatOutOfRange => "lat_out_of_range",
            InvalidReason::LngOutOfRange => "lng_out_of_range",
            InvalidReason::OutOfRange => "out_of_range",
            InvalidReason::NotChronological => "not_chronological",
        };
        f.write_str(text)
    }
}

pub fn validate_coordinate(
    lat: Option<f64>,
    lng: Option<f64>,
    limits: &GpsLimits,
) -> Result<Coordinate, InvalidReason> {
    let (lat, lng) = match (lat, lng) {
        (Some(lat), Some(lng)) => (lat, lng),
        _ => return Err(InvalidReason::Missing),
    };
    if !lat.is_finite() || !lng.is_finite() {
        return Err(InvalidReason::InvalidNumber);
    }
    if lat < limits.lat_min || lat > limits.lat_max {
        return Err(InvalidReason::LatOutOfRange);
    }
    if lng < limits.lng_min || lng > limits.lng_max {
        return Err(InvalidReason::LngOutOfRange);
    }
    Ok(Coordinate { lat, lng })
}

/// A missing elevation is valid and stays missing.
pub fn validate_elevation(
    elevation: Option<f64>,
    limits: &GpsLimits,
) -> Result<Option<f64>, InvalidReason> {
    let Some(value) = elevation else {
        return Ok(None);
    };
    if !value.is_finite() {
        return Err(InvalidReason::InvalidNumber);
    }
    if value < limits.elev_min || value > limits.elev_max {
        return Err(InvalidReason::OutOfRange);
    }
    Ok(Some(value))
}

/// Timestamps must not go backwards relative to the last accepted one.
pub fn validate_timestamp(
    timestamp: Option<DateTime<Utc>>,
    prev: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>, InvalidReason> {
    let Some(ts) = timestamp else {
        return Ok(None);
    };
    if let Some(prev) = prev {
        if ts < prev {
            return Err(InvalidReason::NotChronological);
        }
    }
    Ok(Some(ts))
}

/// Seconds between two optional timestamps.
pub fn seconds_between(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<f64> {
    let (a, b) = (a?, b?);
    Some((b - a).num_milliseconds() as f64 / 1000.0)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MapBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

/// Bounding box of all routes padded by 10% on each axis.
pub fn calculate_map_bounds(routes: &[RouteData]) -> Option<MapBounds> {
    let mut coords = routes.iter().flat_map(|r| r.coordinates.iter()).peekable();
    coords.peek()?;

    let mut north = -90.0_f64;
    let mut south = 90.0_f64;
    let mut east = -180.0_f64;
    let mut west = 180.0_f64;
    for c in coords {
        north = north.max(c.lat);
        south = south.min(c.lat);
        east = east.max(c.lng);
        west = west.min(c.lng);
    }

    let lat_pad = (north - south) * 0.1;
    let lng_pad = (east - west) * 0.1;
    Some(MapBounds {
        north: north + lat_pad,
        south: south - lat_pad,
        east: east + lng_pad,
        west: west - lng_pad,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        let dist = haversine_distance(Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 1.0));
        assert!((dist - 111.195).abs() < 0.2);
    }

    #[test]
    fn cumulative_distances_are_monotonic() {
        let coords: Vec<Coordinate> = [
            (51.0, -1.0),
            (51.001, -1.0),
            (51.001, -1.0),
            (51.0005, -1.002),
            (51.003, -0.999),
        ]
        .iter()
        .map(|&(lat, lng)| Coordinate::new(lat, lng))
        .collect();
        let distances = build_cumulative_distances(&coords);
        assert_eq!(distances.len(), coords.len());
        assert_eq!(distances[0], 0.0);
        assert!(distances.windows(2).all(|w| w[1] >= w[0]));
        let total = calculate_distance(&coords);
        assert!((distances[distances.len() - 1] - total).abs() < 1e-12);

        assert!(build_cumulative_distances(&[]).is_empty());
        assert_eq!(build_cumulative_distances(&coords[..1]), vec![0.0]);
    }

    #[test]
    fn index_lookup_clamps_and_snaps_down() {
        let distances = [0.0, 0.5, 1.0, 1.5, 2.0];
        assert_eq!(find_index_at_distance(&distances, -1.0), 0);
        assert_eq!(find_index_at_distance(&distances, 0.7), 1);
        assert_eq!(find_index_at_distance(&distances, 1.0), 2);
        assert_eq!(find_index_at_distance(&distances, 5.0), 4);
        assert_eq!(find_index_at_distance(&[], 1.0), 0);
    }

    #[test]
    fn validation_reasons() {
        let limits = GpsLimits::default();
        assert_eq!(
            validate_coordinate(None, Some(1.0), &limits),
            Err(InvalidReason::Missing)
        );
        assert_eq!(
            validate_coordinate(Some(f64::NAN), Some(1.0), &limits),
            Err(InvalidReason::InvalidNumber)
        );
        assert_eq!(
            validate_coordinate(Some(91.0), Some(1.0), &limits),
            Err(InvalidReason::LatOutOfRange)
        );
        assert_eq!(
            validate_coordinate(Some(10.0), Some(-181.0), &limits),
            Err(InvalidReason::LngOutOfRange)
        );
        assert_eq!(validate_elevation(None, &limits), Ok(None));
        assert_eq!(
            validate_elevation(Some(9500.0), &limits),
            Err(InvalidReason::OutOfRange)
        );

        let t0 = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let t1 = t0 + chrono::Duration::seconds(5);
        assert_eq!(validate_timestamp(Some(t0), Some(t1)), Err(InvalidReason::NotChronological));
        assert_eq!(validate_timestamp(Some(t1), Some(t0)), Ok(Some(t1)));
        assert_eq!(seconds_between(Some(t0), Some(t1)), Some(5.0));
    }
}
