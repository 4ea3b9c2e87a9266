//! Elevation statistics, smoothing and GPS outlier cleaning.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::gps::{haversine_distance, seconds_between, Coordinate, GpsLimits};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ElevationStats {
    pub gain: f64,
    pub loss: f64,
    pub min: f64,
    pub max: f64,
}

/// Gain/loss/min/max over the non-null elevations, consecutive in order.
pub fn calculate_elevation_stats(elevations: &[Option<f64>]) -> ElevationStats {
    let mut valid = elevations.iter().flatten().copied().filter(|e| !e.is_nan());
    let Some(first) = valid.next() else {
        return ElevationStats::default();
    };

    let mut stats = ElevationStats {
        gain: 0.0,
        loss: 0.0,
        min: first,
        max: first,
    };
    let mut prev = first;
    for e in valid {
        let diff = e - prev;
        if diff > 0.0 {
            stats.gain += diff;
        } else {
            stats.loss += diff.abs();
        }
        stats.min = stats.min.min(e);
        stats.max = stats.max.max(e);
        prev = e;
    }
    stats
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median and median absolute deviation.
pub fn calculate_mad(values: &[f64]) -> Option<(f64, f64)> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations)?;
    Some((med, mad))
}

/// Centered moving average; nulls inside the window are skipped.
pub fn smooth_data(data: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if data.len() < window {
        return data.to_vec();
    }
    let half = window / 2;
    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            let (sum, count) = data[start..end]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count > 0 {
                Some(sum / count as f64)
            } else {
                data[i]
            }
        })
        .collect()
}

/// Centered rolling median; output stays index-aligned with the input.
pub fn rolling_median(data: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if data.len() < window {
        return data.to_vec();
    }
    let half = window / 2;
    let mut buf = Vec::with_capacity(window);
    (0..data.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(data.len());
            buf.clear();
            buf.extend(data[start..end].iter().flatten().filter(|v| !v.is_nan()));
            median(&buf).or(data[i])
        })
        .collect()
}

/// Keep every `factor`-th sample plus both endpoints.
pub fn decimate_data<T: Clone>(
    data: &[T],
    distances: &[f64],
    factor: usize,
) -> (Vec<T>, Vec<f64>) {
    let factor = factor.max(1);
    if data.len() <= factor * 2 || distances.len() != data.len() {
        return (data.to_vec(), distances.to_vec());
    }
    let last = data.len() - 1;
    let mut out_data = vec![data[0].clone()];
    let mut out_dist = vec![distances[0]];
    let mut i = factor;
    while i < last {
        out_data.push(data[i].clone());
        out_dist.push(distances[i]);
        i += factor;
    }
    out_data.push(data[last].clone());
    out_dist.push(distances[last]);
    (out_data, out_dist)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmoothingParams {
    pub window: usize,
    pub decimation: usize,
}

/// Longer routes get wider smoothing windows and coarser decimation.
pub fn adaptive_smoothing_params(total_distance_km: f64) -> SmoothingParams {
    let (window, decimation) = match total_distance_km {
        d if d < 10.0 => (50, 5),
        d if d < 25.0 => (100, 10),
        d if d < 50.0 => (200, 15),
        d if d < 100.0 => (300, 25),
        _ => (500, 50),
    };
    SmoothingParams { window, decimation }
}

pub fn filter_outliers_iqr(data: &[f64], multiplier: f64) -> Vec<f64> {
    if data.len() < 4 {
        return data.to_vec();
    }
    let mut sorted = data.to_vec();
    sorted.sort_by_key(|v| OrderedFloat(*v));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[sorted.len() * 3 / 4];
    let iqr = q3 - q1;
    let lo = q1 - multiplier * iqr;
    let hi = q3 + multiplier * iqr;
    data.iter().copied().filter(|v| *v >= lo && *v <= hi).collect()
}

/// Modified z-score filter (Iglewicz and Hoaglin).
pub fn filter_outliers_mad(data: &[f64], threshold: f64) -> Vec<f64> {
    if data.len() < 4 {
        return data.to_vec();
    }
    match calculate_mad(data) {
        Some((med, mad)) if mad > 0.0 => data
            .iter()
            .copied()
            .filter(|v| 0.6745 * (v - med).abs() / mad <= threshold)
            .collect(),
        _ => data.to_vec(),
    }
}

/// Flag samples whose implied speed from the last accepted timed sample
/// exceeds `max_speed_kmh`.
///
/// Samples without a timestamp are accepted but never become the anchor for
/// later comparisons.
pub fn filter_distance_jumps(
    coordinates: &[Coordinate],
    timestamps: &[Option<DateTime<Utc>>],
    max_speed_kmh: f64,
) -> Vec<bool> {
    let mut flags = vec![true; coordinates.len()];
    let mut anchor: Option<usize> = None;
    for i in 0..coordinates.len() {
        let ts = timestamps.get(i).copied().flatten();
        if ts.is_none() {
            continue;
        }
        if let Some(j) = anchor {
            let dt = seconds_between(timestamps[j], ts).unwrap_or(0.0);
            if dt > 0.0 {
                let km = haversine_distance(coordinates[j], coordinates[i]);
                let implied_kmh = km / (dt / 3600.0);
                if implied_kmh > max_speed_kmh {
                    flags[i] = false;
                    continue;
                }
            }
        }
        anchor = Some(i);
    }
    flags
}

/// Per-sample speed (km/h) and pace (min/km) measured from the previous
/// accepted sample. Rejected samples get no value.
pub fn derive_speeds(
    coordinates: &[Coordinate],
    timestamps: &[Option<DateTime<Utc>>],
    valid: &[bool],
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let n = coordinates.len();
    let mut speeds = vec![None; n];
    let mut paces = vec![None; n];
    let mut anchor: Option<usize> = None;
    for i in 0..n {
        if !valid.get(i).copied().unwrap_or(true) {
            continue;
        }
        let ts = timestamps.get(i).copied().flatten();
        if ts.is_none() {
            continue;
        }
        if let Some(j) = anchor {
            let km = haversine_distance(coordinates[j], coordinates[i]);
            let hours = seconds_between(timestamps[j], ts).unwrap_or(0.0) / 3600.0;
            if hours > 0.0 && km > 0.0 {
                let speed = km / hours;
                speeds[i] = Some(speed);
                paces[i] = Some(60.0 / speed);
            }
        }
        anchor = Some(i);
    }
    (speeds, paces)
}

/// Null out speeds whose change from the previous sample implies an
/// acceleration above `max_acceleration` (m/s²).
pub fn filter_acceleration_spikes(
    speeds: &[Option<f64>],
    timestamps: &[Option<DateTime<Utc>>],
    max_acceleration: f64,
) -> Vec<Option<f64>> {
    if speeds.len() < 2 {
        return speeds.to_vec();
    }
    let mut filtered = Vec::with_capacity(speeds.len());
    filtered.push(speeds[0]);
    for i in 1..speeds.len() {
        let (Some(cur), Some(prev)) = (speeds[i], speeds[i - 1]) else {
            filtered.push(speeds[i]);
            continue;
        };
        let dt = seconds_between(
            timestamps.get(i - 1).copied().flatten(),
            timestamps.get(i).copied().flatten(),
        );
        match dt {
            Some(dt) if dt > 0.0 => {
                let delta_mps = (cur - prev).abs() / 3.6;
                if delta_mps / dt > max_acceleration {
                    filtered.push(None);
                } else {
                    filtered.push(Some(cur));
                }
            }
            _ => filtered.push(Some(cur)),
        }
    }
    filtered
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CleanedSeries {
    pub speeds: Vec<Option<f64>>,
    pub paces: Vec<Option<f64>>,
    pub valid_indices: Vec<usize>,
}

/// Reject teleport jumps, acceleration spikes and implausible speeds.
///
/// Rejected samples are nulled in place; the arrays keep their length so
/// they stay aligned with coordinates and timestamps.
pub fn clean_gps_data(
    speeds: &[Option<f64>],
    paces: &[Option<f64>],
    coordinates: &[Coordinate],
    timestamps: &[Option<DateTime<Utc>>],
    limits: &GpsLimits,
) -> CleanedSeries {
    let jumps = filter_distance_jumps(coordinates, timestamps, limits.max_speed_kmh);
    let accel = filter_acceleration_spikes(speeds, timestamps, limits.max_acceleration);

    let mut cleaned = CleanedSeries {
        speeds: speeds.to_vec(),
        paces: paces.to_vec(),
        valid_indices: Vec::with_capacity(speeds.len()),
    };
    for i in 0..speeds.len() {
        let jumped = !jumps.get(i).copied().unwrap_or(true);
        let spiked = speeds[i].is_some() && accel[i].is_none();
        let implausible = speeds[i].is_some_and(|s| s > limits.max_speed_kmh || s < 0.0);
        if jumped || spiked || implausible {
            cleaned.speeds[i] = None;
            if let Some(p) = cleaned.paces.get_mut(i) {
                *p = None;
            }
        } else {
            cleaned.valid_indices.push(i);
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn meridian_track(
        n: usize,
        step_deg: f64,
        step_s: i64,
    ) -> (Vec<Coordinate>, Vec<Option<DateTime<Utc>>>) {
        let t0 = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let coords = (0..n)
            .map(|i| Coordinate::new(50.0 + i as f64 * step_deg, -1.0))
            .collect();
        let times = (0..n)
            .map(|i| Some(t0 + Duration::seconds(i as i64 * step_s)))
            .collect();
        (coords, times)
    }

    #[test]
    fn elevation_stats_skip_nulls() {
        let stats =
            calculate_elevation_stats(&[Some(10.0), None, Some(15.0), Some(12.0), Some(20.0)]);
        assert_eq!(stats.gain, 13.0);
        assert_eq!(stats.loss, 3.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 20.0);
        assert_eq!(calculate_elevation_stats(&[None, None]), ElevationStats::default());
    }

    #[test]
    fn median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
        assert_eq!(calculate_mad(&[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0]), Some((2.0, 1.0)));
    }

    #[test]
    fn rolling_median_suppresses_single_spike() {
        let data = vec![Some(10.0), Some(10.0), Some(50.0), Some(10.0), None, Some(10.0)];
        let out = rolling_median(&data, 5);
        assert_eq!(out.len(), data.len());
        assert_eq!(out[2], Some(10.0));
        assert_eq!(out[4], Some(10.0));
    }

    #[test]
    fn outlier_filters_drop_the_obvious_value() {
        let data = [10.0, 11.0, 10.5, 9.5, 10.2, 100.0];
        assert!(!filter_outliers_iqr(&data, 1.5).contains(&100.0));
        assert!(!filter_outliers_mad(&data, 3.0).contains(&100.0));
    }

    #[test]
    fn decimation_keeps_endpoints() {
        let data: Vec<usize> = (0..100).collect();
        let distances: Vec<f64> = (0..100).map(|i| i as f64 * 0.01).collect();
        let (d, dist) = decimate_data(&data, &distances, 20);
        assert_eq!(d.first(), Some(&0));
        assert_eq!(d.last(), Some(&99));
        assert_eq!(d.len(), dist.len());
        assert_eq!(adaptive_smoothing_params(30.0).window, 200);
    }

    #[test]
    fn teleport_sample_is_nulled_and_neighbours_survive() {
        // ~11.1 m every 4 s is 10 km/h.
        let (mut coords, times) = meridian_track(20, 0.0001, 4);
        coords[10] = Coordinate::new(50.3, -1.0);

        let flags = filter_distance_jumps(&coords, &times, 35.0);
        assert!(!flags[10]);
        assert!(flags[9] && flags[11]);

        let (speeds, paces) = derive_speeds(&coords, &times, &flags);
        let cleaned = clean_gps_data(&speeds, &paces, &coords, &times, &GpsLimits::default());

        assert_eq!(cleaned.speeds.len(), coords.len());
        assert_eq!(cleaned.speeds[10], None);
        assert_eq!(cleaned.paces[10], None);
        for i in [9, 11, 12] {
            let speed = cleaned.speeds[i].expect("neighbour keeps its speed");
            assert!((speed - 10.0).abs() < 0.1, "speed at {i} was {speed}");
        }
        assert!(!cleaned.valid_indices.contains(&10));
        assert!(cleaned.valid_indices.contains(&11));
    }

    #[test]
    fn acceleration_spike_is_nulled() {
        let (_, times) = meridian_track(4, 0.0, 1);
        let speeds = vec![None, Some(10.0), Some(80.0), Some(10.0)];
        let out = filter_acceleration_spikes(&speeds, &times, 10.0);
        assert_eq!(out, vec![None, Some(10.0), None, None]);
    }
}
