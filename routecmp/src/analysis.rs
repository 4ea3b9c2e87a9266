//! Per-route analysis: splits, best efforts, zones, time gaps, grades and
//! the composite effort score. Every function here is pure over a
//! [`RouteData`].

use serde::{Deserialize, Serialize};

use crate::format::distance_label;
use crate::gps::{build_cumulative_distances, find_index_at_distance, haversine_distance};
use crate::{AnalysisParams, RouteData, RouteError, RouteStats};

/// Split paces outside (0, 30) min/km are treated as stoppages, not running.
const MAX_SPLIT_PACE: f64 = 30.0;
const ZONE_COUNT: usize = 5;
const ZONE_NAMES: [&str; ZONE_COUNT] = ["Recovery", "Endurance", "Tempo", "Threshold", "Max"];
const ZONE_COLORS: [&str; ZONE_COUNT] = ["#34A853", "#4285F4", "#FBBC04", "#FF9800", "#EA4335"];
const MIN_ZONE_SAMPLES: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Split {
    pub number: usize,
    pub start_km: f64,
    pub end_km: f64,
    pub distance: f64,
    pub is_partial: bool,
    pub duration: Option<f64>,
    /// min/km
    pub pace: Option<f64>,
    pub elev_gain: f64,
    pub avg_hr: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BestEffort {
    pub distance: f64,
    pub distance_label: String,
    /// min/km
    pub pace: f64,
    pub duration: f64,
    pub start_km: f64,
    pub elev_gain: f64,
    pub start_idx: usize,
    pub end_idx: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub zone: usize,
    pub name: String,
    pub color: String,
    pub min: f64,
    pub max: f64,
    pub time: f64,
    pub points: usize,
    pub percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ZoneAnalysis {
    pub zones: Vec<Zone>,
    pub total_time: f64,
    pub dominant_zone: usize,
    pub metric: String,
    pub min_val: f64,
    pub max_val: f64,
}

/// Distance (km) to elapsed-time (s) lookup over the timed samples of a
/// route. Both axes are non-decreasing.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeDistanceMap {
    pub distances: Vec<f64>,
    pub times: Vec<f64>,
    /// Sample index in the source route for each entry.
    pub indices: Vec<usize>,
}

impl TimeDistanceMap {
    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn max_distance(&self) -> f64 {
        self.distances.last().copied().unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GapComparison {
    pub route_id: String,
    pub time: f64,
    /// Positive means the comparison route is behind the reference.
    pub gap: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GapPoint {
    pub distance: f64,
    pub reference_time: f64,
    pub comparisons: Vec<GapComparison>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeGapResult {
    pub reference_route_id: String,
    pub gaps: Vec<GapPoint>,
    pub max_distance: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GradePoint {
    /// Percent.
    pub grade: f64,
    /// Cumulative km at the end of the segment.
    pub distance: f64,
    pub elev_change: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Climb,
    Descent,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SteepSection {
    pub kind: SectionKind,
    pub start_km: f64,
    pub end_km: f64,
    pub distance: f64,
    /// Absolute metres climbed or descended.
    pub elev_change: f64,
    pub max_grade: f64,
    pub avg_grade: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SteepSections {
    pub climbs: Vec<SteepSection>,
    pub descents: Vec<SteepSection>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentMetrics {
    pub start_km: f64,
    pub end_km: f64,
    pub actual_distance: f64,
    pub duration: Option<f64>,
    pub pace: Option<f64>,
    pub elev_gain: f64,
    pub elev_loss: f64,
    pub avg_hr: Option<f64>,
    pub avg_cadence: Option<f64>,
    pub avg_power: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EffortScore {
    pub score: u32,
    pub category: String,
    pub color: String,
    pub factors_used: u32,
}

/// Everything the comparison view shows for one route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteAnalysis {
    pub route_id: String,
    pub display_name: String,
    pub stats: RouteStats,
    pub splits: Vec<Split>,
    pub best_efforts: Vec<BestEffort>,
    pub heart_rate_zones: Option<ZoneAnalysis>,
    pub steep_sections: SteepSections,
    pub effort: EffortScore,
}

pub fn analyze_route(
    route: &RouteData,
    params: &AnalysisParams,
) -> Result<RouteAnalysis, RouteError> {
    params.validate()?;
    if route.len() < 2 {
        return Err(RouteError::InsufficientData(format!(
            "{} has {} point(s)",
            route.filename,
            route.len()
        )));
    }
    Ok(RouteAnalysis {
        route_id: route.id.clone(),
        display_name: route.display_name.clone(),
        stats: route.stats.clone(),
        splits: calculate_splits(route, params.split_km),
        best_efforts: calculate_best_efforts(route, &params.best_effort_km),
        heart_rate_zones: calculate_zones_with_cap(
            &route.heart_rates,
            Some(route.timestamps.as_slice()),
            "heartRate",
            params.zone_max_gap_s,
        ),
        steep_sections: detect_steep_sections(route, params.steep_grade_pct, params.steep_min_km),
        effort: calculate_effort_score(route),
    })
}

/// Average pace (min/km) between two sample indices.
pub fn calculate_split_pace(route: &RouteData, start_idx: usize, end_idx: usize) -> Option<f64> {
    if start_idx >= end_idx || end_idx >= route.len() {
        return None;
    }
    let seconds = route.elapsed_between(start_idx, end_idx)?;
    if seconds <= 0.0 {
        return None;
    }
    let km: f64 = route.coordinates[start_idx..=end_idx]
        .windows(2)
        .map(|w| haversine_distance(w[0], w[1]))
        .sum();
    if km <= 0.0 {
        return None;
    }
    let pace = seconds / 60.0 / km;
    (pace > 0.0 && pace < MAX_SPLIT_PACE).then_some(pace)
}

fn elevation_deltas(
    elevations: &[Option<f64>],
    start_idx: usize,
    end_idx: usize,
) -> impl Iterator<Item = f64> + '_ {
    let end = end_idx.min(elevations.len().saturating_sub(1));
    let start = start_idx.min(end);
    elevations[start..=end.max(start)]
        .windows(2)
        .filter_map(|w| match (w[0], w[1]) {
            (Some(a), Some(b)) if !a.is_nan() && !b.is_nan() => Some(b - a),
            _ => None,
        })
}

pub fn calculate_split_elev_gain(
    elevations: &[Option<f64>],
    start_idx: usize,
    end_idx: usize,
) -> f64 {
    if elevations.is_empty() || start_idx >= end_idx {
        return 0.0;
    }
    elevation_deltas(elevations, start_idx, end_idx)
        .filter(|d| *d > 0.0)
        .sum()
}

pub fn calculate_split_elev_loss(
    elevations: &[Option<f64>],
    start_idx: usize,
    end_idx: usize,
) -> f64 {
    if elevations.is_empty() || start_idx >= end_idx {
        return 0.0;
    }
    elevation_deltas(elevations, start_idx, end_idx)
        .filter(|d| *d < 0.0)
        .map(f64::abs)
        .sum()
}

/// Mean of the non-null values in `start_idx..=end_idx`.
pub fn calculate_split_avg(
    values: &[Option<f64>],
    start_idx: usize,
    end_idx: usize,
) -> Option<f64> {
    if start_idx >= end_idx || start_idx >= values.len() {
        return None;
    }
    let end = end_idx.min(values.len() - 1);
    let (sum, count) = values[start_idx..=end]
        .iter()
        .flatten()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Fixed-distance splits. Split distances always add up to the route
/// distance; the final split is partial when shorter than 90% of `split_km`.
pub fn calculate_splits(route: &RouteData, split_km: f64) -> Vec<Split> {
    if route.len() < 2 || !(split_km > 0.0) {
        return Vec::new();
    }
    let distances = build_cumulative_distances(&route.coordinates);
    let total = distances[distances.len() - 1];
    let mut splits = Vec::new();

    let mut number = 1usize;
    loop {
        let start_km = (number - 1) as f64 * split_km;
        if start_km >= total - 1e-9 {
            break;
        }
        let end_km = (number as f64 * split_km).min(total);
        let start_idx = find_index_at_distance(&distances, start_km);
        let end_idx = find_index_at_distance(&distances, end_km);

        splits.push(Split {
            number,
            start_km,
            end_km,
            distance: end_km - start_km,
            is_partial: end_km - start_km < split_km * 0.9,
            duration: route.elapsed_between(start_idx, end_idx),
            pace: calculate_split_pace(route, start_idx, end_idx),
            elev_gain: calculate_split_elev_gain(&route.elevations, start_idx, end_idx),
            avg_hr: calculate_split_avg(&route.heart_rates, start_idx, end_idx),
        });
        number += 1;
    }
    splits
}

/// Fastest window of exactly each target distance.
///
/// Every timed sample is tried as a start; the finish time is interpolated
/// on the distance→time map at `start + target`, so the window covers the
/// target distance exactly rather than snapping to the nearest sample.
pub fn calculate_best_efforts(route: &RouteData, targets_km: &[f64]) -> Vec<BestEffort> {
    let Some(map) = build_time_distance_map(route) else {
        return Vec::new();
    };
    let total = route.stats.distance.max(map.max_distance());
    let distances = build_cumulative_distances(&route.coordinates);

    let mut efforts = Vec::new();
    for &target in targets_km.iter().filter(|&&d| d > 0.0 && d <= total) {
        let mut best: Option<BestEffort> = None;

        for k in 0..map.len() {
            let start_km = map.distances[k];
            let end_km = start_km + target;
            if end_km > map.max_distance() {
                break;
            }
            let Some(end_time) = time_at_distance(&map, end_km) else {
                break;
            };
            let duration = end_time - map.times[k];
            if duration <= 0.0 {
                continue;
            }
            let pace = duration / 60.0 / target;
            if best.as_ref().map_or(true, |b| pace < b.pace) {
                let start_idx = map.indices[k];
                let end_idx = find_index_at_distance(&distances, end_km).max(start_idx);
                best = Some(BestEffort {
                    distance: target,
                    distance_label: distance_label(target),
                    pace,
                    duration,
                    start_km,
                    elev_gain: calculate_split_elev_gain(&route.elevations, start_idx, end_idx),
                    start_idx,
                    end_idx,
                });
            }
        }
        efforts.extend(best);
    }
    efforts
}

/// Five equal-width bins between the observed min and max of `values`.
pub fn calculate_zones(
    values: &[Option<f64>],
    timestamps: Option<&[Option<chrono::DateTime<chrono::Utc>>]>,
    metric: &str,
) -> Option<ZoneAnalysis> {
    calculate_zones_with_cap(values, timestamps, metric, 60.0)
}

fn calculate_zones_with_cap(
    values: &[Option<f64>],
    timestamps: Option<&[Option<chrono::DateTime<chrono::Utc>>]>,
    metric: &str,
    max_gap_s: f64,
) -> Option<ZoneAnalysis> {
    let valid: Vec<f64> = values.iter().flatten().copied().filter(|v| *v > 0.0).collect();
    if valid.len() < MIN_ZONE_SAMPLES {
        return None;
    }
    let min_val = valid.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = valid.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max_val - min_val;
    if range <= 0.0 {
        return None;
    }

    let mut zones: Vec<Zone> = (0..ZONE_COUNT)
        .map(|i| Zone {
            zone: i + 1,
            name: ZONE_NAMES[i].to_string(),
            color: ZONE_COLORS[i].to_string(),
            min: (min_val + range * (i as f64 * 0.2)).round(),
            max: (min_val + range * ((i + 1) as f64 * 0.2)).round(),
            time: 0.0,
            points: 0,
            percent: 0.0,
        })
        .collect();

    let timestamps = timestamps.filter(|t| t.len() == values.len());
    let mut total_time = 0.0;
    for (i, value) in values.iter().enumerate() {
        let Some(v) = value.filter(|v| *v > 0.0) else {
            continue;
        };
        let normalized = (v - min_val) / range;
        let idx = ((normalized * ZONE_COUNT as f64).floor() as usize).min(ZONE_COUNT - 1);

        let mut dt = 1.0;
        if let Some(ts) = timestamps {
            if i > 0 {
                if let Some(delta) = crate::gps::seconds_between(ts[i - 1], ts[i]) {
                    dt = if delta < 0.0 || delta > max_gap_s { 1.0 } else { delta };
                }
            }
        }
        zones[idx].time += dt;
        zones[idx].points += 1;
        total_time += dt;
    }

    for z in zones.iter_mut() {
        z.percent = if total_time > 0.0 {
            (z.time / total_time * 100.0).round()
        } else {
            0.0
        };
    }
    let dominant_zone = zones
        .iter()
        .fold(&zones[0], |best, z| if z.time > best.time { z } else { best })
        .zone;

    Some(ZoneAnalysis {
        zones,
        total_time,
        dominant_zone,
        metric: metric.to_string(),
        min_val,
        max_val,
    })
}

/// Distance→elapsed-time map over the samples that carry a timestamp.
/// Returns `None` when fewer than two samples are timed.
pub fn build_time_distance_map(route: &RouteData) -> Option<TimeDistanceMap> {
    let distances = build_cumulative_distances(&route.coordinates);
    let mut map = TimeDistanceMap::default();
    let mut start = None;
    for (i, ts) in route.timestamps.iter().enumerate() {
        let Some(ts) = ts else {
            continue;
        };
        let t0 = *start.get_or_insert(*ts);
        map.distances.push(distances[i]);
        map.times.push((*ts - t0).num_milliseconds() as f64 / 1000.0);
        map.indices.push(i);
    }
    (map.len() > 1).then_some(map)
}

/// Elapsed time at `target_km`, linearly interpolated. `None` past the end.
pub fn time_at_distance(map: &TimeDistanceMap, target_km: f64) -> Option<f64> {
    if map.len() < 2 || target_km > map.max_distance() {
        return None;
    }
    if target_km <= map.distances[0] {
        return Some(map.times[0]);
    }
    let high = map
        .distances
        .partition_point(|&d| d <= target_km)
        .min(map.len() - 1);
    let low = high.saturating_sub(1);
    let (d1, d2) = (map.distances[low], map.distances[high]);
    let (t1, t2) = (map.times[low], map.times[high]);
    if d2 <= d1 {
        return Some(t1);
    }
    Some(t1 + (target_km - d1) / (d2 - d1) * (t2 - t1))
}

/// Lead/lag of each comparison route against the reference, sampled every
/// `interval_km` up to the shortest common distance.
pub fn calculate_time_gaps(
    reference: &RouteData,
    comparisons: &[&RouteData],
    interval_km: f64,
) -> Option<TimeGapResult> {
    if !(interval_km.is_finite() && interval_km >= crate::MIN_STEP_KM) {
        return None;
    }
    let ref_map = build_time_distance_map(reference)?;
    let comp_maps: Vec<(&RouteData, TimeDistanceMap)> = comparisons
        .iter()
        .filter_map(|r| build_time_distance_map(r).map(|m| (*r, m)))
        .collect();
    if comp_maps.is_empty() {
        return None;
    }

    let max_distance = comp_maps
        .iter()
        .map(|(_, m)| m.max_distance())
        .fold(ref_map.max_distance(), f64::min);

    let mut gaps = Vec::new();
    let mut k = 0usize;
    loop {
        let d = k as f64 * interval_km;
        if d > max_distance + 1e-9 {
            break;
        }
        k += 1;
        let d = d.min(max_distance);
        let Some(reference_time) = time_at_distance(&ref_map, d) else {
            continue;
        };
        let comparisons: Vec<GapComparison> = comp_maps
            .iter()
            .filter_map(|(route, map)| {
                time_at_distance(map, d).map(|time| GapComparison {
                    route_id: route.id.clone(),
                    time,
                    gap: time - reference_time,
                })
            })
            .collect();
        if !comparisons.is_empty() {
            gaps.push(GapPoint {
                distance: d,
                reference_time,
                comparisons,
            });
        }
    }

    Some(TimeGapResult {
        reference_route_id: reference.id.clone(),
        gaps,
        max_distance,
    })
}

/// Grade per segment; segments without elevation or length read as flat.
pub fn calculate_grades(route: &RouteData) -> Vec<GradePoint> {
    if route.elevations.len() < 2 || route.len() < 2 {
        return Vec::new();
    }
    let distances = build_cumulative_distances(&route.coordinates);
    (1..route.len())
        .map(|i| {
            let meters = (distances[i] - distances[i - 1]) * 1000.0;
            match (route.elevations[i - 1], route.elevations.get(i).copied().flatten()) {
                (Some(prev), Some(cur)) if meters > 0.0 => {
                    let elev_change = cur - prev;
                    GradePoint {
                        grade: elev_change / meters * 100.0,
                        distance: distances[i],
                        elev_change,
                    }
                }
                _ => GradePoint {
                    grade: 0.0,
                    distance: distances[i],
                    elev_change: 0.0,
                },
            }
        })
        .collect()
}

struct OpenSection {
    kind: SectionKind,
    start_km: f64,
    end_km: f64,
    elev_change: f64,
    max_grade: f64,
    grade_sum: f64,
    segments: usize,
}

impl OpenSection {
    fn close(self, min_km: f64, out: &mut SteepSections) {
        let distance = self.end_km - self.start_km;
        if distance < min_km {
            return;
        }
        let section = SteepSection {
            kind: self.kind,
            start_km: self.start_km,
            end_km: self.end_km,
            distance,
            elev_change: self.elev_change.abs(),
            max_grade: self.max_grade,
            avg_grade: (self.grade_sum / self.segments as f64).abs(),
        };
        match self.kind {
            SectionKind::Climb => out.climbs.push(section),
            SectionKind::Descent => out.descents.push(section),
        }
    }
}

/// Runs of consecutive segments at or beyond `threshold_pct`, merged while
/// the direction stays the same, kept when at least `min_km` long.
pub fn detect_steep_sections(route: &RouteData, threshold_pct: f64, min_km: f64) -> SteepSections {
    let grades = calculate_grades(route);
    let mut out = SteepSections::default();
    let mut current: Option<OpenSection> = None;
    let mut prev_km = 0.0;

    for g in &grades {
        let kind = if g.grade >= threshold_pct {
            Some(SectionKind::Climb)
        } else if g.grade <= -threshold_pct {
            Some(SectionKind::Descent)
        } else {
            None
        };

        match (kind, current.as_mut()) {
            (Some(kind), Some(open)) if open.kind == kind => {
                open.end_km = g.distance;
                open.elev_change += g.elev_change;
                open.max_grade = open.max_grade.max(g.grade.abs());
                open.grade_sum += g.grade;
                open.segments += 1;
            }
            (Some(kind), _) => {
                if let Some(done) = current.take() {
                    done.close(min_km, &mut out);
                }
                current = Some(OpenSection {
                    kind,
                    start_km: prev_km,
                    end_km: g.distance,
                    elev_change: g.elev_change,
                    max_grade: g.grade.abs(),
                    grade_sum: g.grade,
                    segments: 1,
                });
            }
            (None, _) => {
                if let Some(done) = current.take() {
                    done.close(min_km, &mut out);
                }
            }
        }
        prev_km = g.distance;
    }
    if let Some(done) = current {
        done.close(min_km, &mut out);
    }
    out
}

pub fn calculate_segment_metrics(
    route: &RouteData,
    start_km: f64,
    end_km: f64,
) -> Option<SegmentMetrics> {
    if route.len() < 2 || end_km <= start_km {
        return None;
    }
    let distances = build_cumulative_distances(&route.coordinates);
    let start_idx = find_index_at_distance(&distances, start_km);
    let end_idx = find_index_at_distance(&distances, end_km);
    if end_idx <= start_idx {
        return None;
    }
    Some(SegmentMetrics {
        start_km,
        end_km,
        actual_distance: distances[end_idx] - distances[start_idx],
        duration: route.elapsed_between(start_idx, end_idx),
        pace: calculate_split_pace(route, start_idx, end_idx),
        elev_gain: calculate_split_elev_gain(&route.elevations, start_idx, end_idx),
        elev_loss: calculate_split_elev_loss(&route.elevations, start_idx, end_idx),
        avg_hr: calculate_split_avg(&route.heart_rates, start_idx, end_idx),
        avg_cadence: calculate_split_avg(&route.cadences, start_idx, end_idx),
        avg_power: calculate_split_avg(&route.powers, start_idx, end_idx),
    })
}

/// Piecewise-linear ramp: `low_score` at `knee`, 100 at `cap`.
fn ramp(value: f64, knee: f64, cap: f64, low_score: f64) -> f64 {
    if value <= knee {
        value / knee * low_score
    } else {
        low_score + (value.min(cap) - knee) / (cap - knee) * (100.0 - low_score)
    }
}

/// 0-100 effort blend: duration 30%, distance 25%, climbing 25%, pace 20%.
///
/// Missing factors are dropped and the remainder rescaled.
pub fn calculate_effort_score(route: &RouteData) -> EffortScore {
    let mut score = 0.0;
    let mut factors = 0u32;

    if let Some(duration) = route.stats.duration.filter(|d| *d > 0.0) {
        score += ramp(duration / 60.0, 30.0, 90.0, 30.0) * 0.3;
        factors += 1;
    }
    if route.stats.distance > 0.0 {
        score += ramp(route.stats.distance, 5.0, 20.0, 25.0) * 0.25;
        factors += 1;
    }
    if route.stats.elevation_gain > 0.0 {
        score += ramp(route.stats.elevation_gain, 100.0, 500.0, 25.0) * 0.25;
        factors += 1;
    }
    if route.paces.len() > 10 {
        let valid: Vec<f64> = route
            .paces
            .iter()
            .flatten()
            .copied()
            .filter(|p| *p > 0.0 && *p < 20.0)
            .collect();
        if !valid.is_empty() {
            let avg = valid.iter().sum::<f64>() / valid.len() as f64;
            score += ((8.0 - avg) / 4.0 * 100.0).clamp(0.0, 100.0) * 0.2;
            factors += 1;
        }
    }

    if factors > 0 && factors < 4 {
        score /= factors as f64 * 0.25;
    }
    let score = score.round().clamp(5.0, 100.0) as u32;
    let (category, color) = match score {
        0..=25 => ("Easy", "#34A853"),
        26..=50 => ("Moderate", "#4285F4"),
        51..=75 => ("Hard", "#FF9800"),
        _ => ("Very Hard", "#EA4335"),
    };
    EffortScore {
        score,
        category: category.to_string(),
        color: color.to_string(),
        factors_used: factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::Coordinate;
    use chrono::{DateTime, Duration, Utc};

    /// Northbound line with `n` samples `step_m` apart, `step_s` seconds apart.
    fn uniform_route(id: &str, n: usize, step_m: f64, step_s: f64) -> RouteData {
        let step_deg = step_m / 1000.0 / crate::gps::EARTH_RADIUS_KM * 180.0 / std::f64::consts::PI;
        let t0 = DateTime::parse_from_rfc3339("2024-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let coordinates: Vec<Coordinate> = (0..n)
            .map(|i| Coordinate::new(51.0 + i as f64 * step_deg, -1.0))
            .collect();
        let timestamps = (0..n)
            .map(|i| Some(t0 + Duration::milliseconds((i as f64 * step_s * 1000.0) as i64)))
            .collect();
        let distance = crate::gps::calculate_distance(&coordinates);
        let pace = step_s / 60.0 / (step_m / 1000.0);
        RouteData {
            id: id.to_string(),
            filename: format!("{id}.gpx"),
            display_name: id.to_string(),
            color: "#EA4335".into(),
            elevations: vec![Some(100.0); n],
            timestamps,
            heart_rates: vec![None; n],
            cadences: vec![None; n],
            powers: vec![None; n],
            speeds: vec![Some(60.0 / pace); n],
            paces: vec![Some(pace); n],
            stats: RouteStats {
                distance,
                duration: Some((n - 1) as f64 * step_s),
                ..RouteStats::default()
            },
            coordinates,
        }
    }

    #[test]
    fn splits_partition_total_distance() {
        // 10 m steps, 3 s each: 5:00 /km over ~3.5 km.
        let route = uniform_route("a", 351, 10.0, 3.0);
        let splits = calculate_splits(&route, 1.0);
        assert_eq!(splits.len(), 4);
        let sum: f64 = splits.iter().map(|s| s.distance).sum();
        assert!((sum - route.stats.distance).abs() < 1e-9);
        for w in splits.windows(2) {
            assert_eq!(w[0].end_km, w[1].start_km);
        }
        assert!(!splits[0].is_partial);
        assert!(splits[3].is_partial);
        let pace = splits[0].pace.unwrap();
        assert!((pace - 5.0).abs() < 1e-6, "pace {pace}");
    }

    #[test]
    fn best_efforts_match_uniform_pace() {
        // 5 m steps, 1.5 s each: 5:00 /km over ~11 km.
        let route = uniform_route("a", 2201, 5.0, 1.5);
        let efforts = calculate_best_efforts(&route, &[1.0, 5.0, 10.0, 21.1]);
        assert_eq!(efforts.len(), 3);
        for e in &efforts {
            assert!((e.pace - 5.0).abs() < 1e-6, "{} pace {}", e.distance_label, e.pace);
            assert!((e.duration - e.distance * 300.0).abs() < 1e-3);
        }
        assert_eq!(efforts[0].distance_label, "1km");
        assert_eq!(efforts[2].distance_label, "10km");
    }

    #[test]
    fn best_effort_finds_the_fast_stretch() {
        let mut route = uniform_route("a", 401, 10.0, 3.0);
        // Samples 100..=200 run twice as fast; shift everything after.
        let base = route.timestamps[100].unwrap();
        for i in 101..route.len() {
            let offset = if i <= 200 {
                (i - 100) as f64 * 1.5
            } else {
                150.0 + (i - 200) as f64 * 3.0
            };
            route.timestamps[i] = Some(base + Duration::milliseconds((offset * 1000.0) as i64));
        }
        let efforts = calculate_best_efforts(&route, &[1.0]);
        assert_eq!(efforts.len(), 1);
        assert!((efforts[0].pace - 2.5).abs() < 1e-6);
        assert_eq!(efforts[0].start_idx, 100);
    }

    #[test]
    fn zone_percentages_sum_to_hundred() {
        let mut route = uniform_route("a", 50, 10.0, 3.0);
        route.heart_rates = (0..50).map(|i| Some(120.0 + (i % 7) as f64 * 9.0)).collect();
        let zones =
            calculate_zones(&route.heart_rates, Some(route.timestamps.as_slice()), "heartRate")
                .unwrap();
        assert_eq!(zones.zones.len(), 5);
        let pct: f64 = zones.zones.iter().map(|z| z.percent).sum();
        assert!((pct - 100.0).abs() <= 2.0, "sum {pct}");
        assert!((zones.total_time - (1.0 + 49.0 * 3.0)).abs() < 1e-9);
        assert_eq!(zones.min_val, 120.0);
        assert_eq!(zones.max_val, 174.0);

        assert!(calculate_zones(&[Some(150.0); 5], None, "heartRate").is_none());
        assert!(calculate_zones(&[Some(150.0); 20], None, "heartRate").is_none());
    }

    #[test]
    fn time_gaps_report_lag() {
        let fast = uniform_route("fast", 201, 10.0, 3.0);
        let slow = uniform_route("slow", 201, 10.0, 3.3);
        let result = calculate_time_gaps(&fast, &[&slow], 0.5).unwrap();
        assert_eq!(result.reference_route_id, "fast");
        assert_eq!(result.gaps.len(), 5);
        let last = result.gaps.last().unwrap();
        assert!((last.distance - 2.0).abs() < 1e-9);
        let gap = last.comparisons[0].gap;
        assert!((gap - 60.0).abs() < 1e-3, "gap {gap}");
        assert!(result.gaps[0].comparisons[0].gap.abs() < 1e-9);

        assert!(calculate_time_gaps(&fast, &[&slow], 1e-9).is_none());
        assert!(calculate_time_gaps(&fast, &[&slow], f64::NAN).is_none());
        assert!(calculate_time_gaps(&fast, &[&slow], 0.0).is_none());
    }

    #[test]
    fn steep_sections_merge_runs() {
        let mut route = uniform_route("hill", 41, 10.0, 3.0);
        let mut elev = 100.0;
        for i in 0..route.len() {
            if (10..20).contains(&i) {
                elev += 1.0; // 10% up
            } else if (25..28).contains(&i) {
                elev -= 1.0; // too short to count
            }
            route.elevations[i] = Some(elev);
        }
        let sections = detect_steep_sections(&route, 5.0, 0.05);
        assert_eq!(sections.climbs.len(), 1);
        assert!(sections.descents.is_empty());
        let climb = &sections.climbs[0];
        assert_eq!(climb.kind, SectionKind::Climb);
        assert!((climb.elev_change - 10.0).abs() < 1e-9);
        assert!((climb.distance - 0.1).abs() < 1e-6);
        assert!((climb.avg_grade - 10.0).abs() < 1e-3);
    }

    #[test]
    fn effort_score_blends_factors() {
        let route = uniform_route("a", 1001, 10.0, 3.0);
        let effort = calculate_effort_score(&route);
        // 50 min, 10 km, no climbing, 5:00 /km.
        assert_eq!(effort.factors_used, 3);
        assert_eq!(effort.score, 58);
        assert_eq!(effort.category, "Hard");
    }

    #[test]
    fn segment_metrics_cover_window() {
        let route = uniform_route("a", 301, 10.0, 3.0);
        let seg = calculate_segment_metrics(&route, 0.5, 1.5).unwrap();
        assert!((seg.actual_distance - 1.0).abs() < 0.011);
        assert!((seg.pace.unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(seg.elev_gain, 0.0);
        assert!(calculate_segment_metrics(&route, 2.0, 1.0).is_none());
    }
}
