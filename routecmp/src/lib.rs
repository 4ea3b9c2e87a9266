//! Route comparison library: GPX/FIT ingestion, GPS cleaning and per-route
//! analysis (splits, best efforts, zones, time gaps, steep sections, effort).

pub mod analysis;
pub mod calculators;
pub mod format;
pub mod gps;
pub mod parse;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analysis::{
    analyze_route, calculate_best_efforts, calculate_effort_score, calculate_splits,
    calculate_time_gaps, calculate_zones, detect_steep_sections, BestEffort, EffortScore,
    RouteAnalysis, SteepSection, SteepSections, Split, TimeGapResult, ZoneAnalysis,
};
pub use gps::{Coordinate, GpsLimits};
pub use parse::{parse_fit, parse_gpx, parse_route};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("no track points found")]
    NoTrackPoints,
    #[error("no valid track points after validation")]
    NoValidTrackPoints,
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("age grading unavailable: {0}")]
    AgeGrading(String),
}

/// Standard best-effort targets in kilometres.
pub const DEFAULT_BEST_EFFORT_KM: [f64; 5] = [1.0, 5.0, 10.0, 21.1, 42.195];

/// Tunables for cleaning and analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub split_km: f64,
    pub best_effort_km: Vec<f64>,
    pub limits: GpsLimits,
    pub rolling_window: usize,
    pub steep_grade_pct: f64,
    pub steep_min_km: f64,
    pub gap_interval_km: f64,
    /// Inter-sample deltas above this count as one second of zone time.
    pub zone_max_gap_s: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            split_km: 1.0,
            best_effort_km: DEFAULT_BEST_EFFORT_KM.to_vec(),
            limits: GpsLimits::default(),
            rolling_window: 5,
            steep_grade_pct: 5.0,
            steep_min_km: 0.05,
            gap_interval_km: 0.1,
            zone_max_gap_s: 60.0,
        }
    }
}

/// Smallest split or gap-sampling step accepted, one metre.
pub const MIN_STEP_KM: f64 = 0.001;

fn require_positive(name: &str, value: f64) -> Result<(), RouteError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RouteError::InvalidParameter(format!(
            "{name} must be a positive number (got {value})"
        )))
    }
}

fn require_range(name: &str, min: f64, max: f64) -> Result<(), RouteError> {
    if min.is_finite() && max.is_finite() && min < max {
        Ok(())
    } else {
        Err(RouteError::InvalidParameter(format!(
            "{name} range is empty or not finite ({min}..{max})"
        )))
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<(), RouteError> {
        let steps = [
            ("split_km", self.split_km),
            ("gap_interval_km", self.gap_interval_km),
        ];
        for (name, step) in steps {
            require_positive(name, step)?;
            if step < MIN_STEP_KM {
                return Err(RouteError::InvalidParameter(format!(
                    "{name} must be at least {MIN_STEP_KM} km (got {step})"
                )));
            }
        }
        for km in &self.best_effort_km {
            require_positive("best effort distance", *km)?;
        }
        if self.rolling_window == 0 {
            return Err(RouteError::InvalidParameter(
                "rolling_window must be at least 1".into(),
            ));
        }
        require_positive("steep_grade_pct", self.steep_grade_pct)?;
        require_positive("steep_min_km", self.steep_min_km)?;
        require_positive("zone_max_gap_s", self.zone_max_gap_s)?;

        let limits = &self.limits;
        require_range("latitude", limits.lat_min, limits.lat_max)?;
        require_range("longitude", limits.lng_min, limits.lng_max)?;
        require_range("elevation", limits.elev_min, limits.elev_max)?;
        require_positive("max_speed_kmh", limits.max_speed_kmh)?;
        require_positive("max_acceleration", limits.max_acceleration)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteStats {
    /// Kilometres.
    pub distance: f64,
    pub elevation_gain: f64,
    pub elevation_loss: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
    /// Seconds between the first and last timestamp, if at least two exist.
    pub duration: Option<f64>,
}

/// A parsed, validated and cleaned track. All per-sample vectors share the
/// length of `coordinates`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteData {
    pub id: String,
    pub filename: String,
    pub display_name: String,
    pub color: String,
    pub coordinates: Vec<Coordinate>,
    pub elevations: Vec<Option<f64>>,
    pub timestamps: Vec<Option<DateTime<Utc>>>,
    pub heart_rates: Vec<Option<f64>>,
    pub cadences: Vec<Option<f64>>,
    pub powers: Vec<Option<f64>>,
    /// km/h, cleaned and smoothed.
    pub speeds: Vec<Option<f64>>,
    /// min/km, cleaned and smoothed.
    pub paces: Vec<Option<f64>>,
    pub stats: RouteStats,
}

impl RouteData {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Seconds elapsed between two sample indices.
    pub fn elapsed_between(&self, start: usize, end: usize) -> Option<f64> {
        gps::seconds_between(
            self.timestamps.get(start).copied().flatten(),
            self.timestamps.get(end).copied().flatten(),
        )
    }
}
