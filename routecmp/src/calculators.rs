//! Standalone running calculators: race prediction, hill adjustment, VO2max,
//! training zones and age grading.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RouteError;

const MARATHON_KM: f64 = 42.195;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    #[default]
    Male,
    Female,
}

impl Sex {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Sex::Male => &["male", "m", "men", "man"],
            Sex::Female => &["female", "f", "women", "woman"],
        }
    }
}

impl FromStr for Sex {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        [Sex::Male, Sex::Female]
            .into_iter()
            .find(|sex| sex.aliases().contains(&lower.as_str()))
            .ok_or_else(|| RouteError::InvalidParameter(format!("unknown sex '{s}'")))
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.aliases()[0])
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
pub struct StandardDistance {
    pub label: &'static str,
    pub km: f64,
    pub is_ultra: bool,
}

pub const STANDARD_DISTANCES: [StandardDistance; 8] = [
    StandardDistance { label: "5K", km: 5.0, is_ultra: false },
    StandardDistance { label: "10K", km: 10.0, is_ultra: false },
    StandardDistance { label: "Half Marathon", km: 21.0975, is_ultra: false },
    StandardDistance { label: "Marathon", km: MARATHON_KM, is_ultra: false },
    StandardDistance { label: "50K", km: 50.0, is_ultra: true },
    StandardDistance { label: "50 Miles", km: 80.4672, is_ultra: true },
    StandardDistance { label: "100K", km: 100.0, is_ultra: true },
    StandardDistance { label: "100 Miles", km: 160.934, is_ultra: true },
];

pub const AGE_GRADING_EVENTS: [&str; 11] = [
    "100m", "200m", "400m", "800m", "1500m", "Mile", "3000m", "5000m", "10000m",
    "Half Marathon", "Marathon",
];

/// `h:mm:ss`, or `m:ss` under an hour. Fractions are truncated.
pub fn format_time_from_seconds(total_seconds: f64) -> String {
    let total = total_seconds.max(0.0).floor() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Pace string `m:ss/km` from seconds per kilometre, truncating.
pub fn format_pace_per_km(seconds_per_km: f64) -> String {
    let total = seconds_per_km.max(0.0).floor() as u64;
    format!("{}:{:02}/km", total / 60, total % 60)
}

/// Parses `h:mm:ss`, `mm:ss` or plain seconds.
pub fn parse_time(input: &str) -> Result<f64, RouteError> {
    let invalid = || RouteError::InvalidParameter(format!("invalid time '{input}'"));
    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }
    let mut total = 0.0;
    for (i, part) in parts.iter().enumerate() {
        let value: f64 = part.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 || (i > 0 && value >= 60.0) {
            return Err(invalid());
        }
        total = total * 60.0 + value;
    }
    if total <= 0.0 {
        return Err(invalid());
    }
    Ok(total)
}

fn require_positive(name: &str, value: f64) -> Result<f64, RouteError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(RouteError::InvalidParameter(format!("{name} must be > 0 (got {value})")))
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Prediction {
    pub distance: String,
    pub km: f64,
    pub seconds: f64,
    pub time: String,
    pub pace: String,
    pub confidence: u32,
    pub is_ultra: bool,
}

impl Prediction {
    fn new(distance: String, km: f64, seconds: f64, confidence: u32) -> Self {
        Self {
            distance,
            km,
            seconds,
            time: format_time_from_seconds(seconds),
            pace: format_pace_per_km(seconds / km),
            confidence,
            is_ultra: km > MARATHON_KM,
        }
    }
}

/// Riegel prediction from one known race: `t * (target / known) ^ exponent`.
///
/// `fatigue_exponent` is typically 1.06; it is softened for women beyond
/// 80 km and raised for ultras that are far longer than the known race.
pub fn predict_quick(
    known_km: f64,
    known_seconds: f64,
    target_km: f64,
    fatigue_exponent: f64,
    sex: Sex,
) -> Result<Prediction, RouteError> {
    let known_km = require_positive("known distance", known_km)?;
    let known_seconds = require_positive("known time", known_seconds)?;
    let target_km = require_positive("target distance", target_km)?;
    let mut exponent = require_positive("fatigue exponent", fatigue_exponent)?;

    if sex == Sex::Female && target_km > 80.0 {
        exponent *= 0.97;
    }
    if sex == Sex::Female && target_km > 150.0 {
        exponent *= 0.95;
    }
    if target_km > MARATHON_KM {
        let ratio = target_km / known_km;
        if ratio > 4.0 {
            exponent += 0.2;
        } else if ratio > 2.0 {
            exponent += 0.1;
        }
    }

    let seconds = known_seconds * (target_km / known_km).powf(exponent);
    let label = STANDARD_DISTANCES
        .iter()
        .find(|d| (d.km - target_km).abs() < 0.1)
        .map(|d| d.label.to_string())
        .unwrap_or_else(|| format!("{target_km}km"));
    Ok(Prediction::new(label, target_km, seconds, 85))
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct RaceResult {
    pub km: f64,
    pub seconds: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Athlete {
    pub age: u32,
    pub weight_kg: f64,
    pub height_cm: f64,
    pub sex: Sex,
}

impl Athlete {
    pub fn bmi(&self) -> f64 {
        let m = self.height_cm / 100.0;
        self.weight_kg / (m * m)
    }

    fn age_adjustment(&self) -> f64 {
        let age = self.age as f64;
        if age > 35.0 {
            let adj = 1.0 + (age - 35.0) * 0.002;
            if self.sex == Sex::Female && age > 40.0 {
                adj * 0.98
            } else {
                adj
            }
        } else if age < 25.0 {
            1.0 + (25.0 - age) * 0.001
        } else {
            1.0
        }
    }

    fn bmi_adjustment(&self) -> f64 {
        let bmi = self.bmi();
        let optimal = if self.sex == Sex::Female { 21.0 } else { 20.0 };
        if bmi < 18.0 {
            1.02
        } else if bmi > 25.0 {
            1.0 + (bmi - 25.0) * 0.01
        } else if bmi > optimal + 1.0 {
            1.0 + (bmi - optimal - 1.0) * 0.005
        } else {
            1.0
        }
    }
}

/// Predictions for every standard distance from two known races.
///
/// The personal fatigue exponent comes from the two races; each target is
/// scaled from whichever race is closer, with extra slowdown for ultras and
/// small age and BMI penalties.
pub fn predict_advanced(
    shorter: RaceResult,
    longer: RaceResult,
    athlete: &Athlete,
) -> Result<Vec<Prediction>, RouteError> {
    for (name, v) in [
        ("race 1 distance", shorter.km),
        ("race 1 time", shorter.seconds),
        ("race 2 distance", longer.km),
        ("race 2 time", longer.seconds),
        ("weight", athlete.weight_kg),
        ("height", athlete.height_cm),
        ("age", athlete.age as f64),
    ] {
        require_positive(name, v)?;
    }
    if shorter.km >= longer.km {
        return Err(RouteError::InvalidParameter(
            "race 1 must be shorter than race 2".into(),
        ));
    }

    let personal = (longer.seconds / shorter.seconds).ln() / (longer.km / shorter.km).ln();
    let age_adj = athlete.age_adjustment();
    let bmi_adj = athlete.bmi_adjustment();
    let female = athlete.sex == Sex::Female;

    let predictions = STANDARD_DISTANCES
        .iter()
        .map(|d| {
            let base = if d.km < shorter.km {
                shorter
            } else if d.km <= longer.km {
                if (d.km - shorter.km).abs() < (d.km - longer.km).abs() {
                    shorter
                } else {
                    longer
                }
            } else {
                longer
            };

            let mut exponent = personal;
            if d.is_ultra {
                exponent *= 1.0 + (d.km / MARATHON_KM).powf(0.15) * 0.08;
                if d.km > 80.0 {
                    exponent *= if female { 1.05 * 0.97 } else { 1.05 };
                }
                if d.km > 150.0 {
                    exponent *= if female { 1.08 * 0.95 } else { 1.08 };
                }
            }
            exponent *= age_adj * bmi_adj;

            let seconds = base.seconds * (d.km / base.km).powf(exponent);
            let confidence = (100.0 - (d.km / base.km).ln().abs() * 30.0).max(50.0);
            Prediction::new(d.label.to_string(), d.km, seconds, confidence.round() as u32)
        })
        .collect();
    Ok(predictions)
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ElevationAdjustment {
    pub original_seconds: f64,
    pub adjusted_seconds: f64,
    pub original_time: String,
    pub adjusted_time: String,
    /// Whole minutes.
    pub time_difference_min: i64,
    pub gain_penalty_min: i64,
    pub loss_benefit_min: i64,
    pub terrain_penalty_min: i64,
    pub equivalent_flat_km: f64,
}

/// Naismith-style hill adjustment of a flat time.
///
/// Each 10 m of climbing adds a minute; each 10 m of descent gives back half
/// a minute, never more than the climbing cost. `terrain_factor` scales the
/// flat time (1.0 road, higher for trail).
pub fn naismith_adjust(
    distance_km: f64,
    flat_seconds: f64,
    gain_m: f64,
    loss_m: f64,
    terrain_factor: f64,
) -> Result<ElevationAdjustment, RouteError> {
    let distance_km = require_positive("distance", distance_km)?;
    let flat_seconds = require_positive("flat time", flat_seconds)?;
    let terrain_factor = require_positive("terrain factor", terrain_factor)?;
    let gain = gain_m.max(0.0);
    let loss = loss_m.max(0.0);

    let gain_penalty = gain / 10.0 * 60.0;
    let loss_benefit = (loss / 10.0 * 30.0).min(gain / 10.0 * 30.0);
    let terrain_penalty = flat_seconds * (terrain_factor - 1.0);
    let adjusted = flat_seconds + gain_penalty - loss_benefit + terrain_penalty;
    let flat_pace = flat_seconds / distance_km;

    let minutes = |s: f64| (s / 60.0).round() as i64;
    Ok(ElevationAdjustment {
        original_seconds: flat_seconds,
        adjusted_seconds: adjusted,
        original_time: format_time_from_seconds(flat_seconds),
        adjusted_time: format_time_from_seconds(adjusted),
        time_difference_min: minutes(adjusted - flat_seconds),
        gain_penalty_min: minutes(gain_penalty),
        loss_benefit_min: minutes(loss_benefit),
        terrain_penalty_min: minutes(terrain_penalty),
        equivalent_flat_km: adjusted / flat_pace,
    })
}

/// Carbohydrate per gel, grams.
const GEL_CARBS_G: f64 = 25.0;
const SODIUM_MG_PER_HOUR: f64 = 500.0;
const FLUID_ML_PER_HOUR: f64 = 600.0;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NutritionPlan {
    pub total_hours: f64,
    pub speed_kmh: f64,
    pub calories_per_hour: f64,
    pub total_calories: f64,
    pub carbs_per_hour: f64,
    pub total_carbs: f64,
    pub fluid_ml_per_hour: f64,
    pub total_fluid_ml: f64,
    pub sodium_mg_per_hour: f64,
    pub total_sodium_mg: f64,
    /// One decimal.
    pub gels_per_hour: f64,
}

/// Fuelling estimate for a run at a steady pace.
///
/// Energy is about 1 kcal per kg per km, so `weight * speed` per hour, scaled
/// by terrain (1.0 road to 1.3 steep mountains) and temperature (0.9 cold to
/// 1.5 very hot). Efforts over two and a half hours get 70 g of carbohydrate
/// an hour, shorter ones 50 g. Fluid scales with temperature only.
pub fn nutrition_plan(
    weight_kg: f64,
    distance_km: f64,
    pace_s_per_km: f64,
    terrain_factor: f64,
    temperature_factor: f64,
) -> Result<NutritionPlan, RouteError> {
    let weight_kg = require_positive("weight", weight_kg)?;
    let distance_km = require_positive("distance", distance_km)?;
    let pace_min = require_positive("pace", pace_s_per_km)? / 60.0;
    let terrain_factor = require_positive("terrain factor", terrain_factor)?;
    let temperature_factor = require_positive("temperature factor", temperature_factor)?;

    let total_hours = distance_km * pace_min / 60.0;
    let speed_kmh = 60.0 / pace_min;
    let calories_per_hour = weight_kg * speed_kmh * terrain_factor * temperature_factor;
    let carbs_per_hour = if total_hours > 2.5 { 70.0 } else { 50.0 };
    let fluid_ml_per_hour = (FLUID_ML_PER_HOUR * temperature_factor).round();

    Ok(NutritionPlan {
        total_hours,
        speed_kmh,
        calories_per_hour: calories_per_hour.round(),
        total_calories: (calories_per_hour * total_hours).round(),
        carbs_per_hour,
        total_carbs: (carbs_per_hour * total_hours).round(),
        fluid_ml_per_hour,
        total_fluid_ml: (fluid_ml_per_hour * total_hours).round(),
        sodium_mg_per_hour: SODIUM_MG_PER_HOUR,
        total_sodium_mg: (SODIUM_MG_PER_HOUR * total_hours).round(),
        gels_per_hour: (carbs_per_hour / GEL_CARBS_G * 10.0).round() / 10.0,
    })
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Vo2Test {
    /// Any race distance and time.
    Race { distance_m: f64, seconds: f64 },
    /// Metres covered in twelve minutes.
    Cooper { distance_m: f64 },
    /// 5 km time blended with the max/rest heart-rate ratio.
    HeartRate {
        age: u32,
        max_hr: f64,
        rest_hr: f64,
        five_k_seconds: f64,
        sex: Sex,
    },
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Vo2MaxEstimate {
    pub vo2max: f64,
    pub classification: &'static str,
    pub hr_reserve: Option<f64>,
}

pub fn vo2_classification(vo2max: f64) -> &'static str {
    match vo2max {
        v if v < 35.0 => "Poor",
        v if v < 45.0 => "Fair",
        v if v < 55.0 => "Good",
        v if v < 65.0 => "Excellent",
        _ => "Superior",
    }
}

pub fn estimate_vo2max(test: Vo2Test) -> Result<Vo2MaxEstimate, RouteError> {
    let mut hr_reserve = None;
    let vo2max = match test {
        Vo2Test::Race { distance_m, seconds } => {
            let distance_m = require_positive("distance", distance_m)?;
            let minutes = require_positive("time", seconds)? / 60.0;
            0.2 * (distance_m / minutes) + 3.5
        }
        Vo2Test::Cooper { distance_m } => {
            (require_positive("distance", distance_m)? - 504.9) / 44.73
        }
        Vo2Test::HeartRate { age, max_hr, rest_hr, five_k_seconds, sex } => {
            let max_hr = require_positive("max heart rate", max_hr)?;
            let rest_hr = require_positive("resting heart rate", rest_hr)?;
            let minutes = require_positive("5 km time", five_k_seconds)? / 60.0;
            require_positive("age", age as f64)?;

            let from_time = 0.2 * (5000.0 / minutes) + 3.5;
            let from_hr = 15.0 * (max_hr / rest_hr);
            let mut v = (from_time + from_hr) / 2.0;
            if sex == Sex::Female {
                v *= 0.95;
            }
            if age > 25 {
                v *= (1.0 - 0.002 * (age - 25) as f64).max(0.7);
            }
            hr_reserve = Some(max_hr - rest_hr);
            v
        }
    };
    Ok(Vo2MaxEstimate {
        vo2max,
        classification: vo2_classification(vo2max),
        hr_reserve,
    })
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HrZone {
    pub name: &'static str,
    pub min_hr: u32,
    pub max_hr: u32,
    pub min_percent: u32,
    pub max_percent: u32,
    pub purpose: &'static str,
    pub training_share: &'static str,
}

const HR_ZONES: [(&str, f64, f64, &str, &str); 5] = [
    ("Zone 1 - Recovery", 0.5, 0.6, "Active recovery, warm-up, cool-down", "0-10%"),
    ("Zone 2 - Aerobic Base", 0.6, 0.7, "Build aerobic base, easy runs", "70-80%"),
    ("Zone 3 - Tempo", 0.7, 0.8, "Improve aerobic capacity, tempo runs", "10-15%"),
    ("Zone 4 - Threshold", 0.8, 0.9, "Lactate threshold, 10K to half marathon pace", "5-10%"),
    ("Zone 5 - VO2 Max", 0.9, 1.0, "Intervals, 5K race pace", "0-5%"),
];

/// Karvonen zones over the heart-rate reserve.
pub fn heart_rate_zones(max_hr: u32, rest_hr: u32) -> Result<Vec<HrZone>, RouteError> {
    if max_hr < 100 || rest_hr < 30 || rest_hr >= max_hr {
        return Err(RouteError::InvalidParameter(format!(
            "need max HR >= 100 and 30 <= resting HR < max (got {max_hr}/{rest_hr})"
        )));
    }
    let reserve = (max_hr - rest_hr) as f64;
    let bpm = |r: f64| (rest_hr as f64 + reserve * r).round() as u32;
    Ok(HR_ZONES
        .iter()
        .map(|&(name, lo, hi, purpose, share)| HrZone {
            name,
            min_hr: bpm(lo),
            max_hr: bpm(hi),
            min_percent: (lo * 100.0).round() as u32,
            max_percent: (hi * 100.0).round() as u32,
            purpose,
            training_share: share,
        })
        .collect())
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PaceZone {
    pub name: &'static str,
    pub seconds_per_km: f64,
    pub pace: String,
    pub purpose: &'static str,
}

const PACE_ZONES: [(&str, f64, &str); 5] = [
    ("Zone 1 - Recovery", 1.25, "Active recovery runs"),
    ("Zone 2 - Easy/Base", 1.15, "Build aerobic base"),
    ("Zone 3 - Tempo", 1.05, "Aerobic capacity, tempo runs"),
    ("Zone 4 - Threshold", 1.0, "Lactate threshold, 10K to half marathon pace"),
    ("Zone 5 - VO2 Max", 0.9, "5K race pace, intervals"),
];

/// Pace zones as multiples of threshold pace (seconds per km, at least 3:00).
pub fn pace_zones(threshold_seconds_per_km: f64) -> Result<Vec<PaceZone>, RouteError> {
    if !(threshold_seconds_per_km >= 180.0) {
        return Err(RouteError::InvalidParameter(format!(
            "threshold pace must be at least 3:00/km (got {threshold_seconds_per_km}s)"
        )));
    }
    Ok(PACE_ZONES
        .iter()
        .map(|&(name, factor, purpose)| {
            let seconds = threshold_seconds_per_km * factor;
            let rounded = seconds.round() as u64;
            PaceZone {
                name,
                seconds_per_km: seconds,
                pace: format!("{}:{:02}/km", rounded / 60, rounded % 60),
                purpose,
            }
        })
        .collect())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventFactors {
    /// Open-class record in seconds.
    pub open_record: f64,
    /// Factor per integer age, keyed by the age as a string.
    pub age_grading_factors: BTreeMap<String, f64>,
}

/// WMA-style age grading factors: sex → event → factors.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AgeGradingTable(pub BTreeMap<String, BTreeMap<String, EventFactors>>);

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AgeGrade {
    pub event: String,
    pub age: u32,
    pub factor: f64,
    pub open_record: f64,
    pub graded_seconds: f64,
    pub graded_time: String,
    pub percentage: f64,
    pub classification: &'static str,
}

pub const MIN_GRADING_AGE: u32 = 30;
pub const MAX_GRADING_AGE: u32 = 110;

pub fn age_grading_classification(percentage: f64) -> &'static str {
    match percentage {
        p if p >= 100.0 => "World Class",
        p if p >= 90.0 => "National Class",
        p if p >= 80.0 => "Regional Class",
        p if p >= 70.0 => "Local Class",
        p if p >= 60.0 => "Excellent",
        _ => "Good",
    }
}

impl AgeGradingTable {
    pub fn from_json_str(json: &str) -> Result<Self, RouteError> {
        serde_json::from_str(json)
            .map_err(|e| RouteError::AgeGrading(format!("invalid table: {e}")))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, RouteError> {
        let text = fs::read_to_string(path)
            .map_err(|e| RouteError::AgeGrading(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    fn events_for(&self, sex: Sex) -> Option<&BTreeMap<String, EventFactors>> {
        self.0
            .iter()
            .find(|(key, _)| sex.aliases().contains(&key.to_ascii_lowercase().as_str()))
            .map(|(_, events)| events)
    }

    /// Events available for `sex`, sorted by name.
    pub fn events(&self, sex: Sex) -> Vec<&str> {
        self.events_for(sex)
            .map(|events| events.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// `(factor, open_record)` for an exact integer age.
    pub fn lookup(&self, sex: Sex, event: &str, age: u32) -> Result<(f64, f64), RouteError> {
        if !(MIN_GRADING_AGE..=MAX_GRADING_AGE).contains(&age) {
            return Err(RouteError::AgeGrading(format!(
                "age must be between {MIN_GRADING_AGE} and {MAX_GRADING_AGE} (got {age})"
            )));
        }
        let event_factors = self
            .events_for(sex)
            .and_then(|events| events.get(event))
            .ok_or_else(|| {
                RouteError::AgeGrading(format!("no {sex} factors for event '{event}'"))
            })?;
        let factor = event_factors
            .age_grading_factors
            .get(&age.to_string())
            .copied()
            .ok_or_else(|| {
                RouteError::AgeGrading(format!("no factor for age {age} in '{event}'"))
            })?;
        Ok((factor, event_factors.open_record))
    }

    pub fn grade(
        &self,
        sex: Sex,
        event: &str,
        age: u32,
        seconds: f64,
    ) -> Result<AgeGrade, RouteError> {
        let seconds = require_positive("time", seconds)?;
        let (factor, open_record) = self.lookup(sex, event, age)?;
        let graded_seconds = seconds * factor;
        let percentage = open_record / graded_seconds * 100.0;
        Ok(AgeGrade {
            event: event.to_string(),
            age,
            factor,
            open_record,
            graded_seconds,
            graded_time: format_time_from_seconds(graded_seconds),
            percentage,
            classification: age_grading_classification(percentage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_helpers() {
        assert_eq!(format_time_from_seconds(3723.9), "1:02:03");
        assert_eq!(format_time_from_seconds(2400.0), "40:00");
        assert_eq!(format_pace_per_km(245.7), "4:05/km");
        assert_eq!(parse_time("1:02:03").unwrap(), 3723.0);
        assert_eq!(parse_time("40:00").unwrap(), 2400.0);
        assert_eq!(parse_time("75").unwrap(), 75.0);
        assert!(parse_time("1:75").is_err());
        assert!(parse_time("abc").is_err());
        assert!(parse_time("0:00").is_err());
    }

    #[test]
    fn quick_prediction_follows_riegel() {
        let p = predict_quick(10.0, 2400.0, 21.0975, 1.06, Sex::Male).unwrap();
        let expected = 2400.0 * (21.0975_f64 / 10.0).powf(1.06);
        assert!((p.seconds - expected).abs() < 1e-6);
        assert_eq!(p.distance, "Half Marathon");
        assert_eq!(p.confidence, 85);
        assert!(!p.is_ultra);

        let ultra = predict_quick(10.0, 2400.0, 100.0, 1.06, Sex::Female).unwrap();
        let expected = 2400.0 * 10.0_f64.powf(1.06 * 0.97 + 0.2);
        assert!((ultra.seconds - expected).abs() < 1e-6);
        assert_eq!(ultra.distance, "100K");
        assert!(ultra.is_ultra);

        assert!(predict_quick(0.0, 2400.0, 5.0, 1.06, Sex::Male).is_err());
    }

    #[test]
    fn advanced_prediction_anchors_on_known_races() {
        let athlete = Athlete { age: 30, weight_kg: 70.0, height_cm: 175.0, sex: Sex::Male };
        let five = RaceResult { km: 5.0, seconds: 1200.0 };
        let ten = RaceResult { km: 10.0, seconds: 2500.0 };
        let predictions = predict_advanced(five, ten, &athlete).unwrap();
        assert_eq!(predictions.len(), 8);
        assert_eq!(predictions[0].time, "20:00");
        assert_eq!(predictions[0].confidence, 100);
        assert_eq!(predictions[1].time, "41:40");
        assert!(predictions.windows(2).all(|w| w[1].seconds > w[0].seconds));
        assert!(predictions[7].confidence >= 50);

        assert!(predict_advanced(ten, five, &athlete).is_err());
    }

    #[test]
    fn naismith_adds_climb_and_returns_some_descent() {
        let adj = naismith_adjust(10.0, 3000.0, 200.0, 100.0, 1.0).unwrap();
        assert_eq!(adj.adjusted_seconds, 3900.0);
        assert_eq!(adj.gain_penalty_min, 20);
        assert_eq!(adj.loss_benefit_min, 5);
        assert_eq!(adj.time_difference_min, 15);
        assert!((adj.equivalent_flat_km - 13.0).abs() < 1e-9);

        // Descent credit never exceeds the climbing cost.
        let downhill = naismith_adjust(10.0, 3000.0, 0.0, 500.0, 1.0).unwrap();
        assert_eq!(downhill.adjusted_seconds, 3000.0);
    }

    #[test]
    fn nutrition_for_marathon_and_10k() {
        // 42.195 km at 5:30 /km is 3h52m.
        let plan = nutrition_plan(70.0, 42.195, 330.0, 1.0, 1.0).unwrap();
        assert!((plan.total_hours - 3.868).abs() < 1e-3);
        assert!((plan.speed_kmh - 10.909).abs() < 1e-3);
        assert_eq!(plan.calories_per_hour, 764.0);
        assert_eq!(plan.total_calories, 2954.0);
        assert_eq!(plan.carbs_per_hour, 70.0);
        assert_eq!(plan.total_carbs, 271.0);
        assert_eq!(plan.fluid_ml_per_hour, 600.0);
        assert_eq!(plan.sodium_mg_per_hour, 500.0);
        assert_eq!(plan.gels_per_hour, 2.8);

        let hot_hills = nutrition_plan(60.0, 10.0, 300.0, 1.2, 1.3).unwrap();
        assert!((hot_hills.total_hours - 50.0 / 60.0).abs() < 1e-9);
        // 60 kg * 12 km/h * 1.2 * 1.3
        assert_eq!(hot_hills.calories_per_hour, 1123.0);
        assert_eq!(hot_hills.carbs_per_hour, 50.0);
        assert_eq!(hot_hills.gels_per_hour, 2.0);
        assert_eq!(hot_hills.fluid_ml_per_hour, 780.0);
        assert_eq!(hot_hills.total_fluid_ml, 650.0);

        assert!(matches!(
            nutrition_plan(70.0, 10.0, 0.0, 1.0, 1.0),
            Err(RouteError::InvalidParameter(_))
        ));
        assert!(nutrition_plan(f64::NAN, 10.0, 300.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn vo2max_methods() {
        let race = estimate_vo2max(Vo2Test::Race { distance_m: 5000.0, seconds: 1200.0 }).unwrap();
        assert!((race.vo2max - 53.5).abs() < 1e-9);
        assert_eq!(race.classification, "Good");

        let cooper = estimate_vo2max(Vo2Test::Cooper { distance_m: 2800.0 }).unwrap();
        assert!((cooper.vo2max - (2800.0 - 504.9) / 44.73).abs() < 1e-9);

        let hr = estimate_vo2max(Vo2Test::HeartRate {
            age: 35,
            max_hr: 190.0,
            rest_hr: 50.0,
            five_k_seconds: 1200.0,
            sex: Sex::Male,
        })
        .unwrap();
        assert!((hr.vo2max - 55.25 * 0.98).abs() < 1e-9);
        assert_eq!(hr.hr_reserve, Some(140.0));
        assert_eq!(vo2_classification(70.0), "Superior");
    }

    #[test]
    fn training_zones() {
        let zones = heart_rate_zones(190, 50).unwrap();
        assert_eq!(zones.len(), 5);
        assert_eq!((zones[0].min_hr, zones[0].max_hr), (120, 134));
        assert_eq!(zones[4].max_hr, 190);
        assert!(heart_rate_zones(90, 50).is_err());

        let paces = pace_zones(270.0).unwrap();
        assert_eq!(paces[0].pace, "5:38/km");
        assert_eq!(paces[3].pace, "4:30/km");
        assert_eq!(paces[4].pace, "4:03/km");
        assert!(pace_zones(150.0).is_err());
    }

    #[test]
    fn age_grading_from_table() {
        let table = AgeGradingTable::from_json_str(
            r#"{"male": {"5000m": {"open_record": 755.36,
                "age_grading_factors": {"40": 0.9, "41": 0.895}}}}"#,
        )
        .unwrap();
        assert_eq!(table.events(Sex::Male), vec!["5000m"]);
        assert!(table.events(Sex::Female).is_empty());

        let grade = table.grade(Sex::Male, "5000m", 40, 1200.0).unwrap();
        assert!((grade.graded_seconds - 1080.0).abs() < 1e-9);
        assert!((grade.percentage - 755.36 / 1080.0 * 100.0).abs() < 1e-9);
        assert_eq!(grade.classification, "Excellent");

        assert!(table.grade(Sex::Male, "5000m", 29, 1200.0).is_err());
        assert!(table.grade(Sex::Male, "5000m", 45, 1200.0).is_err());
        assert!(table.grade(Sex::Male, "Marathon", 40, 1200.0).is_err());
        assert_eq!("F".parse::<Sex>().unwrap(), Sex::Female);
    }

    #[test]
    fn events_are_listed_by_name() {
        let table = AgeGradingTable::from_json_str(
            r#"{"female": {
                "Marathon": {"open_record": 8125.0, "age_grading_factors": {"50": 0.9}},
                "10km": {"open_record": 1757.0, "age_grading_factors": {"50": 0.9}},
                "5000m": {"open_record": 849.0, "age_grading_factors": {"50": 0.9}}}}"#,
        )
        .unwrap();
        assert_eq!(table.events(Sex::Female), vec!["10km", "5000m", "Marathon"]);
    }
}
