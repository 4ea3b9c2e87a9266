//! GPX and FIT ingestion into validated, cleaned [`RouteData`].

use std::io::Cursor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use xml::reader::{ParserConfig, XmlEvent};

use crate::gps::{
    validate_coordinate, validate_elevation, validate_timestamp, Coordinate, GpsLimits,
};
use crate::stats::{
    calculate_elevation_stats, clean_gps_data, derive_speeds, filter_distance_jumps,
    rolling_median,
};
use crate::{AnalysisParams, RouteData, RouteError, RouteStats};

const MAX_LOGGED_WARNINGS: usize = 10;
const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

const HR_TAGS: &[&str] = &["hr", "heartrate", "HeartRate"];
const CADENCE_TAGS: &[&str] = &["cad", "cadence", "Cadence", "RunCadence"];
const POWER_TAGS: &[&str] = &["power", "Power", "pwr"];

/// One sample as read from the file, before any validation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawSample {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub elevation: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub heart_rate: Option<f64>,
    /// Steps per minute (both feet).
    pub cadence: Option<f64>,
    pub power: Option<f64>,
    /// Device-reported speed in km/h.
    pub speed: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParsedRawData {
    pub samples: Vec<RawSample>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidatedData {
    pub coordinates: Vec<Coordinate>,
    pub elevations: Vec<Option<f64>>,
    pub timestamps: Vec<Option<DateTime<Utc>>>,
    pub heart_rates: Vec<Option<f64>>,
    pub cadences: Vec<Option<f64>>,
    pub powers: Vec<Option<f64>>,
    pub device_speeds: Vec<Option<f64>>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl ValidatedData {
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }
}

/// Validate every sample independently.
///
/// A bad coordinate removes the sample from every array at once; a bad
/// elevation or out-of-order timestamp is replaced by `None` so the arrays
/// stay index-aligned.
pub fn validate_parsed_data(raw: &ParsedRawData, limits: &GpsLimits) -> ValidatedData {
    let n = raw.samples.len();
    let mut out = ValidatedData {
        coordinates: Vec::with_capacity(n),
        elevations: Vec::with_capacity(n),
        timestamps: Vec::with_capacity(n),
        heart_rates: Vec::with_capacity(n),
        cadences: Vec::with_capacity(n),
        powers: Vec::with_capacity(n),
        device_speeds: Vec::with_capacity(n),
        ..ValidatedData::default()
    };
    let mut last_ts: Option<DateTime<Utc>> = None;

    for (i, sample) in raw.samples.iter().enumerate() {
        let coord = match validate_coordinate(sample.lat, sample.lng, limits) {
            Ok(c) => c,
            Err(reason) => {
                out.skipped += 1;
                out.warnings
                    .push(format!("Point {i}: Invalid coordinate ({reason})"));
                continue;
            }
        };

        let elevation = validate_elevation(sample.elevation, limits).unwrap_or_else(|reason| {
            out.warnings
                .push(format!("Point {i}: Invalid elevation ({reason}), using null"));
            None
        });

        let timestamp = match validate_timestamp(sample.timestamp, last_ts) {
            Ok(ts) => {
                if ts.is_some() {
                    last_ts = ts;
                }
                ts
            }
            Err(reason) => {
                out.warnings
                    .push(format!("Point {i}: Invalid timestamp ({reason}), using null"));
                None
            }
        };

        out.coordinates.push(coord);
        out.elevations.push(elevation);
        out.timestamps.push(timestamp);
        out.heart_rates.push(sample.heart_rate);
        out.cadences.push(sample.cadence);
        out.powers.push(sample.power);
        out.device_speeds.push(sample.speed);
    }
    out
}

/// Parse a file, choosing the format from the filename extension.
pub fn parse_route(
    input: &[u8],
    filename: &str,
    color: &str,
    params: &AnalysisParams,
) -> Result<RouteData, RouteError> {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "gpx" => parse_gpx(input, filename, color, params),
        "fit" => parse_fit(input, filename, color, params),
        _ => Err(RouteError::UnsupportedFormat(if ext.is_empty() {
            filename.to_string()
        } else {
            ext
        })),
    }
}

pub fn parse_gpx(
    input: &[u8],
    filename: &str,
    color: &str,
    params: &AnalysisParams,
) -> Result<RouteData, RouteError> {
    let raw = read_gpx_samples(input)?;
    if raw.samples.is_empty() {
        return Err(RouteError::NoTrackPoints);
    }
    build_route(input, &raw, filename, color, params)
}

pub fn parse_fit(
    input: &[u8],
    filename: &str,
    color: &str,
    params: &AnalysisParams,
) -> Result<RouteData, RouteError> {
    let raw = read_fit_samples(input)?;
    if raw.samples.is_empty() {
        return Err(RouteError::NoTrackPoints);
    }
    build_route(input, &raw, filename, color, params)
}

/// Read `trkpt` samples, or `rtept` when the file has no tracks.
pub fn read_gpx_samples(input: &[u8]) -> Result<ParsedRawData, RouteError> {
    let gpx = gpx::read(Cursor::new(input)).map_err(|e| RouteError::GpxParse(e.to_string()))?;

    let track_points: Vec<&gpx::Waypoint> = gpx
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .flat_map(|s| s.points.iter())
        .collect();
    let from_tracks = !track_points.is_empty();
    let points = if from_tracks {
        track_points
    } else {
        gpx.routes.iter().flat_map(|r| r.points.iter()).collect()
    };

    let point_tag = if from_tracks { "trkpt" } else { "rtept" };
    let sensors = read_gpx_sensor_extensions(input, point_tag)?;
    if !sensors.is_empty() && sensors.len() != points.len() {
        debug!(
            points = points.len(),
            extension_rows = sensors.len(),
            "GPX extension rows do not line up with track points; ignoring sensors"
        );
    }
    let sensors_aligned = sensors.len() == points.len();

    let mut samples = Vec::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        let geo = point.point();
        let timestamp = match point.time.as_ref() {
            Some(time) => {
                let iso = time
                    .format()
                    .map_err(|e| RouteError::GpxParse(e.to_string()))?;
                DateTime::parse_from_rfc3339(&iso)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }
            None => None,
        };
        let mut sample = RawSample {
            lat: Some(geo.y()),
            lng: Some(geo.x()),
            elevation: point.elevation,
            timestamp,
            ..RawSample::default()
        };
        if sensors_aligned {
            let sensor = &sensors[i];
            sample.heart_rate = sensor.heart_rate;
            sample.cadence = sensor.cadence.map(|c| c * 2.0);
            sample.power = sensor.power;
        }
        samples.push(sample);
    }
    Ok(ParsedRawData { samples })
}

#[derive(Clone, Copy, Debug, Default)]
struct SensorRow {
    heart_rate: Option<f64>,
    cadence: Option<f64>,
    power: Option<f64>,
}

/// Sensor values from `<extensions>` of every `point_tag` element (`trkpt`
/// or `rtept`), in document order.
///
/// Namespace prefixes are ignored, so `gpxtpx:hr`, `ns3:hr` and `hr` all match.
fn read_gpx_sensor_extensions(
    input: &[u8],
    point_tag: &str,
) -> Result<Vec<SensorRow>, RouteError> {
    let reader = ParserConfig::new()
        .trim_whitespace(true)
        .create_reader(input);

    let mut rows = Vec::new();
    let mut in_point = false;
    let mut in_extensions = false;
    let mut current_tag: Option<String> = None;

    for event in reader {
        match event.map_err(|e| RouteError::GpxParse(e.to_string()))? {
            XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                tag if tag == point_tag => {
                    in_point = true;
                    rows.push(SensorRow::default());
                }
                "extensions" if in_point => in_extensions = true,
                other if in_extensions => current_tag = Some(other.to_string()),
                _ => {}
            },
            XmlEvent::Characters(text) => {
                if let (Some(tag), Some(row)) = (current_tag.as_deref(), rows.last_mut()) {
                    if let Ok(value) = text.trim().parse::<f64>() {
                        assign_sensor(row, tag, value);
                    }
                }
            }
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                tag if tag == point_tag => {
                    in_point = false;
                    in_extensions = false;
                    current_tag = None;
                }
                "extensions" => {
                    in_extensions = false;
                    current_tag = None;
                }
                _ => current_tag = None,
            },
            _ => {}
        }
    }
    Ok(rows)
}

fn assign_sensor(row: &mut SensorRow, tag: &str, value: f64) {
    let matches = |aliases: &[&str]| aliases.contains(&tag);
    if matches(HR_TAGS) {
        row.heart_rate.get_or_insert(value);
    } else if matches(CADENCE_TAGS) {
        row.cadence.get_or_insert(value);
    } else if matches(POWER_TAGS) {
        row.power.get_or_insert(value);
    }
}

/// Read `record` messages that carry a non-zero position.
pub fn read_fit_samples(input: &[u8]) -> Result<ParsedRawData, RouteError> {
    use fitparser::profile::MesgNum;

    let records =
        fitparser::de::from_bytes(input).map_err(|e| RouteError::FitParse(e.to_string()))?;
    let mut samples = Vec::new();

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut sample = RawSample::default();
        let mut altitude = None;
        let mut enhanced_altitude = None;
        let mut speed = None;
        let mut enhanced_speed = None;

        for field in record.fields() {
            let value = field.value();
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = value {
                        sample.timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => sample.lat = fit_position_degrees(value, field.units()),
                "position_long" => sample.lng = fit_position_degrees(value, field.units()),
                "altitude" => altitude = fit_value_to_f64(value),
                "enhanced_altitude" => enhanced_altitude = fit_value_to_f64(value),
                "heart_rate" => sample.heart_rate = fit_value_to_f64(value),
                "cadence" => sample.cadence = fit_value_to_f64(value).map(|c| c * 2.0),
                "power" => sample.power = fit_value_to_f64(value),
                "speed" => speed = fit_value_to_f64(value),
                "enhanced_speed" => enhanced_speed = fit_value_to_f64(value),
                _ => {}
            }
        }

        let (Some(lat), Some(lng)) = (sample.lat, sample.lng) else {
            continue;
        };
        if lat.is_nan() || lng.is_nan() || lat == 0.0 || lng == 0.0 {
            continue;
        }
        sample.elevation = enhanced_altitude.or(altitude);
        // m/s on the wire.
        sample.speed = enhanced_speed.or(speed).map(|mps| mps * 3.6);
        samples.push(sample);
    }
    Ok(ParsedRawData { samples })
}

fn fit_position_degrees(value: &fitparser::Value, units: &str) -> Option<f64> {
    let raw = fit_value_to_f64(value)?;
    if units == "semicircles" || matches!(value, fitparser::Value::SInt32(_)) {
        Some(raw * SEMICIRCLES_TO_DEGREES)
    } else {
        Some(raw)
    }
}

pub fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    use fitparser::Value;
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(*v as f64),
        Value::UInt8(v) => Some(*v as f64),
        Value::UInt8z(v) => Some(*v as f64),
        Value::Byte(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::UInt16(v) => Some(*v as f64),
        Value::UInt16z(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::UInt32(v) => Some(*v as f64),
        Value::UInt32z(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) => Some(*v as f64),
        Value::UInt64z(v) => Some(*v as f64),
        Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

/// Validate, clean and summarise raw samples into a [`RouteData`].
pub fn build_route(
    input: &[u8],
    raw: &ParsedRawData,
    filename: &str,
    color: &str,
    params: &AnalysisParams,
) -> Result<RouteData, RouteError> {
    let validated = validate_parsed_data(raw, &params.limits);
    log_validation_warnings(filename, &validated);
    if validated.is_empty() {
        return Err(RouteError::NoValidTrackPoints);
    }

    let ValidatedData {
        coordinates,
        elevations,
        timestamps,
        heart_rates,
        cadences,
        powers,
        device_speeds,
        ..
    } = validated;

    let (speeds, paces) = if device_speeds.iter().any(Option::is_some) {
        let paces = device_speeds
            .iter()
            .map(|s| s.filter(|v| *v > 0.0).map(|v| 60.0 / v))
            .collect();
        (device_speeds, paces)
    } else {
        let accepted =
            filter_distance_jumps(&coordinates, &timestamps, params.limits.max_speed_kmh);
        derive_speeds(&coordinates, &timestamps, &accepted)
    };

    let cleaned = clean_gps_data(&speeds, &paces, &coordinates, &timestamps, &params.limits);
    debug!(
        file = filename,
        samples = coordinates.len(),
        valid = cleaned.valid_indices.len(),
        "GPS cleaning done"
    );
    let speeds = rolling_median(&cleaned.speeds, params.rolling_window);
    let paces = rolling_median(&cleaned.paces, params.rolling_window);

    let stats = summarize(&coordinates, &elevations, &timestamps);

    Ok(RouteData {
        id: route_id(input),
        filename: filename.to_string(),
        display_name: display_name(filename),
        color: color.to_string(),
        coordinates,
        elevations,
        timestamps,
        heart_rates,
        cadences,
        powers,
        speeds,
        paces,
        stats,
    })
}

fn summarize(
    coordinates: &[Coordinate],
    elevations: &[Option<f64>],
    timestamps: &[Option<DateTime<Utc>>],
) -> RouteStats {
    let elevation = calculate_elevation_stats(elevations);
    let mut timed = timestamps.iter().flatten();
    let first = timed.next();
    let last = timed.last();
    let duration = match (first, last) {
        (Some(a), Some(b)) => Some((*b - *a).num_milliseconds() as f64 / 1000.0),
        _ => None,
    };
    RouteStats {
        distance: crate::gps::calculate_distance(coordinates),
        elevation_gain: elevation.gain,
        elevation_loss: elevation.loss,
        min_elevation: elevation.min,
        max_elevation: elevation.max,
        duration,
    }
}

fn log_validation_warnings(filename: &str, validated: &ValidatedData) {
    if validated.warnings.is_empty() {
        return;
    }
    warn!(
        "{}: {} points skipped during validation",
        filename, validated.skipped
    );
    if validated.warnings.len() > MAX_LOGGED_WARNINGS {
        warn!(
            "First {} of {} warnings:",
            MAX_LOGGED_WARNINGS,
            validated.warnings.len()
        );
    }
    for w in validated.warnings.iter().take(MAX_LOGGED_WARNINGS) {
        warn!("{}", w);
    }
}

/// Stable id derived from the file contents.
pub fn route_id(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let mut out = String::from("route_");
    for b in digest.iter().take(6) {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// `my_long-run.GPX` becomes `my long run`.
pub fn display_name(filename: &str) -> String {
    let lower = filename.to_ascii_lowercase();
    let stem = if lower.ends_with(".gpx") || lower.ends_with(".fit") {
        &filename[..filename.len() - 4]
    } else {
        filename
    };
    stem.replace(['_', '-'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Option<DateTime<Utc>> {
        Some(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc))
    }

    #[test]
    fn validation_drops_bad_coordinates_and_nulls_bad_fields() {
        let raw = ParsedRawData {
            samples: vec![
                RawSample {
                    lat: Some(51.0),
                    lng: Some(-1.0),
                    elevation: Some(10.0),
                    timestamp: ts("2024-05-01T08:00:10Z"),
                    heart_rate: Some(140.0),
                    ..RawSample::default()
                },
                RawSample {
                    lat: Some(123.0),
                    lng: Some(-1.0),
                    ..RawSample::default()
                },
                RawSample {
                    lat: Some(51.001),
                    lng: Some(-1.0),
                    elevation: Some(12_000.0),
                    timestamp: ts("2024-05-01T08:00:05Z"),
                    heart_rate: Some(142.0),
                    ..RawSample::default()
                },
                RawSample {
                    lat: Some(51.002),
                    lng: Some(-1.0),
                    elevation: Some(11.0),
                    timestamp: ts("2024-05-01T08:00:20Z"),
                    ..RawSample::default()
                },
            ],
        };
        let v = validate_parsed_data(&raw, &GpsLimits::default());
        assert_eq!(v.len(), 3);
        assert_eq!(v.skipped, 1);
        assert_eq!(v.warnings.len(), 3);
        assert_eq!(v.elevations, vec![Some(10.0), None, Some(11.0)]);
        assert_eq!(v.timestamps[1], None);
        assert_eq!(v.timestamps[2], ts("2024-05-01T08:00:20Z"));
        assert_eq!(v.heart_rates, vec![Some(140.0), Some(142.0), None]);
        assert!(v.warnings[0].contains("lat_out_of_range"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = parse_route(b"", "run.tcx", "#EA4335", &AnalysisParams::default()).unwrap_err();
        assert!(matches!(err, RouteError::UnsupportedFormat(ext) if ext == "tcx"));
    }

    #[test]
    fn extension_reader_strips_prefixes() {
        let xml = br#"<gpx xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
        <trk><trkseg>
            <trkpt lat="1" lon="2"><extensions><gpxtpx:TrackPointExtension>
                <gpxtpx:hr>151</gpxtpx:hr><gpxtpx:cad>88</gpxtpx:cad>
            </gpxtpx:TrackPointExtension></extensions></trkpt>
            <trkpt lat="1" lon="2"/>
            <trkpt lat="1" lon="2"><extensions><power>250</power></extensions></trkpt>
        </trkseg></trk></gpx>"#;
        let rows = read_gpx_sensor_extensions(xml, "trkpt").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].heart_rate, Some(151.0));
        assert_eq!(rows[0].cadence, Some(88.0));
        assert_eq!(rows[1].heart_rate, None);
        assert_eq!(rows[2].power, Some(250.0));
    }

    #[test]
    fn route_points_carry_extension_sensors() {
        let xml = br#"<?xml version="1.0"?>
<gpx version="1.1" creator="parse tests" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <rte>
    <rtept lat="46.0" lon="7.0"><extensions><gpxtpx:TrackPointExtension>
      <gpxtpx:hr>140</gpxtpx:hr><gpxtpx:cad>85</gpxtpx:cad>
    </gpxtpx:TrackPointExtension></extensions></rtept>
    <rtept lat="46.001" lon="7.0"><extensions><power>210</power></extensions></rtept>
  </rte>
</gpx>"#;
        let parsed = read_gpx_samples(xml).unwrap();
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[0].heart_rate, Some(140.0));
        assert_eq!(parsed.samples[0].cadence, Some(170.0));
        assert_eq!(parsed.samples[1].heart_rate, None);
        assert_eq!(parsed.samples[1].power, Some(210.0));
    }

    #[test]
    fn names_and_ids() {
        assert_eq!(display_name("sunday_long-run.GPX"), "sunday long run");
        assert_eq!(display_name("notes.txt"), "notes.txt");
        let id = route_id(b"abc");
        assert_eq!(id, "route_ba7816bf8f01");
    }
}
