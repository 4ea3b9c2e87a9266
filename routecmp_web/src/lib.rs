//! Browser bindings: files are parsed and analysed client-side, nothing is
//! uploaded anywhere.

use routecmp::analysis::{calculate_time_gaps, RouteAnalysis, TimeGapResult};
use routecmp::calculators::{
    estimate_vo2max, format_time_from_seconds, heart_rate_zones, naismith_adjust, nutrition_plan,
    pace_zones, parse_time, predict_advanced, predict_quick, AgeGradingTable, Athlete, RaceResult,
    Sex, Vo2Test,
};
use routecmp::format::{next_color, ROUTE_COLORS};
use routecmp::gps::calculate_map_bounds;
use routecmp::{analyze_route, parse_route, AnalysisParams, RouteData, RouteError, RouteStats};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value as from_js, to_value as to_js};
use wasm_bindgen::prelude::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

fn js_err<E: std::fmt::Display>(err: E) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn params_from_js(params: JsValue) -> Result<AnalysisParams, JsValue> {
    if params.is_undefined() || params.is_null() {
        return Ok(AnalysisParams::default());
    }
    let params: AnalysisParams = from_js(params).map_err(js_err)?;
    params.validate().map_err(js_err)?;
    Ok(params)
}

fn build_label() -> String {
    format!("routecmp v{} ({})", APP_VERSION, APP_COMMIT)
}

#[wasm_bindgen]
pub fn build_info() -> String {
    build_label()
}

#[wasm_bindgen]
pub fn route_colors() -> Result<JsValue, JsValue> {
    to_js(&ROUTE_COLORS).map_err(js_err)
}

/// Parse one GPX/FIT file. `params` may be `undefined` for defaults.
#[wasm_bindgen]
pub fn parse_route_file(
    name: &str,
    bytes: &[u8],
    color: Option<String>,
    params: JsValue,
) -> Result<JsValue, JsValue> {
    let params = params_from_js(params)?;
    let color = color.unwrap_or_else(|| ROUTE_COLORS[0].to_string());
    let route = parse_route(bytes, name, &color, &params).map_err(js_err)?;
    to_js(&route).map_err(js_err)
}

#[derive(Serialize)]
struct AnalyzedFile {
    route: RouteData,
    analysis: RouteAnalysis,
}

#[wasm_bindgen]
pub fn analyze_route_file(name: &str, bytes: &[u8], params: JsValue) -> Result<JsValue, JsValue> {
    let params = params_from_js(params)?;
    let route = parse_route(bytes, name, ROUTE_COLORS[0], &params).map_err(js_err)?;
    let analysis = analyze_route(&route, &params).map_err(js_err)?;
    to_js(&AnalyzedFile { route, analysis }).map_err(js_err)
}

/// Lightweight view of a loaded route for lists and legends.
#[derive(Clone, Debug, Serialize)]
struct RouteSummary<'a> {
    id: &'a str,
    display_name: &'a str,
    filename: &'a str,
    color: &'a str,
    points: usize,
    stats: &'a RouteStats,
}

impl<'a> From<&'a RouteData> for RouteSummary<'a> {
    fn from(route: &'a RouteData) -> Self {
        Self {
            id: &route.id,
            display_name: &route.display_name,
            filename: &route.filename,
            color: &route.color,
            points: route.len(),
            stats: &route.stats,
        }
    }
}

#[derive(Deserialize)]
struct UploadedFile {
    name: String,
    /// `Uint8Array` or plain array.
    bytes: Vec<u8>,
}

#[derive(Serialize)]
struct BatchLoad<'a> {
    loaded: Vec<RouteSummary<'a>>,
    /// `"<file>: <reason>"` for each file that failed.
    errors: Vec<String>,
}

/// Averages over the selected routes. Duration only counts timed routes and
/// pace pools every plausible sample (0 to 20 min/km) across routes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
struct SelectionSummary {
    routes: usize,
    avg_distance_km: Option<f64>,
    avg_duration_s: Option<f64>,
    avg_elevation_gain_m: Option<f64>,
    avg_pace: Option<f64>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// The set of routes currently loaded for comparison.
#[wasm_bindgen]
#[derive(Default)]
pub struct RouteSession {
    routes: Vec<RouteData>,
    params: AnalysisParams,
    /// Defaults to the first route loaded.
    reference_id: Option<String>,
    /// Selection order; new routes start selected.
    selected: Vec<String>,
}

impl RouteSession {
    fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<&RouteData, RouteError> {
        let used: Vec<&str> = self.routes.iter().map(|r| r.color.as_str()).collect();
        let color = next_color(&used);
        let route = parse_route(bytes, name, color, &self.params)?;
        if self.routes.iter().any(|r| r.id == route.id) {
            return Err(RouteError::InvalidParameter(format!(
                "{} is already loaded",
                name
            )));
        }
        if self.reference_id.is_none() {
            self.reference_id = Some(route.id.clone());
        }
        self.selected.push(route.id.clone());
        let idx = self.routes.len();
        self.routes.push(route);
        Ok(&self.routes[idx])
    }

    /// Load every file that parses; the rest are reported, not fatal.
    /// Returns the index of the first newly loaded route and the errors.
    fn add_many<'f>(
        &mut self,
        files: impl IntoIterator<Item = (&'f str, &'f [u8])>,
    ) -> (usize, Vec<String>) {
        let first_new = self.routes.len();
        let mut errors = Vec::new();
        for (name, bytes) in files {
            if let Err(err) = self.add_bytes(name, bytes) {
                errors.push(format!("{}: {}", name, err));
            }
        }
        (first_new, errors)
    }

    fn remove_route(&mut self, id: &str) -> bool {
        let before = self.routes.len();
        self.routes.retain(|r| r.id != id);
        self.selected.retain(|s| s != id);
        if self.reference_id.as_deref() == Some(id) {
            self.reference_id = self.routes.first().map(|r| r.id.clone());
        }
        self.routes.len() != before
    }

    fn route_mut(&mut self, id: &str) -> Result<&mut RouteData, RouteError> {
        self.routes
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| RouteError::InvalidParameter(format!("unknown route {}", id)))
    }

    fn recolor(&mut self, id: &str, color: &str) -> Result<(), RouteError> {
        self.route_mut(id)?.color = color.to_string();
        Ok(())
    }

    fn rename(&mut self, id: &str, name: &str) -> Result<(), RouteError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RouteError::InvalidParameter("display name cannot be empty".into()));
        }
        self.route_mut(id)?.display_name = name.to_string();
        Ok(())
    }

    fn select_route(&mut self, id: &str) -> Result<(), RouteError> {
        self.route_mut(id)?;
        if !self.selected.iter().any(|s| s == id) {
            self.selected.push(id.to_string());
        }
        Ok(())
    }

    fn deselect_route(&mut self, id: &str) {
        self.selected.retain(|s| s != id);
    }

    /// Returns whether the route is selected afterwards.
    fn toggle_route(&mut self, id: &str) -> Result<bool, RouteError> {
        if self.selected.iter().any(|s| s == id) {
            self.deselect_route(id);
            Ok(false)
        } else {
            self.select_route(id)?;
            Ok(true)
        }
    }

    fn selected_routes(&self) -> Vec<&RouteData> {
        self.selected
            .iter()
            .filter_map(|id| self.routes.iter().find(|r| &r.id == id))
            .collect()
    }

    fn selection_summary(&self) -> SelectionSummary {
        let selected = self.selected_routes();
        SelectionSummary {
            routes: selected.len(),
            avg_distance_km: mean(selected.iter().map(|r| r.stats.distance)),
            avg_duration_s: mean(selected.iter().filter_map(|r| r.stats.duration)),
            avg_elevation_gain_m: mean(selected.iter().map(|r| r.stats.elevation_gain)),
            avg_pace: mean(
                selected
                    .iter()
                    .flat_map(|r| r.paces.iter().flatten().copied())
                    .filter(|p| *p > 0.0 && *p < 20.0),
            ),
        }
    }

    fn select_reference(&mut self, id: &str) -> Result<(), RouteError> {
        if !self.routes.iter().any(|r| r.id == id) {
            return Err(RouteError::InvalidParameter(format!("unknown route {}", id)));
        }
        self.reference_id = Some(id.to_string());
        Ok(())
    }

    fn analyses(&self) -> Result<Vec<RouteAnalysis>, RouteError> {
        self.routes
            .iter()
            .map(|route| analyze_route(route, &self.params))
            .collect()
    }

    fn gaps(&self) -> Result<TimeGapResult, RouteError> {
        let reference_id = self
            .reference_id
            .as_deref()
            .ok_or_else(|| RouteError::InsufficientData("no routes loaded".into()))?;
        let reference = self
            .routes
            .iter()
            .find(|r| r.id == reference_id)
            .ok_or_else(|| {
                RouteError::InvalidParameter(format!("unknown route {}", reference_id))
            })?;
        let others: Vec<&RouteData> = self.routes.iter().filter(|r| r.id != reference_id).collect();
        if others.is_empty() {
            return Err(RouteError::InsufficientData(
                "load at least two routes to compare".into(),
            ));
        }
        calculate_time_gaps(reference, &others, self.params.gap_interval_km).ok_or_else(|| {
            RouteError::InsufficientData("routes need timestamps to compare times".into())
        })
    }
}

#[wasm_bindgen]
impl RouteSession {
    #[wasm_bindgen(constructor)]
    pub fn new() -> RouteSession {
        RouteSession::default()
    }

    /// Replace the analysis parameters. Already loaded routes keep the
    /// cleaning they were parsed with.
    pub fn set_params(&mut self, params: JsValue) -> Result<(), JsValue> {
        self.params = params_from_js(params)?;
        Ok(())
    }

    pub fn add_file(&mut self, name: &str, bytes: &[u8]) -> Result<JsValue, JsValue> {
        let route = self.add_bytes(name, bytes).map_err(js_err)?;
        to_js(&RouteSummary::from(route)).map_err(js_err)
    }

    /// `files` is an array of `{name, bytes}`. Files that fail to parse are
    /// listed under `errors` and the rest still load.
    pub fn add_files(&mut self, files: JsValue) -> Result<JsValue, JsValue> {
        let files: Vec<UploadedFile> = from_js(files).map_err(js_err)?;
        let (first_new, errors) = self.add_many(
            files
                .iter()
                .map(|f| (f.name.as_str(), f.bytes.as_slice())),
        );
        let loaded = self.routes[first_new..].iter().map(RouteSummary::from).collect();
        to_js(&BatchLoad { loaded, errors }).map_err(js_err)
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.remove_route(id)
    }

    pub fn clear(&mut self) {
        self.routes.clear();
        self.selected.clear();
        self.reference_id = None;
    }

    pub fn select(&mut self, id: &str) -> Result<(), JsValue> {
        self.select_route(id).map_err(js_err)
    }

    pub fn deselect(&mut self, id: &str) {
        self.deselect_route(id);
    }

    pub fn toggle(&mut self, id: &str) -> Result<bool, JsValue> {
        self.toggle_route(id).map_err(js_err)
    }

    pub fn select_all(&mut self) {
        self.selected = self.routes.iter().map(|r| r.id.clone()).collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    pub fn selected_ids(&self) -> Vec<String> {
        self.selected.clone()
    }

    /// Average distance, duration, climbing and pace of the selected routes.
    pub fn selection_stats(&self) -> Result<JsValue, JsValue> {
        to_js(&self.selection_summary()).map_err(js_err)
    }

    pub fn update_route_color(&mut self, id: &str, color: &str) -> Result<(), JsValue> {
        self.recolor(id, color).map_err(js_err)
    }

    pub fn update_route_display_name(&mut self, id: &str, name: &str) -> Result<(), JsValue> {
        self.rename(id, name).map_err(js_err)
    }

    pub fn set_reference(&mut self, id: &str) -> Result<(), JsValue> {
        self.select_reference(id).map_err(js_err)
    }

    pub fn reference(&self) -> Option<String> {
        self.reference_id.clone()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> Result<JsValue, JsValue> {
        to_js(&self.routes).map_err(js_err)
    }

    pub fn analyze(&self) -> Result<JsValue, JsValue> {
        let analyses = self.analyses().map_err(js_err)?;
        to_js(&analyses).map_err(js_err)
    }

    /// Time gaps of every other route against the reference.
    pub fn compare(&self) -> Result<JsValue, JsValue> {
        let gaps = self.gaps().map_err(js_err)?;
        to_js(&gaps).map_err(js_err)
    }

    pub fn map_bounds(&self) -> Result<JsValue, JsValue> {
        to_js(&calculate_map_bounds(&self.routes)).map_err(js_err)
    }
}

fn parse_sex(sex: &str) -> Result<Sex, JsValue> {
    sex.parse().map_err(js_err)
}

#[wasm_bindgen]
pub fn predict_race(
    known_km: f64,
    known_seconds: f64,
    target_km: f64,
    exponent: f64,
    sex: &str,
) -> Result<JsValue, JsValue> {
    let sex = parse_sex(sex)?;
    let prediction =
        predict_quick(known_km, known_seconds, target_km, exponent, sex).map_err(js_err)?;
    to_js(&prediction).map_err(js_err)
}

#[derive(Deserialize)]
struct AdvancedInput {
    race1: RaceResult,
    race2: RaceResult,
    athlete: Athlete,
}

/// `{ race1: {km, seconds}, race2: {km, seconds}, athlete: {age, weight_kg, height_cm, sex} }`
#[wasm_bindgen]
pub fn predict_race_advanced(input: JsValue) -> Result<JsValue, JsValue> {
    let input: AdvancedInput = from_js(input).map_err(js_err)?;
    let predictions = predict_advanced(input.race1, input.race2, &input.athlete).map_err(js_err)?;
    to_js(&predictions).map_err(js_err)
}

#[wasm_bindgen]
pub fn elevation_adjust(
    distance_km: f64,
    flat_seconds: f64,
    gain_m: f64,
    loss_m: f64,
    terrain_factor: f64,
) -> Result<JsValue, JsValue> {
    let adjusted = naismith_adjust(distance_km, flat_seconds, gain_m, loss_m, terrain_factor)
        .map_err(js_err)?;
    to_js(&adjusted).map_err(js_err)
}

/// `pace_seconds` is seconds per km; factors are 1.0 for road and mild weather.
#[wasm_bindgen]
pub fn nutrition(
    weight_kg: f64,
    distance_km: f64,
    pace_seconds: f64,
    terrain_factor: f64,
    temperature_factor: f64,
) -> Result<JsValue, JsValue> {
    let plan = nutrition_plan(
        weight_kg,
        distance_km,
        pace_seconds,
        terrain_factor,
        temperature_factor,
    )
    .map_err(js_err)?;
    to_js(&plan).map_err(js_err)
}

/// `test` is tagged by `method`: `race`, `cooper` or `heart_rate`.
#[wasm_bindgen]
pub fn vo2max(test: JsValue) -> Result<JsValue, JsValue> {
    let test: Vo2Test = from_js(test).map_err(js_err)?;
    to_js(&estimate_vo2max(test).map_err(js_err)?).map_err(js_err)
}

#[wasm_bindgen]
pub fn hr_zones(max_hr: u32, rest_hr: u32) -> Result<JsValue, JsValue> {
    to_js(&heart_rate_zones(max_hr, rest_hr).map_err(js_err)?).map_err(js_err)
}

#[wasm_bindgen]
pub fn threshold_pace_zones(threshold_seconds_per_km: f64) -> Result<JsValue, JsValue> {
    to_js(&pace_zones(threshold_seconds_per_km).map_err(js_err)?).map_err(js_err)
}

/// The factor table is passed as JSON text so the page can fetch it once.
#[wasm_bindgen]
pub fn age_grade(
    table_json: &str,
    sex: &str,
    event: &str,
    age: u32,
    seconds: f64,
) -> Result<JsValue, JsValue> {
    let table = AgeGradingTable::from_json_str(table_json).map_err(js_err)?;
    let grade = table
        .grade(parse_sex(sex)?, event, age, seconds)
        .map_err(js_err)?;
    to_js(&grade).map_err(js_err)
}

#[wasm_bindgen]
pub fn format_time(seconds: f64) -> String {
    format_time_from_seconds(seconds)
}

/// Seconds from `h:mm:ss`, `mm:ss` or plain seconds.
#[wasm_bindgen]
pub fn parse_time_string(input: &str) -> Result<f64, JsValue> {
    parse_time(input).map_err(js_err)
}
