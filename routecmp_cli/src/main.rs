use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use fitparser::de::from_bytes;
use fitparser::profile::MesgNum;
use fitparser::Value as FitValue;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use rayon::prelude::*;
use routecmp::analysis::{calculate_time_gaps, RouteAnalysis, TimeGapResult};
use routecmp::calculators::{
    estimate_vo2max, format_time_from_seconds, heart_rate_zones, naismith_adjust, nutrition_plan,
    pace_zones, parse_time, predict_advanced, predict_quick, AgeGradingTable, Athlete, HrZone,
    PaceZone, RaceResult, Sex, Vo2Test,
};
use routecmp::format::{format_split_pace, format_time_delta, next_color};
use routecmp::gps::{calculate_map_bounds, MapBounds};
use routecmp::parse::{fit_value_to_f64, read_gpx_samples, RawSample};
use routecmp::{analyze_route, parse_route, AnalysisParams, RouteData};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "GPX/FIT route comparison CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse routes: stats, splits, best efforts, zones, steep sections
    Analyze(AnalyzeArgs),
    /// Time gaps of every route against a reference route
    Compare(CompareArgs),
    /// Report what a FIT/GPX file actually records
    Inspect(InspectArgs),
    /// Running calculators
    Calc(CalcArgs),
}

impl Command {
    fn verbose(&self) -> bool {
        match self {
            Command::Analyze(args) => args.common.verbose,
            Command::Compare(args) => args.common.verbose,
            Command::Inspect(args) => args.verbose,
            Command::Calc(args) => args.verbose,
        }
    }
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// JSON file with analysis parameters (missing keys keep defaults)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Skip the parsed-route cache under .cache/parsed_routes
    #[arg(long, action = ArgAction::SetTrue)]
    no_cache: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// FIT/GPX files to ingest
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output JSON report path (`-` for stdout)
    #[arg(short, long, default_value = "route_report.json", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Also write every route's splits as CSV
    #[arg(long, value_hint = ValueHint::FilePath)]
    splits_csv: Option<PathBuf>,

    /// Split length in km
    #[arg(long)]
    split_km: Option<f64>,

    /// Comma-separated best-effort distances in km, e.g. "1,5,10,21.1"
    #[arg(long)]
    efforts: Option<String>,

    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    /// FIT/GPX files to compare (at least two)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// 1-based position of the reference route among the inputs
    #[arg(short, long, default_value_t = 1)]
    reference: usize,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "time_gaps.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Sampling interval in km
    #[arg(long)]
    interval: Option<f64>,

    /// Gap chart as SVG
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Gap chart as PNG
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// FIT/GPX files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "route_inspect.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct CalcArgs {
    #[command(subcommand)]
    command: CalcCommand,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum CalcCommand {
    /// Race-time prediction from one race, or from two with --second-km
    Predict(PredictArgs),
    /// Hill-adjusted time for a course with climbing
    Elevation(ElevationArgs),
    /// VO2max estimate
    Vo2max(Vo2Args),
    /// Heart-rate reserve and/or threshold pace zones
    Zones(ZonesArgs),
    /// Age-graded performance from a factor table
    AgeGrade(AgeGradeArgs),
    /// Calories, carbohydrate, fluid and sodium for a steady-pace run
    Nutrition(NutritionArgs),
}

#[derive(Parser, Debug)]
struct PredictArgs {
    /// Known race distance in km
    #[arg(long)]
    distance_km: f64,

    /// Known race time (h:mm:ss, mm:ss or seconds)
    #[arg(long, value_parser = parse_time_arg)]
    time: f64,

    /// Target distance in km (single prediction)
    #[arg(long)]
    target_km: Option<f64>,

    /// Fatigue exponent for single predictions
    #[arg(long, default_value_t = 1.06)]
    exponent: f64,

    #[arg(long, default_value = "male")]
    sex: Sex,

    /// Second, longer race distance in km; switches to the two-race model
    #[arg(long, requires = "second_time")]
    second_km: Option<f64>,

    /// Second race time
    #[arg(long, value_parser = parse_time_arg)]
    second_time: Option<f64>,

    #[arg(long, default_value_t = 35)]
    age: u32,

    #[arg(long, default_value_t = 70.0)]
    weight_kg: f64,

    #[arg(long, default_value_t = 175.0)]
    height_cm: f64,
}

#[derive(Parser, Debug)]
struct ElevationArgs {
    #[arg(long)]
    distance_km: f64,

    /// Flat-course time
    #[arg(long, value_parser = parse_time_arg)]
    time: f64,

    /// Elevation gain in metres
    #[arg(long, default_value_t = 0.0)]
    gain: f64,

    /// Elevation loss in metres
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// 1.0 road, ~1.1 groomed trail, ~1.2 technical
    #[arg(long, default_value_t = 1.0)]
    terrain: f64,
}

#[derive(Parser, Debug)]
struct NutritionArgs {
    #[arg(long, default_value_t = 70.0)]
    weight_kg: f64,

    #[arg(long)]
    distance_km: f64,

    /// Expected pace per km (m:ss)
    #[arg(long, value_parser = parse_time_arg)]
    pace: f64,

    /// 1.0 road, 1.1 rolling, 1.2 moderate mountains, 1.3 steep mountains
    #[arg(long, default_value_t = 1.0)]
    terrain: f64,

    /// 0.9 cold up to 1.5 above 30 C
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Vo2Method {
    Race,
    Cooper,
    HeartRate,
}

#[derive(Parser, Debug)]
struct Vo2Args {
    #[arg(long, value_enum, default_value_t = Vo2Method::Race)]
    method: Vo2Method,

    /// Distance in metres (race and cooper methods)
    #[arg(long)]
    distance_m: Option<f64>,

    /// Race time, or 5 km time for the heart-rate method
    #[arg(long, value_parser = parse_time_arg)]
    time: Option<f64>,

    #[arg(long)]
    age: Option<u32>,

    #[arg(long)]
    max_hr: Option<f64>,

    #[arg(long)]
    rest_hr: Option<f64>,

    #[arg(long, default_value = "male")]
    sex: Sex,
}

#[derive(Parser, Debug)]
struct ZonesArgs {
    #[arg(long, requires = "rest_hr")]
    max_hr: Option<u32>,

    #[arg(long, requires = "max_hr")]
    rest_hr: Option<u32>,

    /// Threshold pace per km (m:ss)
    #[arg(long, value_parser = parse_time_arg)]
    threshold_pace: Option<f64>,
}

#[derive(Parser, Debug)]
struct AgeGradeArgs {
    /// JSON factor table: {sex: {event: {open_record, age_grading_factors}}}
    #[arg(long, value_hint = ValueHint::FilePath)]
    table: PathBuf,

    #[arg(long, default_value = "male")]
    sex: Sex,

    /// Event name as it appears in the table, e.g. "5000m" or "Marathon"
    #[arg(long)]
    event: String,

    #[arg(long)]
    age: u32,

    #[arg(long, value_parser = parse_time_arg)]
    time: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.command.verbose() {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Compare(args) => handle_compare(args),
        Command::Inspect(args) => handle_inspect(args),
        Command::Calc(args) => handle_calc(args),
    }
}

fn parse_time_arg(input: &str) -> Result<f64, String> {
    parse_time(input).map_err(|e| e.to_string())
}

fn parse_km_list(input: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed
            .parse()
            .with_context(|| format!("invalid distance '{}': expected km", trimmed))?;
        if !(value > 0.0) {
            return Err(anyhow!("distance tokens must be > 0"));
        }
        out.push(value);
    }
    Ok(out)
}

fn load_params(path: Option<&Path>) -> Result<AnalysisParams> {
    let Some(path) = path else {
        return Ok(AnalysisParams::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let params: AnalysisParams = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid analysis config", path.display()))?;
    debug!("Loaded config {}: {:?}", path.display(), params);
    Ok(params)
}

/// Parse every input in parallel, reusing cached routes when the file and
/// the parameters are unchanged. Output order follows input order.
fn load_routes(
    inputs: &[PathBuf],
    params: &AnalysisParams,
    opts: &CommonOpts,
) -> Result<Vec<RouteData>> {
    if inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }

    let mut colors: Vec<&'static str> = Vec::with_capacity(inputs.len());
    for _ in inputs {
        let color = next_color(&colors);
        colors.push(color);
    }

    let cache_dir = PathBuf::from(".cache").join("parsed_routes");
    if !opts.no_cache {
        let _ = fs::create_dir_all(&cache_dir);
    }
    let params_tag = serde_json::to_string(params)?;

    let t_parse = Instant::now();
    let jobs: Vec<(usize, &PathBuf)> = inputs.iter().enumerate().collect();
    let mut routes: Vec<(usize, RouteData)> = jobs
        .par_iter()
        .map(|(idx, path)| -> Result<(usize, RouteData)> {
            let color = colors[*idx];
            let key = if opts.no_cache {
                None
            } else {
                Some(cache_key(path, &params_tag)?)
            };
            if let Some(key) = key.as_deref() {
                if let Some(mut cached) = read_cache(&cache_dir, key) {
                    debug!("Cache hit: {}", path.display());
                    cached.color = color.to_string();
                    return Ok((*idx, cached));
                }
            }

            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let route = parse_route(&data, &filename, color, params)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            if let Some(key) = key.as_deref() {
                if let Err(err) = write_cache(&cache_dir, key, &route) {
                    debug!("Cache write skipped: {}", err);
                }
            }
            Ok((*idx, route))
        })
        .collect::<Result<Vec<_>>>()?;

    routes.sort_by_key(|(idx, _)| *idx);
    if opts.profile || opts.verbose {
        info!(
            "Parse stage: {:.1} ms ({} files)",
            t_parse.elapsed().as_secs_f64() * 1000.0,
            routes.len()
        );
    }
    let mut routes: Vec<RouteData> = routes.into_iter().map(|(_, r)| r).collect();
    disambiguate_ids(&mut routes);
    Ok(routes)
}

/// Identical files hash to the same id; suffix repeats with their input position.
fn disambiguate_ids(routes: &mut [RouteData]) {
    let mut seen = HashSet::with_capacity(routes.len());
    for (idx, route) in routes.iter_mut().enumerate() {
        if !seen.insert(route.id.clone()) {
            let unique = format!("{}_{}", route.id, idx + 1);
            debug!("Duplicate route id {} renamed to {}", route.id, unique);
            route.id = unique;
            seen.insert(route.id.clone());
        }
    }
}

fn cache_key(path: &Path, params_tag: &str) -> Result<String> {
    use std::time::SystemTime;
    let meta = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    let size = meta.len();
    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let dur = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let mtime = (dur.as_secs(), dur.subsec_nanos());

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    size.hash(&mut hasher);
    mtime.hash(&mut hasher);
    params_tag.hash(&mut hasher);
    env!("CARGO_PKG_VERSION").hash(&mut hasher);
    Ok(format!("{:016x}", hasher.finish()))
}

fn read_cache(dir: &Path, key: &str) -> Option<RouteData> {
    let path = dir.join(format!("{}.json", key));
    let text = fs::read_to_string(&path).ok()?;
    serde_json::from_str(&text).ok()
}

fn write_cache(dir: &Path, key: &str, route: &RouteData) -> Result<()> {
    let path = dir.join(format!("{}.json", key));
    let text = serde_json::to_string(route)?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if is_stdout(path) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        serde_json::to_writer_pretty(&mut handle, value)?;
        writeln!(handle)?;
        return Ok(());
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Serialize)]
struct AnalyzeReport<'a> {
    version: &'static str,
    params: &'a AnalysisParams,
    map_bounds: Option<MapBounds>,
    routes: &'a [RouteAnalysis],
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let mut params = load_params(args.common.config.as_deref())?;
    if let Some(km) = args.split_km {
        params.split_km = km;
    }
    if let Some(list) = args.efforts.as_deref() {
        let efforts = parse_km_list(list)?;
        if efforts.is_empty() {
            return Err(anyhow!("--efforts list was empty"));
        }
        params.best_effort_km = efforts;
    }
    params.validate()?;

    let routes = load_routes(&args.inputs, &params, &args.common)?;

    let t_analyze = Instant::now();
    let analyses = routes
        .par_iter()
        .map(|route| analyze_route(route, &params))
        .collect::<Result<Vec<_>, _>>()?;
    if args.common.profile || args.common.verbose {
        info!(
            "Analysis stage: {:.1} ms",
            t_analyze.elapsed().as_secs_f64() * 1000.0
        );
    }

    for analysis in &analyses {
        info!(
            "{}: {:.2} km, {} splits, {} best efforts, effort {} ({})",
            analysis.display_name,
            analysis.stats.distance,
            analysis.splits.len(),
            analysis.best_efforts.len(),
            analysis.effort.score,
            analysis.effort.category
        );
    }

    let report = AnalyzeReport {
        version: env!("CARGO_PKG_VERSION"),
        params: &params,
        map_bounds: calculate_map_bounds(&routes),
        routes: &analyses,
    };
    write_json(&report, &args.output)?;
    if !is_stdout(&args.output) {
        info!("Wrote report: {}", args.output.display());
    }

    if let Some(path) = args.splits_csv.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_split_rows(&analyses, &mut writer)?;
        info!("Wrote splits CSV: {}", path.display());
    }
    Ok(())
}

fn opt_cell(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

fn write_split_rows<W: Write>(
    analyses: &[RouteAnalysis],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "route_id",
        "route",
        "split",
        "start_km",
        "end_km",
        "distance_km",
        "partial",
        "duration_s",
        "pace_min_per_km",
        "pace",
        "elev_gain_m",
        "avg_hr",
    ])?;
    for analysis in analyses {
        for split in &analysis.splits {
            writer.write_record([
                analysis.route_id.clone(),
                analysis.display_name.clone(),
                split.number.to_string(),
                format!("{:.3}", split.start_km),
                format!("{:.3}", split.end_km),
                format!("{:.3}", split.distance),
                split.is_partial.to_string(),
                opt_cell(split.duration, 1),
                opt_cell(split.pace, 3),
                format_split_pace(split.pace),
                format!("{:.1}", split.elev_gain),
                opt_cell(split.avg_hr, 0),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn handle_compare(args: CompareArgs) -> Result<()> {
    if args.inputs.len() < 2 {
        bail!("compare needs at least two routes");
    }
    if args.reference == 0 || args.reference > args.inputs.len() {
        bail!(
            "--reference must be between 1 and {} (got {})",
            args.inputs.len(),
            args.reference
        );
    }
    let mut params = load_params(args.common.config.as_deref())?;
    if let Some(interval) = args.interval {
        params.gap_interval_km = interval;
    }
    params.validate()?;

    let routes = load_routes(&args.inputs, &params, &args.common)?;
    let ref_idx = args.reference - 1;
    let reference = &routes[ref_idx];
    let others: Vec<&RouteData> = routes
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != ref_idx)
        .map(|(_, r)| r)
        .collect();

    let t_gaps = Instant::now();
    let gaps = calculate_time_gaps(reference, &others, params.gap_interval_km).ok_or_else(|| {
        anyhow!("time gaps need timestamps on the reference and at least one other route")
    })?;
    if args.common.profile || args.common.verbose {
        info!(
            "Gap stage: {:.1} ms ({} samples)",
            t_gaps.elapsed().as_secs_f64() * 1000.0,
            gaps.gaps.len()
        );
    }
    log_final_gaps(&gaps, &others);

    if is_stdout(&args.output) {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_gap_rows(&gaps, &others, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_gap_rows(&gaps, &others, &mut writer)?;
        info!("Wrote time-gap CSV: {}", args.output.display());
    }

    let series = gap_series(&gaps, &others);
    let title = format!("Time gap vs {}", reference.display_name);
    for (path, kind) in [
        (args.svg.as_ref(), ChartKind::Svg),
        (args.png.as_ref(), ChartKind::Png),
    ] {
        let Some(path) = path else {
            continue;
        };
        let t_plot = Instant::now();
        match render_chart_guard(&series, &title, path, kind) {
            Err(err) => warn!("Skipping {} render ({}): {}", kind.label(), path.display(), err),
            Ok(()) => info!("Wrote chart: {}", path.display()),
        }
        if args.common.profile || args.common.verbose {
            info!(
                "Plot stage: {:.1} ms",
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    Ok(())
}

fn log_final_gaps(gaps: &TimeGapResult, others: &[&RouteData]) {
    let Some(last) = gaps.gaps.last() else {
        warn!("No overlapping distance to compare");
        return;
    };
    for route in others {
        if let Some(cmp) = last.comparisons.iter().find(|c| c.route_id == route.id) {
            info!(
                "{}: {} at {:.2} km",
                route.display_name,
                format_time_delta(Some(cmp.gap)),
                last.distance
            );
        }
    }
}

fn write_gap_rows<W: Write>(
    gaps: &TimeGapResult,
    others: &[&RouteData],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header = vec!["distance_km".to_string(), "reference_time_s".to_string()];
    for route in others {
        header.push(format!("{}_time_s", route.display_name));
        header.push(format!("{}_gap_s", route.display_name));
        header.push(format!("{}_gap", route.display_name));
    }
    writer.write_record(&header)?;

    for point in &gaps.gaps {
        let mut row = vec![
            format!("{:.3}", point.distance),
            format!("{:.1}", point.reference_time),
        ];
        for route in others {
            match point.comparisons.iter().find(|c| c.route_id == route.id) {
                Some(cmp) => {
                    row.push(format!("{:.1}", cmp.time));
                    row.push(format!("{:.1}", cmp.gap));
                    row.push(format_time_delta(Some(cmp.gap)));
                }
                None => row.extend([String::new(), String::new(), String::new()]),
            }
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Debug)]
struct GapSeries {
    label: String,
    color: RGBColor,
    points: Vec<(f64, f64)>,
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn label(self) -> &'static str {
        match self {
            ChartKind::Png => "PNG",
            ChartKind::Svg => "SVG",
        }
    }
}

fn hex_to_rgb(hex: &str) -> RGBColor {
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
    };
    match (channel(1), channel(3), channel(5)) {
        (Some(r), Some(g), Some(b)) if hex.starts_with('#') => RGBColor(r, g, b),
        _ => RGBColor(90, 90, 90),
    }
}

fn gap_series(gaps: &TimeGapResult, others: &[&RouteData]) -> Vec<GapSeries> {
    others
        .iter()
        .map(|route| GapSeries {
            label: route.display_name.clone(),
            color: hex_to_rgb(&route.color),
            points: gaps
                .gaps
                .iter()
                .filter_map(|p| {
                    p.comparisons
                        .iter()
                        .find(|c| c.route_id == route.id)
                        .map(|c| (p.distance, c.gap))
                })
                .collect(),
        })
        .filter(|s| !s.points.is_empty())
        .collect()
}

fn render_chart_guard(
    series: &[GapSeries],
    title: &str,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_gap_chart(series, title, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_gap_chart(
    series: &[GapSeries],
    title: &str,
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    if series.is_empty() {
        return Err(anyhow!("no gap samples to plot"));
    }
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 760)).into_drawing_area();
            draw_gap_chart(root, series, title)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 760)).into_drawing_area();
            draw_gap_chart(root, series, title)
        }
    }
}

fn draw_gap_chart<DB>(
    area: DrawingArea<DB, plotters::coord::Shift>,
    series: &[GapSeries],
    title: &str,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let all = series.iter().flat_map(|s| s.points.iter());
    let x_max = all.clone().map(|p| p.0).fold(0.0_f64, f64::max).max(0.1);
    let mut y_min = all.clone().map(|p| p.1).fold(0.0_f64, f64::min);
    let mut y_max = all.map(|p| p.1).fold(0.0_f64, f64::max);
    let pad = ((y_max - y_min) * 0.1).max(1.0);
    y_min -= pad;
    y_max += pad;

    area.fill(&WHITE)?;
    let title_font = FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal);
    let mut chart = ChartBuilder::on(&area)
        .caption(title, title_font.color(&BLACK))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc("Distance (km)")
        .y_desc("Gap (s, + = behind)")
        .x_label_formatter(&|v| format!("{:.1}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    chart.draw_series(LineSeries::new(
        [(0.0, 0.0), (x_max, 0.0)],
        &BLACK.mix(0.4),
    ))?;

    for s in series {
        let color = s.color;
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(s.points.iter().copied(), style))?
            .label(s.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    let legend_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}

#[derive(Default, Clone)]
struct KeyStats {
    count: usize,
    numeric: usize,
    min: Option<f64>,
    max: Option<f64>,
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or("n/a".into(), |v| format!("{:.3}", v))
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let mut report = String::new();

    for path in &args.inputs {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        report.push_str(&format!("FILE: {}\n", path.display()));
        match ext.as_str() {
            "fit" => inspect_fit(&data, &mut report)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            "gpx" => inspect_gpx(&data, &mut report)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            other => report.push_str(&format!("  unsupported extension: '{}'\n", other)),
        }
        report.push('\n');
    }

    if is_stdout(&args.output) {
        print!("{}", report);
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Inspection report written: {}", args.output.display());
    }
    Ok(())
}

fn inspect_fit(data: &[u8], report: &mut String) -> Result<()> {
    let fit = from_bytes(data)?;

    let mut stats: BTreeMap<String, KeyStats> = BTreeMap::new();
    let mut records = 0usize;
    let mut positioned = 0usize;
    let mut first_time: Option<f64> = None;
    let mut last_time: Option<f64> = None;

    for message in fit {
        if message.kind() != MesgNum::Record {
            continue;
        }
        records += 1;
        let mut has_lat = false;
        let mut has_lng = false;
        for field in message.fields() {
            let name = field.name().to_string();
            let entry = stats.entry(name.clone()).or_default();
            entry.count += 1;
            if let Some(val) = fit_value_to_f64(field.value()) {
                entry.numeric += 1;
                entry.min = Some(entry.min.map_or(val, |m| m.min(val)));
                entry.max = Some(entry.max.map_or(val, |m| m.max(val)));
                has_lat |= name == "position_lat" && val != 0.0;
                has_lng |= name == "position_long" && val != 0.0;
            }

            if name == "timestamp" {
                if let FitValue::Timestamp(ts) = field.value() {
                    let utc = ts.with_timezone(&Utc);
                    let seconds = utc.timestamp() as f64
                        + (utc.timestamp_subsec_micros() as f64 / 1_000_000.0);
                    first_time.get_or_insert(seconds);
                    last_time = Some(seconds);
                }
            }
        }
        if has_lat && has_lng {
            positioned += 1;
        }
    }

    report.push_str("  format: FIT\n");
    report.push_str(&format!("  records: {}\n", records));
    report.push_str(&format!("  records_with_position: {}\n", positioned));
    if let (Some(start), Some(end)) = (first_time, last_time) {
        report.push_str(&format!(
            "  timespan: {}\n",
            format_time_from_seconds(end - start)
        ));
    }

    if !stats.is_empty() {
        report.push_str("  keys:\n");
        let mut entries: Vec<_> = stats.into_iter().collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count));
        for (name, summary) in entries.into_iter().take(25) {
            report.push_str(&format!(
                "    - {}: count={}, numeric={}, min={}, max={}\n",
                name,
                summary.count,
                summary.numeric,
                fmt_opt(summary.min),
                fmt_opt(summary.max)
            ));
        }
    }
    Ok(())
}

fn inspect_gpx(data: &[u8], report: &mut String) -> Result<()> {
    let gpx = gpx::read(io::Cursor::new(data)).map_err(|e| anyhow!("{}", e))?;
    let segments: usize = gpx.tracks.iter().map(|t| t.segments.len()).sum();
    let track_points: usize = gpx
        .tracks
        .iter()
        .flat_map(|t| t.segments.iter())
        .map(|s| s.points.len())
        .sum();
    let route_points: usize = gpx.routes.iter().map(|r| r.points.len()).sum();

    report.push_str("  format: GPX\n");
    report.push_str(&format!(
        "  tracks: {}, segments: {}, track_points: {}\n",
        gpx.tracks.len(),
        segments,
        track_points
    ));
    report.push_str(&format!(
        "  routes: {}, route_points: {}, waypoints: {}\n",
        gpx.routes.len(),
        route_points,
        gpx.waypoints.len()
    ));

    let raw = read_gpx_samples(data)?;
    let count = |f: &dyn Fn(&RawSample) -> bool| raw.samples.iter().filter(|&s| f(s)).count();
    report.push_str(&format!(
        "  samples: {} (time={}, elevation={}, heart_rate={}, cadence={}, power={})\n",
        raw.samples.len(),
        count(&|s| s.timestamp.is_some()),
        count(&|s| s.elevation.is_some()),
        count(&|s| s.heart_rate.is_some()),
        count(&|s| s.cadence.is_some()),
        count(&|s| s.power.is_some()),
    ));
    let mut times = raw.samples.iter().filter_map(|s| s.timestamp);
    if let Some(first) = times.next() {
        let last = times.last().unwrap_or(first);
        let span = (last - first).num_milliseconds() as f64 / 1000.0;
        report.push_str(&format!("  timespan: {}\n", format_time_from_seconds(span)));
    }
    Ok(())
}

#[derive(Serialize)]
struct ZonesReport {
    heart_rate: Option<Vec<HrZone>>,
    pace: Option<Vec<PaceZone>>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    write_json(value, Path::new("-"))
}

fn handle_calc(args: CalcArgs) -> Result<()> {
    match args.command {
        CalcCommand::Predict(p) => {
            if let Some(second_km) = p.second_km {
                let second_time = p
                    .second_time
                    .ok_or_else(|| anyhow!("--second-km needs --second-time"))?;
                let athlete = Athlete {
                    age: p.age,
                    weight_kg: p.weight_kg,
                    height_cm: p.height_cm,
                    sex: p.sex,
                };
                let predictions = predict_advanced(
                    RaceResult { km: p.distance_km, seconds: p.time },
                    RaceResult { km: second_km, seconds: second_time },
                    &athlete,
                )?;
                print_json(&predictions)
            } else {
                let target = p
                    .target_km
                    .ok_or_else(|| anyhow!("--target-km is required without --second-km"))?;
                let prediction = predict_quick(p.distance_km, p.time, target, p.exponent, p.sex)?;
                print_json(&prediction)
            }
        }
        CalcCommand::Elevation(e) => {
            let adjusted = naismith_adjust(e.distance_km, e.time, e.gain, e.loss, e.terrain)?;
            print_json(&adjusted)
        }
        CalcCommand::Vo2max(v) => {
            let method = v
                .method
                .to_possible_value()
                .map(|p| p.get_name().to_string())
                .unwrap_or_default();
            let missing = |flag: &str| anyhow!("--method {} needs --{}", method, flag);
            let test = match v.method {
                Vo2Method::Race => Vo2Test::Race {
                    distance_m: v.distance_m.ok_or_else(|| missing("distance-m"))?,
                    seconds: v.time.ok_or_else(|| missing("time"))?,
                },
                Vo2Method::Cooper => Vo2Test::Cooper {
                    distance_m: v.distance_m.ok_or_else(|| missing("distance-m"))?,
                },
                Vo2Method::HeartRate => Vo2Test::HeartRate {
                    age: v.age.ok_or_else(|| missing("age"))?,
                    max_hr: v.max_hr.ok_or_else(|| missing("max-hr"))?,
                    rest_hr: v.rest_hr.ok_or_else(|| missing("rest-hr"))?,
                    five_k_seconds: v.time.ok_or_else(|| missing("time"))?,
                    sex: v.sex,
                },
            };
            print_json(&estimate_vo2max(test)?)
        }
        CalcCommand::Zones(z) => {
            if z.max_hr.is_none() && z.threshold_pace.is_none() {
                bail!("give --max-hr/--rest-hr, --threshold-pace, or both");
            }
            let heart_rate = match (z.max_hr, z.rest_hr) {
                (Some(max), Some(rest)) => Some(heart_rate_zones(max, rest)?),
                _ => None,
            };
            let pace = z.threshold_pace.map(pace_zones).transpose()?;
            print_json(&ZonesReport { heart_rate, pace })
        }
        CalcCommand::AgeGrade(a) => {
            let table = AgeGradingTable::load_from_path(&a.table)?;
            let grade = table.grade(a.sex, &a.event, a.age, a.time)?;
            info!(
                "{} at age {}: {:.2}% ({})",
                grade.event, grade.age, grade.percentage, grade.classification
            );
            print_json(&grade)
        }
        CalcCommand::Nutrition(n) => {
            let plan =
                nutrition_plan(n.weight_kg, n.distance_km, n.pace, n.terrain, n.temperature)?;
            info!(
                "{:.1} h at {:.1} km/h: {:.0} kcal, {:.1} gels/h",
                plan.total_hours, plan.speed_kmh, plan.total_calories, plan.gels_per_hour
            );
            print_json(&plan)
        }
    }
}
