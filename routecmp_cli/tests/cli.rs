use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn routecmp() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("routecmp"))
}

/// Straight 1 km track: 101 points 10 m apart, `step_s` seconds each.
fn write_track(dir: &Path, name: &str, step_s: u32) {
    let step = (0.01_f64 / 6371.0).to_degrees();
    let mut body = String::new();
    for i in 0..101u32 {
        let secs = i * step_s;
        body.push_str(&format!(
            "<trkpt lat=\"{:.8}\" lon=\"7.0\"><ele>{}</ele>\
             <time>2024-03-09T09:{:02}:{:02}Z</time></trkpt>\n",
            46.0 + step * f64::from(i),
            400 + i / 5,
            secs / 60,
            secs % 60
        ));
    }
    let xml = format!(
        "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\" creator=\"cli tests\" \
         xmlns=\"http://www.topografix.com/GPX/1/1\"><trk><trkseg>\n{body}</trkseg></trk></gpx>\n"
    );
    fs::write(dir.join(name), xml).expect("write gpx");
}

#[test]
fn analyze_writes_json_report_to_stdout() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "hill_repeat.gpx", 3);

    let assert = routecmp()
        .current_dir(tmp.path())
        .args(["analyze", "hill_repeat.gpx", "-o", "-", "--no-cache"])
        .assert()
        .success();

    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json report");
    let routes = report["routes"].as_array().expect("routes");
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0]["display_name"], "hill repeat");
    assert!(!routes[0]["splits"].as_array().expect("splits").is_empty());
    assert!(report["map_bounds"].is_object());
    assert!(!tmp.path().join(".cache").exists());
}

#[test]
fn analyze_populates_parse_cache() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "easy.gpx", 4);

    for _ in 0..2 {
        routecmp()
            .current_dir(tmp.path())
            .args(["analyze", "easy.gpx", "--splits-csv", "splits.csv"])
            .assert()
            .success();
    }

    let cached = fs::read_dir(tmp.path().join(".cache/parsed_routes"))
        .expect("cache dir")
        .count();
    assert_eq!(cached, 1);
    assert!(tmp.path().join("route_report.json").exists());
    let splits = fs::read_to_string(tmp.path().join("splits.csv")).expect("splits csv");
    assert!(splits.lines().count() >= 2);
}

#[test]
fn compare_writes_gap_csv() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "fast.gpx", 3);
    write_track(tmp.path(), "slow.gpx", 4);

    routecmp()
        .current_dir(tmp.path())
        .args(["compare", "fast.gpx", "slow.gpx", "-o", "gaps.csv", "--no-cache"])
        .assert()
        .success();

    let csv = fs::read_to_string(tmp.path().join("gaps.csv")).expect("gap csv");
    let mut lines = csv.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("distance_km,reference_time_s,slow_time_s"));
    let last = lines.last().expect("rows");
    assert!(last.contains("+1:"), "final row {last}");
}

#[test]
fn identical_files_keep_separate_ids() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "monday.gpx", 3);
    write_track(tmp.path(), "tuesday.gpx", 3);
    write_track(tmp.path(), "wednesday.gpx", 3);

    let assert = routecmp()
        .current_dir(tmp.path())
        .args(["analyze", "monday.gpx", "tuesday.gpx", "wednesday.gpx"])
        .args(["-o", "-", "--no-cache"])
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json report");
    let ids: Vec<&str> = report["routes"]
        .as_array()
        .expect("routes")
        .iter()
        .map(|r| r["route_id"].as_str().expect("route id"))
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[1], format!("{}_2", ids[0]));
    assert_eq!(ids[2], format!("{}_3", ids[0]));

    routecmp()
        .current_dir(tmp.path())
        .args(["compare", "monday.gpx", "tuesday.gpx", "wednesday.gpx"])
        .args(["-o", "gaps.csv", "--no-cache"])
        .assert()
        .success();
    let csv = fs::read_to_string(tmp.path().join("gaps.csv")).expect("gap csv");
    let last = csv.lines().last().expect("rows");
    let cells: Vec<&str> = last.split(',').collect();
    // distance, reference time, then time/gap/label per comparison route
    assert_eq!(cells.len(), 8, "row {last}");
    assert_eq!(cells[3], "0.0");
    assert_eq!(cells[6], "0.0");
}

#[test]
fn compare_needs_two_routes() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "solo.gpx", 3);

    routecmp()
        .current_dir(tmp.path())
        .args(["compare", "solo.gpx", "--no-cache"])
        .assert()
        .failure()
        .stderr(contains("at least two routes"));
}

#[test]
fn unsupported_extension_is_reported() {
    let tmp = TempDir::new().expect("tmp dir");
    fs::write(tmp.path().join("ride.tcx"), "<TrainingCenterDatabase/>").expect("write");

    routecmp()
        .current_dir(tmp.path())
        .args(["analyze", "ride.tcx", "-o", "-", "--no-cache"])
        .assert()
        .failure()
        .stderr(contains("tcx"));
}

#[test]
fn calc_predict_prints_json() {
    let assert = routecmp()
        .args([
            "calc",
            "predict",
            "--distance-km",
            "10",
            "--time",
            "50:00",
            "--target-km",
            "21.0975",
        ])
        .assert()
        .success();

    let prediction: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(prediction["distance"], "Half Marathon");
    let seconds = prediction["seconds"].as_f64().expect("seconds");
    assert!(seconds > 6300.0 && seconds < 6700.0, "{seconds}");
}

#[test]
fn calc_age_grade_reads_table() {
    let tmp = TempDir::new().expect("tmp dir");
    let table = tmp.path().join("factors.json");
    fs::write(
        &table,
        r#"{"male": {"5000m": {"open_record": 755.0, "age_grading_factors": {"40": 0.95}}}}"#,
    )
    .expect("write table");

    routecmp()
        .args(["calc", "age-grade", "--sex", "male", "--event", "5000m"])
        .args(["--age", "40", "--time", "20:00"])
        .arg("--table")
        .arg(&table)
        .assert()
        .success()
        .stdout(contains("\"classification\""));

    routecmp()
        .args(["calc", "age-grade", "--sex", "male", "--event", "5000m"])
        .args(["--age", "41", "--time", "20:00"])
        .arg("--table")
        .arg(&table)
        .assert()
        .failure()
        .stderr(contains("no factor for age 41"));
}

#[test]
fn calc_vo2max_names_missing_flag() {
    routecmp()
        .args(["calc", "vo2max", "--method", "heart-rate", "--age", "40"])
        .assert()
        .failure()
        .stderr(contains("--method heart-rate needs --max-hr"));
}

#[test]
fn calc_nutrition_plans_marathon_fuel() {
    let assert = routecmp()
        .args(["calc", "nutrition", "--distance-km", "42.195", "--pace", "5:30"])
        .args(["--temperature", "1.15"])
        .assert()
        .success();

    let plan: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(plan["carbs_per_hour"], 70.0);
    assert_eq!(plan["fluid_ml_per_hour"], 690.0);
    assert_eq!(plan["gels_per_hour"], 2.8);
    let kcal = plan["calories_per_hour"].as_f64().expect("kcal");
    assert_eq!(kcal, 878.0);
}

#[test]
fn inspect_counts_gpx_samples() {
    let tmp = TempDir::new().expect("tmp dir");
    write_track(tmp.path(), "loop.gpx", 5);

    routecmp()
        .current_dir(tmp.path())
        .args(["inspect", "loop.gpx", "-o", "-"])
        .assert()
        .success()
        .stdout(contains("format: GPX"))
        .stdout(contains("track_points: 101"))
        .stdout(contains("samples: 101 (time=101, elevation=101, heart_rate=0"));
}
