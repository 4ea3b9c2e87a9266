//! Display strings and the route colour palette.

/// Palette handed out to routes in load order.
pub const ROUTE_COLORS: [&str; 20] = [
    "#EA4335", "#4285F4", "#FBBC04", "#34A853", "#FF6D00", "#46BDC6", "#7B1FA2", "#C2185B",
    "#00BCD4", "#8BC34A", "#FF5722", "#9C27B0", "#03A9F4", "#FFEB3B", "#E91E63", "#00ACC1",
    "#7CB342", "#F57C00", "#5E35B1", "#D81B60",
];

const GREEN: &str = "#34A853";
const YELLOW: &str = "#FBBC04";
const RED: &str = "#EA4335";
const NA: &str = "N/A";

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// `m:ss` from whole seconds, carrying a rounded 60 into the minutes.
fn min_sec(total_seconds: f64) -> String {
    let total = total_seconds.round() as i64;
    format!("{}:{:02}", total / 60, total % 60)
}

pub fn format_distance(km: f64) -> String {
    if km >= 1.0 {
        format!("{km:.2} km")
    } else {
        format!("{:.0} m", km * 1000.0)
    }
}

pub fn format_elevation(meters: f64) -> String {
    format!("{} m", meters.round())
}

/// `1h 5m`, `12m 3s` or `42s`.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = usable(seconds).filter(|s| *s != 0.0) else {
        return NA.to_string();
    };
    let hours = (seconds / 3600.0).floor();
    let mins = ((seconds % 3600.0) / 60.0).floor();
    let secs = (seconds % 60.0).round();
    if hours > 0.0 {
        format!("{hours}h {mins}m")
    } else if mins > 0.0 {
        format!("{mins}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub fn format_break_duration(seconds: Option<f64>) -> String {
    match usable(seconds).filter(|s| *s != 0.0) {
        None => NA.to_string(),
        Some(s) if s < 60.0 => format!("{} seconds", s.round()),
        Some(s) => min_sec(s),
    }
}

pub fn format_heart_rate(bpm: Option<f64>) -> String {
    match usable(bpm).filter(|b| *b != 0.0) {
        Some(b) => format!("{} bpm", b.round()),
        None => NA.to_string(),
    }
}

pub fn format_cadence(spm: Option<f64>) -> String {
    match usable(spm).filter(|s| *s != 0.0) {
        Some(s) => format!("{} spm", s.round()),
        None => NA.to_string(),
    }
}

/// Pace in min/km as `m:ss /km`; anything outside (0, 20] reads `N/A`.
pub fn format_pace(min_per_km: Option<f64>) -> String {
    match usable(min_per_km) {
        Some(p) if p > 0.0 && p <= 20.0 => format!("{} /km", min_sec(p * 60.0)),
        _ => NA.to_string(),
    }
}

/// Signed lead/lag: `+1:05`, `-12s`. Seconds are truncated.
pub fn format_time_delta(seconds: Option<f64>) -> String {
    let Some(seconds) = usable(seconds) else {
        return NA.to_string();
    };
    let sign = if seconds >= 0.0 { '+' } else { '-' };
    let abs = seconds.abs();
    let mins = (abs / 60.0).floor();
    let secs = (abs % 60.0).floor();
    if mins > 0.0 {
        format!("{sign}{mins}:{secs:02}")
    } else {
        format!("{sign}{secs}s")
    }
}

pub fn format_split_pace(pace: Option<f64>) -> String {
    match usable(pace) {
        Some(p) => min_sec(p * 60.0),
        None => NA.to_string(),
    }
}

pub fn format_split_elevation(meters: Option<f64>) -> String {
    match usable(meters) {
        Some(m) if m.round() >= 0.0 => format!("+{}m", m.round().abs()),
        Some(m) => format!("{}m", m.round()),
        None => NA.to_string(),
    }
}

pub fn format_split_hr(hr: Option<f64>) -> String {
    match usable(hr) {
        Some(h) => h.round().to_string(),
        None => NA.to_string(),
    }
}

pub fn format_split_time(seconds: Option<f64>) -> String {
    match usable(seconds) {
        Some(s) => min_sec(s),
        None => NA.to_string(),
    }
}

pub fn format_split_gap(seconds: Option<f64>) -> String {
    let Some(seconds) = usable(seconds) else {
        return "-".to_string();
    };
    let sign = if seconds >= 0.0 { '+' } else { '-' };
    let abs = seconds.abs();
    if abs.round() >= 60.0 {
        format!("{sign}{}", min_sec(abs))
    } else {
        format!("{sign}{}s", abs.round())
    }
}

pub fn format_segment_duration(seconds: Option<f64>) -> String {
    format_split_time(seconds)
}

/// Label for a best-effort distance: `400m`, `5km`, `Half Marathon`.
pub fn distance_label(km: f64) -> String {
    if km == 21.1 || km == 21.0975 {
        "Half Marathon".to_string()
    } else if km == 42.195 || km == 42.2 {
        "Marathon".to_string()
    } else if km < 1.0 {
        format!("{}m", (km * 1000.0).round())
    } else {
        format!("{km}km")
    }
}

/// First palette colour not in `used`, cycling once all are taken.
pub fn next_color<S: AsRef<str>>(used: &[S]) -> &'static str {
    ROUTE_COLORS
        .iter()
        .find(|c| !used.iter().any(|u| u.as_ref().eq_ignore_ascii_case(c)))
        .copied()
        .unwrap_or(ROUTE_COLORS[used.len() % ROUTE_COLORS.len()])
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Linear blend of two `#rrggbb` colours. Malformed input returns `from`.
pub fn interpolate_color(from: &str, to: &str, factor: f64) -> String {
    let (Some(a), Some(b)) = (parse_hex(from), parse_hex(to)) else {
        return from.to_string();
    };
    let t = factor.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Green for the fastest pace in range, red for the slowest.
pub fn pace_color(pace: Option<f64>, min_pace: f64, max_pace: f64) -> String {
    let Some(pace) = usable(pace) else {
        return YELLOW.to_string();
    };
    let span = max_pace - min_pace;
    let normalized = if span > 0.0 {
        (pace.clamp(min_pace, max_pace) - min_pace) / span
    } else {
        0.0
    };
    if normalized <= 0.5 {
        interpolate_color(GREEN, YELLOW, normalized * 2.0)
    } else {
        interpolate_color(YELLOW, RED, (normalized - 0.5) * 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances_and_durations() {
        assert_eq!(format_distance(12.345), "12.35 km");
        assert_eq!(format_distance(0.4), "400 m");
        assert_eq!(format_elevation(123.6), "124 m");
        assert_eq!(format_duration(Some(3725.0)), "1h 2m");
        assert_eq!(format_duration(Some(125.0)), "2m 5s");
        assert_eq!(format_duration(Some(42.0)), "42s");
        assert_eq!(format_duration(None), "N/A");
        assert_eq!(format_break_duration(Some(30.4)), "30 seconds");
        assert_eq!(format_break_duration(Some(95.0)), "1:35");
    }

    #[test]
    fn paces_and_gaps() {
        assert_eq!(format_pace(Some(5.5)), "5:30 /km");
        assert_eq!(format_pace(Some(4.9999)), "5:00 /km");
        assert_eq!(format_pace(Some(25.0)), "N/A");
        assert_eq!(format_pace(Some(0.0)), "N/A");
        assert_eq!(format_time_delta(Some(65.9)), "+1:05");
        assert_eq!(format_time_delta(Some(-12.7)), "-12s");
        assert_eq!(format_split_gap(Some(-75.0)), "-1:15");
        assert_eq!(format_split_gap(Some(4.4)), "+4s");
        assert_eq!(format_split_gap(None), "-");
        assert_eq!(format_split_elevation(Some(12.4)), "+12m");
        assert_eq!(format_split_elevation(Some(-3.6)), "-4m");
        assert_eq!(format_split_hr(Some(151.5)), "152");
        assert_eq!(format_heart_rate(Some(0.0)), "N/A");
        assert_eq!(format_cadence(Some(171.2)), "171 spm");
    }

    #[test]
    fn labels() {
        assert_eq!(distance_label(21.1), "Half Marathon");
        assert_eq!(distance_label(42.195), "Marathon");
        assert_eq!(distance_label(0.4), "400m");
        assert_eq!(distance_label(5.0), "5km");
        assert_eq!(distance_label(2.5), "2.5km");
    }

    #[test]
    fn palette_and_gradients() {
        let none: [&str; 0] = [];
        assert_eq!(next_color(&none), "#EA4335");
        assert_eq!(next_color(&["#EA4335", "#4285F4"]), "#FBBC04");
        let all: Vec<String> = ROUTE_COLORS.iter().map(|c| c.to_string()).collect();
        assert_eq!(next_color(&all), ROUTE_COLORS[0]);

        assert_eq!(interpolate_color("#000000", "#ffffff", 0.5), "#808080");
        assert_eq!(pace_color(Some(4.0), 4.0, 6.0), "#34a853");
        assert_eq!(pace_color(Some(6.0), 4.0, 6.0), "#ea4335");
        assert_eq!(pace_color(Some(5.0), 4.0, 6.0), "#fbbc04");
        assert_eq!(pace_color(None, 4.0, 6.0), YELLOW);
    }
}
