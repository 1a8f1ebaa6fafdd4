// core/src/report.rs
use std::fmt::Write as _;

use crate::models::SessionSummary;

/// 330 → "5:30 /km". 0 betyr ukjent pace.
pub fn format_pace(pace_sec_per_km: u32) -> String {
    if pace_sec_per_km == 0 {
        return "--:-- /km".to_string();
    }
    format!("{}:{:02} /km", pace_sec_per_km / 60, pace_sec_per_km % 60)
}

/// ms → "m:ss", eller "h:mm:ss" fra én time og oppover.
pub fn format_duration(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

pub fn format_distance_km(meters: f64) -> String {
    format!("{:.2} km", meters.max(0.0) / 1000.0)
}

/// Tekstrapport for en ferdig økt.
pub fn session_report(summary: &SessionSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--- Session Report ---");
    let _ = writeln!(out, "Distance: {}", format_distance_km(summary.distance_meters));
    let _ = writeln!(out, "Time: {}", format_duration(summary.elapsed_ms));
    let _ = writeln!(out, "Avg pace: {}", format_pace(summary.average_pace_sec_per_km));
    let _ = writeln!(out, "Target pace: {}", format_pace(summary.target_pace_sec_per_km));
    let _ = writeln!(out, "Calories: {} kcal", crate::recorder::calories_for_distance(summary.distance_meters));
    let _ = writeln!(out, "Fixes: {}", summary.route.len());

    for seg in &summary.segments {
        let _ = writeln!(
            out,
            "  km {:>2}: {}  ({} → {})",
            seg.segment_index + 1,
            format_pace(seg.pace_sec_per_km),
            format_duration(seg.start_ms),
            format_duration(seg.end_ms)
        );
    }
    out
}
