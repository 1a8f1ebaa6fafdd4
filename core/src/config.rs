// core/src/config.rs
use std::path::Path;

use chrono::{FixedOffset, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{read_json_file, write_json_file, StoreResult};
use crate::models::RecordContext;
use crate::tracker::LocationRequest;

/// Innstillinger for en økt. Alle felt har default, så en delvis JSON-fil holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Forventet totaldistanse (m) brukt til progresjon
    pub expected_total_distance_m: f64,
    /// Hopp ≤ denne (m) regnes som GPS-støy
    pub jitter_threshold_m: f64,
    /// Hopp ≥ denne (m) regnes som teleport
    pub teleport_threshold_m: f64,
    pub segment_length_m: f64,
    pub location_interval_ms: u64,
    pub location_fastest_interval_ms: u64,
    pub location_min_distance_m: f64,
    /// Periode for klokke-tick mot presentasjonslaget
    pub clock_tick_ms: u64,
    /// Av: kadensen holdes på startverdien hele økten
    pub adaptive_cadence: bool,
    pub sample_rate: u32,
    pub tick_duration_ms: u32,
    pub volume: f32,
    /// None = lokal tidssone
    pub utc_offset_hours: Option<i32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            expected_total_distance_m: 5000.0,
            jitter_threshold_m: 1.0,
            teleport_threshold_m: 100.0,
            segment_length_m: 1000.0,
            location_interval_ms: 1000,
            location_fastest_interval_ms: 500,
            location_min_distance_m: 2.0,
            clock_tick_ms: 1000,
            adaptive_cadence: true,
            sample_rate: 44_100,
            tick_duration_ms: 80,
            volume: 0.7,
            utc_offset_hours: None,
        }
    }
}

impl TrackerConfig {
    pub fn location_request(&self) -> LocationRequest {
        LocationRequest {
            interval_ms: self.location_interval_ms,
            fastest_interval_ms: self.location_fastest_interval_ms,
            min_distance_m: self.location_min_distance_m,
        }
    }

    /// Kalenderkontekst for et tidspunkt i konfigurert tidssone.
    pub fn context_for(&self, ms: i64) -> RecordContext {
        let ctx = match self.utc_offset_hours.and_then(|h| h.checked_mul(3600)).and_then(FixedOffset::east_opt) {
            Some(tz) => RecordContext::from_timestamp_ms(ms, &tz),
            None => RecordContext::from_timestamp_ms(ms, &Local),
        };
        ctx.unwrap_or_default()
    }
}

/// Leser config fra disk (JSON). Mangler filen, returneres default.
pub fn load_config(path: impl AsRef<Path>) -> StoreResult<TrackerConfig> {
    let path = path.as_ref();
    if path.exists() {
        let cfg: TrackerConfig = read_json_file(path)?;
        info!("Config lastet fra {}", path.display());
        Ok(cfg)
    } else {
        warn!("Fant ikke config på {}, bruker default", path.display());
        Ok(TrackerConfig::default())
    }
}

pub fn save_config(cfg: &TrackerConfig, path: impl AsRef<Path>) -> StoreResult<()> {
    write_json_file(path.as_ref(), cfg)
}
