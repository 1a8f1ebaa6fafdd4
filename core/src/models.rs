// core/src/models.rs
use chrono::{Datelike, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Én GPS-posisjon med tidsstempel (ms siden epoch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self { latitude, longitude, timestamp_ms }
    }

    /// Endelige koordinater innenfor ±90 / ±180.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

/// Øyeblikksbilde av økten slik presentasjonslaget ser den.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub is_running: bool,
    pub is_paused: bool,
    pub distance_meters: f64,
    pub elapsed_ms: i64,
    pub current_pace_sec_per_km: u32,
    pub target_pace_sec_per_km: u32,
    pub current_bpm: u32,
    /// Andel av forventet totaldistanse, [0, 1]
    pub progress: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            is_running: false,
            is_paused: false,
            distance_meters: 0.0,
            elapsed_ms: 0,
            current_pace_sec_per_km: 0,
            target_pace_sec_per_km: 390,
            current_bpm: 0,
            progress: 0.0,
        }
    }
}

/// Én fullført kilometer. start/end er aktiv økt-tid (ms, pauser trukket fra).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaceSegment {
    pub segment_index: u32,
    pub pace_sec_per_km: u32,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Måned 1..=12 → årstid (nordlig halvkule)
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Season::Spring => 0,
            Season::Summer => 1,
            Season::Autumn => 2,
            Season::Winter => 3,
        }
    }
}

/// Kalenderkontekst for en økt (brukes av kondisjonsmodellen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContext {
    /// 0 = søndag … 6 = lørdag
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub is_weekend: bool,
    pub season: Season,
}

impl RecordContext {
    pub fn from_timestamp_ms<Tz: TimeZone>(ms: i64, tz: &Tz) -> Option<Self> {
        let dt = tz.timestamp_millis_opt(ms).single()?;
        let day = dt.weekday().num_days_from_sunday() as u8;
        Some(Self {
            day_of_week: day,
            hour_of_day: dt.hour() as u8,
            is_weekend: day == 0 || day == 6,
            season: Season::from_month(dt.month()),
        })
    }

    /// Kontekst for "nå" i lokal tidssone.
    pub fn now() -> Self {
        let now = chrono::Local::now();
        Self::from_timestamp_ms(now.timestamp_millis(), &chrono::Local).unwrap_or_default()
    }

    /// 4-timers blokk, 0..=5
    pub fn hour_block(&self) -> usize {
        (self.hour_of_day as usize / 4).min(5)
    }
}

impl Default for RecordContext {
    fn default() -> Self {
        Self {
            day_of_week: 1,
            hour_of_day: 12,
            is_weekend: false,
            season: Season::Spring,
        }
    }
}

/// Det trackeren leverer når en økt stoppes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub distance_meters: f64,
    pub elapsed_ms: i64,
    pub average_pace_sec_per_km: u32,
    pub target_pace_sec_per_km: u32,
    pub route: Vec<LocationFix>,
    pub segments: Vec<PaceSegment>,
}

/// Lagret løpeøkt. Opprettes én gang og endres aldri etterpå.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningRecord {
    #[serde(default)]
    pub id: u64,
    pub start_time_ms: i64,
    pub end_time_ms: i64,
    pub total_distance_meters: f64,
    pub total_time_ms: i64,
    pub target_pace_sec_per_km: u32,
    pub average_pace_sec_per_km: u32,
    pub calories: u32,
    #[serde(default)]
    pub route: Vec<LocationFix>,
    #[serde(default)]
    pub segments: Vec<PaceSegment>,
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub is_weekend: bool,
    pub season: Season,
    /// Reservert for værdata; fylles ikke i dag
    #[serde(default)]
    pub temperature_c: Option<f64>,
}

impl RunningRecord {
    /// Bygg en post fra en ferdig økt. `id` settes av recorderen ved lagring.
    pub fn from_summary(summary: &SessionSummary, ctx: RecordContext) -> Self {
        Self {
            id: 0,
            start_time_ms: summary.started_at_ms,
            end_time_ms: summary.ended_at_ms,
            total_distance_meters: summary.distance_meters,
            total_time_ms: summary.elapsed_ms,
            target_pace_sec_per_km: summary.target_pace_sec_per_km,
            average_pace_sec_per_km: summary.average_pace_sec_per_km,
            calories: crate::recorder::calories_for_distance(summary.distance_meters),
            route: summary.route.clone(),
            segments: summary.segments.clone(),
            day_of_week: ctx.day_of_week,
            hour_of_day: ctx.hour_of_day,
            is_weekend: ctx.is_weekend,
            season: ctx.season,
            temperature_c: None,
        }
    }

    pub fn context(&self) -> RecordContext {
        RecordContext {
            day_of_week: self.day_of_week,
            hour_of_day: self.hour_of_day,
            is_weekend: self.is_weekend,
            season: self.season,
        }
    }
}
