// core/src/lib.rs
//! Paceline core: GPS-fixes → distanse/pace/tid, metronom med syntetisert
//! slag og en liten modell som justerer kadensen gjennom økten.

pub mod config;
pub mod error;
pub mod fatigue;
pub mod geo;
pub mod metrics;
pub mod metronome;
pub mod models;
pub mod recorder;
pub mod report;
pub mod storage;
pub mod synth;
pub mod tracker;

pub use config::{load_config, save_config, TrackerConfig};
pub use error::{AudioError, StoreError, StoreResult};
pub use fatigue::{
    train_in_background, ConditionAnalysis, ConditionLevel, FatigueCurve, FatigueModel, SharedModel,
    TrainingOutcome,
};
pub use geo::haversine_m;
pub use metrics::Metrics;
pub use metronome::{bpm_for_pace, interval_for_bpm, CadenceScheduler, SilentPlayer, TickPlayer};
pub use models::{
    LocationFix, PaceSegment, RecordContext, RunningRecord, Season, SessionState, SessionSummary,
};
pub use recorder::{calories_for_distance, start_of_week_ms, JsonFileRecorder, MemoryRecorder, SessionRecorder};
pub use report::session_report;
pub use storage::{JsonFilePrefs, MemoryPrefs, PrefsStore};
pub use synth::{synthesize, TickSound};
pub use tracker::{
    Clock, FixSink, LocationRequest, LocationSource, ManualClock, NoopLocationSource, SessionTracker,
    SystemClock, TrackerPhase,
};
