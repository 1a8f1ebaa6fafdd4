// Felles hjelpere for integrasjonstestene
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use paceline_core::geo::offset_north;
use paceline_core::{
    AudioError, CadenceScheduler, Clock, FatigueModel, FixSink, LocationFix, LocationRequest, LocationSource,
    ManualClock, Metrics, SessionRecorder, SessionTracker, SharedModel, TickPlayer, TickSound, TrackerConfig,
};

pub const START_MS: i64 = 1_720_000_000_000;

/// Teller slag i stedet for å spille dem.
#[derive(Default)]
pub struct CountingPlayer {
    pub plays: AtomicUsize,
}

impl CountingPlayer {
    pub fn count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }
}

impl TickPlayer for CountingPlayer {
    fn play(&self, _samples: &[i16], _sample_rate: u32, _volume: f32) -> Result<(), AudioError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Spiller som alltid feiler (f.eks. lydenhet borte).
pub struct BrokenPlayer;

impl TickPlayer for BrokenPlayer {
    fn play(&self, _samples: &[i16], _sample_rate: u32, _volume: f32) -> Result<(), AudioError> {
        Err(AudioError::DeviceUnavailable("test".into()))
    }
}

/// Posisjonskilde som bare tar vare på sinken, så testen kan levere selv.
#[derive(Default)]
pub struct ScriptedSource {
    pub sink: Mutex<Option<FixSink>>,
    pub request: Mutex<Option<LocationRequest>>,
    pub stopped: Mutex<bool>,
}

impl ScriptedSource {
    pub fn sink(&self) -> FixSink {
        self.sink.lock().unwrap().clone().expect("start_updates ikke kalt")
    }
}

impl LocationSource for ScriptedSource {
    fn start_updates(&self, request: LocationRequest, sink: FixSink) {
        *self.request.lock().unwrap() = Some(request);
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn stop_updates(&self) {
        *self.stopped.lock().unwrap() = true;
    }
}

pub struct Rig {
    pub tracker: SessionTracker,
    pub clock: ManualClock,
    pub player: Arc<CountingPlayer>,
    pub source: Arc<ScriptedSource>,
    pub model: SharedModel,
    pub metrics: Metrics,
}

impl Rig {
    pub fn clock_now(&self) -> i64 {
        self.clock.now_ms()
    }
}

pub fn rig(recorder: Option<Arc<dyn SessionRecorder>>) -> Rig {
    rig_with(TrackerConfig::default(), FatigueModel::in_memory(), recorder)
}

pub fn rig_with(config: TrackerConfig, model: FatigueModel, recorder: Option<Arc<dyn SessionRecorder>>) -> Rig {
    let clock = ManualClock::new(START_MS);
    let player = Arc::new(CountingPlayer::default());
    let source = Arc::new(ScriptedSource::default());
    let metrics = Metrics::new();
    let model = model.with_metrics(metrics.clone()).into_shared();
    let scheduler = CadenceScheduler::new(player.clone(), TickSound::default()).with_metrics(metrics.clone());
    let tracker = SessionTracker::new(
        config,
        model.clone(),
        scheduler,
        source.clone(),
        recorder,
        Arc::new(clock.clone()) as Arc<dyn Clock>,
    )
    .with_metrics(metrics.clone());
    Rig { tracker, clock, player, source, model, metrics }
}

pub fn origin() -> LocationFix {
    LocationFix::new(59.9139, 10.7522, START_MS)
}

/// Løp rett nordover i steg på `step_m`, `step_ms` mellom hver fix.
/// Returnerer siste posisjon.
pub fn run_north(rig: &Rig, from: LocationFix, steps: usize, step_m: f64, step_ms: i64) -> LocationFix {
    let mut pos = from;
    for _ in 0..steps {
        rig.clock.advance(step_ms);
        pos = offset_north(&pos, step_m, rig.clock.now_ms());
        rig.tracker.on_location_fix(pos);
    }
    pos
}
