// core/src/tracker.rs
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::fatigue::SharedModel;
use crate::geo::haversine_m;
use crate::metrics::{fixes_accepted_total, fixes_rejected_total, segments_closed_total, Metrics};
use crate::metronome::CadenceScheduler;
use crate::models::{LocationFix, PaceSegment, RunningRecord, SessionState, SessionSummary};
use crate::recorder::SessionRecorder;

// ───────────────────────── Klokke ─────────────────────────

/// Veggklokke i ms siden epoch. Injiseres så tester kan styre tiden.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Klokke som bare går når noen flytter den.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { ms: Arc::new(AtomicI64::new(start_ms)) }
    }

    pub fn set(&self, ms: i64) {
        self.ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.ms.load(Ordering::SeqCst)
    }
}

// ───────────────────────── Posisjonskilde ─────────────────────────

/// Ønsket leveringsfrekvens for posisjoner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationRequest {
    pub interval_ms: u64,
    pub fastest_interval_ms: u64,
    pub min_distance_m: f64,
}

/// Leverer posisjoner til trackeren via `FixSink`.
///
/// `stop_updates` kalles med trackerens lås holdt, så den skal ikke vente på
/// en levering som er i gang.
pub trait LocationSource: Send + Sync {
    fn start_updates(&self, request: LocationRequest, sink: FixSink);
    fn stop_updates(&self);
}

/// Kilde som aldri leverer noe (replay / tester som mater trackeren direkte).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocationSource;

impl LocationSource for NoopLocationSource {
    fn start_updates(&self, _request: LocationRequest, _sink: FixSink) {}
    fn stop_updates(&self) {}
}

/// Håndtak posisjonskilden bruker for å levere fixes. Holder ikke trackeren i live.
#[derive(Clone)]
pub struct FixSink {
    shared: Weak<TrackerShared>,
}

impl FixSink {
    /// false når trackeren er borte; kilden kan da slutte å levere.
    pub fn deliver(&self, fix: LocationFix) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.on_location_fix(fix);
                true
            }
            None => false,
        }
    }
}

// ───────────────────────── Tracker ─────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

/// 1-sekunds klokketråd. Drop signaliserer stopp uten å vente.
struct Ticker {
    tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(shared: Weak<TrackerShared>, period: Duration) -> Option<Self> {
        let (tx, rx) = mpsc::channel::<()>();
        let spawned = thread::Builder::new().name("session-clock".into()).spawn(move || loop {
            match rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => match shared.upgrade() {
                    Some(s) => s.try_tick(),
                    None => break,
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        match spawned {
            Ok(handle) => Some(Self { tx, handle: Some(handle) }),
            Err(e) => {
                warn!("Klarte ikke starte klokketråd: {e}");
                None
            }
        }
    }

    fn shutdown(mut self) {
        let _ = self.tx.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Klokketråden avsluttet med panikk");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        let _ = self.tx.send(());
    }
}

struct TrackerCore {
    phase: TrackerPhase,
    target_pace: u32,
    started_at_ms: i64,
    pause_started_ms: Option<i64>,
    total_paused_ms: i64,
    distance_m: f64,
    elapsed_ms: i64,
    current_pace: u32,
    current_bpm: u32,
    progress: f64,
    route: Vec<LocationFix>,
    /// Siste fix som distanse måles fra
    anchor: Option<LocationFix>,
    last_fix_ts: Option<i64>,
    segments: Vec<PaceSegment>,
    segment_started_elapsed_ms: i64,
    segment_started_distance_m: f64,
    next_segment_at_m: f64,
    scheduler: CadenceScheduler,
    ticker: Option<Ticker>,
    subscribers: Vec<Sender<SessionState>>,
}

impl TrackerCore {
    fn new(scheduler: CadenceScheduler) -> Self {
        let defaults = SessionState::default();
        Self {
            phase: TrackerPhase::Idle,
            target_pace: defaults.target_pace_sec_per_km,
            started_at_ms: 0,
            pause_started_ms: None,
            total_paused_ms: 0,
            distance_m: 0.0,
            elapsed_ms: 0,
            current_pace: 0,
            current_bpm: 0,
            progress: 0.0,
            route: Vec::new(),
            anchor: None,
            last_fix_ts: None,
            segments: Vec::new(),
            segment_started_elapsed_ms: 0,
            segment_started_distance_m: 0.0,
            next_segment_at_m: 0.0,
            scheduler,
            ticker: None,
            subscribers: Vec::new(),
        }
    }

    fn reset_for(&mut self, target_pace: u32, now_ms: i64, segment_length_m: f64) {
        self.target_pace = target_pace;
        self.started_at_ms = now_ms;
        self.pause_started_ms = None;
        self.total_paused_ms = 0;
        self.distance_m = 0.0;
        self.elapsed_ms = 0;
        self.current_pace = 0;
        self.progress = 0.0;
        self.route.clear();
        self.anchor = None;
        self.last_fix_ts = None;
        self.segments.clear();
        self.segment_started_elapsed_ms = 0;
        self.segment_started_distance_m = 0.0;
        self.next_segment_at_m = segment_length_m;
    }

    /// Aktiv tid. Fryses på pausestart mens økten står på pause.
    fn refresh_elapsed(&mut self, now_ms: i64) {
        let reference = self.pause_started_ms.unwrap_or(now_ms);
        self.elapsed_ms = (reference - self.started_at_ms - self.total_paused_ms).max(0);
        self.current_pace = average_pace(self.elapsed_ms, self.distance_m);
    }

    fn snapshot(&self) -> SessionState {
        SessionState {
            is_running: self.phase == TrackerPhase::Running,
            is_paused: self.phase == TrackerPhase::Paused,
            distance_meters: self.distance_m,
            elapsed_ms: self.elapsed_ms,
            current_pace_sec_per_km: self.current_pace,
            target_pace_sec_per_km: self.target_pace,
            current_bpm: self.current_bpm,
            progress: self.progress,
        }
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let state = self.snapshot();
        self.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
    }
}

/// Snittpace (s/km). 0 før de første 10 meterne.
fn average_pace(elapsed_ms: i64, distance_m: f64) -> u32 {
    let km = distance_m / 1000.0;
    if km > 0.01 {
        ((elapsed_ms as f64 / 1000.0) / km).round() as u32
    } else {
        0
    }
}

struct TrackerShared {
    core: Mutex<TrackerCore>,
    config: TrackerConfig,
    model: SharedModel,
    location: Arc<dyn LocationSource>,
    recorder: Option<Arc<dyn SessionRecorder>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    /// true mens posisjonskilden er startet. Holdes rundt start_updates/stop_updates,
    /// alltid før `core` når begge tas.
    subscription: Mutex<bool>,
}

impl TrackerShared {
    fn lock(&self) -> MutexGuard<'_, TrackerCore> {
        self.core.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn on_location_fix(&self, fix: LocationFix) {
        let mut core = self.lock();
        if core.phase != TrackerPhase::Running {
            debug!("Fix ignorert i fase {:?}", core.phase);
            return;
        }
        if !fix.is_valid() || core.last_fix_ts.is_some_and(|t| fix.timestamp_ms < t) {
            fixes_rejected_total(&self.metrics, "malformed").inc();
            debug!("Ugyldig fix forkastet: {fix:?}");
            return;
        }
        core.route.push(fix);
        core.last_fix_ts = Some(fix.timestamp_ms);

        if let Some(anchor) = core.anchor {
            let delta = haversine_m(&anchor, &fix);
            if delta <= self.config.jitter_threshold_m {
                fixes_rejected_total(&self.metrics, "jitter").inc();
                debug!("GPS-støy: {delta:.2} m");
            } else if delta >= self.config.teleport_threshold_m {
                fixes_rejected_total(&self.metrics, "teleport").inc();
                debug!("Teleport forkastet: {delta:.1} m");
                core.anchor = Some(fix);
            } else {
                fixes_accepted_total(&self.metrics).inc();
                core.distance_m += delta;
                core.anchor = Some(fix);
            }
        } else {
            core.anchor = Some(fix);
        }

        core.refresh_elapsed(self.clock.now_ms());
        let expected = self.expected_total_m();
        core.progress = (core.distance_m / expected).clamp(0.0, 1.0);
        self.close_segments(&mut core);

        if self.config.adaptive_cadence {
            let bpm = self.read_model(|m| m.infer(core.target_pace, core.distance_m, expected));
            if bpm > 0 && bpm != core.current_bpm {
                core.current_bpm = bpm;
                core.scheduler.retune(bpm);
            }
        }
        core.publish();
    }

    /// Lukker høyst ett segment per fix. Pace regnes over faktisk tilbakelagt
    /// distanse siden forrige passering; segmenter uten tid eller distanse hoppes over.
    fn close_segments(&self, core: &mut TrackerCore) {
        let length = self.config.segment_length_m;
        if length <= 0.0 || core.distance_m < core.next_segment_at_m {
            return;
        }
        while core.next_segment_at_m <= core.distance_m {
            core.next_segment_at_m += length;
        }

        let start_ms = core.segment_started_elapsed_ms;
        let end_ms = core.elapsed_ms;
        let covered_m = core.distance_m - core.segment_started_distance_m;
        core.segment_started_elapsed_ms = end_ms;
        core.segment_started_distance_m = core.distance_m;

        if end_ms <= start_ms || covered_m <= 0.0 {
            debug!("Segment uten tid/distanse hoppet over ({} ms, {covered_m:.1} m)", end_ms - start_ms);
            return;
        }
        let pace = ((end_ms - start_ms) as f64 / 1000.0 / (covered_m / 1000.0)).round() as u32;
        let segment = PaceSegment {
            segment_index: core.segments.len() as u32,
            pace_sec_per_km: pace,
            start_ms,
            end_ms,
        };
        info!("Segment {} ferdig: {pace} s/km", segment.segment_index + 1);
        core.segments.push(segment);
        segments_closed_total(&self.metrics).inc();
    }

    fn tick_locked(&self, core: &mut TrackerCore) {
        if core.phase == TrackerPhase::Running {
            core.refresh_elapsed(self.clock.now_ms());
            core.publish();
        }
    }

    /// Klokketråden venter aldri på låsen; er den opptatt, hoppes tikket over.
    fn try_tick(&self) {
        match self.core.try_lock() {
            Ok(mut core) => self.tick_locked(&mut core),
            Err(TryLockError::WouldBlock) => {}
            Err(TryLockError::Poisoned(p)) => self.tick_locked(&mut p.into_inner()),
        }
    }

    fn expected_total_m(&self) -> f64 {
        if self.config.expected_total_distance_m > 0.0 {
            self.config.expected_total_distance_m
        } else {
            crate::fatigue::DEFAULT_EXPECTED_DISTANCE_M
        }
    }

    fn read_model<T>(&self, f: impl FnOnce(&crate::fatigue::FatigueModel) -> T) -> T {
        match self.model.read() {
            Ok(guard) => f(&*guard),
            Err(poisoned) => f(&*poisoned.into_inner()),
        }
    }
}

/// Tilstandsmaskinen for én løpeøkt: Idle → Running ⇄ Paused → Stopped.
///
/// All mutasjon går gjennom én mutex. Håndtaket kan klones og deles mellom
/// tråder; posisjonskilden og klokketråden holder bare svake referanser.
#[derive(Clone)]
pub struct SessionTracker {
    shared: Arc<TrackerShared>,
}

impl SessionTracker {
    pub fn new(
        config: TrackerConfig,
        model: SharedModel,
        scheduler: CadenceScheduler,
        location: Arc<dyn LocationSource>,
        recorder: Option<Arc<dyn SessionRecorder>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        scheduler.set_volume(config.volume);
        let shared = Arc::new(TrackerShared {
            core: Mutex::new(TrackerCore::new(scheduler)),
            config,
            model,
            location,
            recorder,
            clock,
            metrics: crate::metrics::global().clone(),
            subscription: Mutex::new(false),
        });
        Self { shared }
    }

    /// Bytt metrics-register. Må kalles før håndtaket klones eller startes.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.metrics = metrics,
            None => warn!("with_metrics ignorert: trackeren er allerede delt"),
        }
        self
    }

    /// Start økten. Gjør ingenting med mindre fasen er Idle og mål-pace > 0.
    pub fn start(&self, target_pace_sec_per_km: u32) -> bool {
        if target_pace_sec_per_km == 0 {
            debug!("start ignorert: mål-pace er 0");
            return false;
        }
        let shared = &self.shared;
        {
            let mut core = shared.lock();
            if core.phase != TrackerPhase::Idle {
                debug!("start ignorert i fase {:?}", core.phase);
                return false;
            }
            let now = shared.clock.now_ms();
            core.reset_for(target_pace_sec_per_km, now, shared.config.segment_length_m);

            let expected = shared.expected_total_m();
            let bpm = shared.read_model(|m| {
                if m.has_trained_model() {
                    m.infer(target_pace_sec_per_km, 0.0, expected)
                } else {
                    m.simple_bpm(target_pace_sec_per_km)
                }
            });
            core.current_bpm = bpm;
            core.phase = TrackerPhase::Running;
            core.scheduler.start(bpm);
            core.ticker = Ticker::spawn(
                Arc::downgrade(shared),
                Duration::from_millis(shared.config.clock_tick_ms.max(1)),
            );
            info!("Økt startet: mål {target_pace_sec_per_km} s/km, {bpm} bpm");
            core.publish();
        }
        // utenfor core-låsen: kilden kan levere synkront
        let mut active = shared.subscription.lock().unwrap_or_else(|p| p.into_inner());
        if shared.lock().phase == TrackerPhase::Stopped {
            debug!("Økten ble stoppet før posisjonskilden rakk å starte");
            return true;
        }
        shared
            .location
            .start_updates(shared.config.location_request(), FixSink { shared: Arc::downgrade(shared) });
        *active = true;
        true
    }

    pub fn on_location_fix(&self, fix: LocationFix) {
        self.shared.on_location_fix(fix);
    }

    pub fn pause(&self) {
        let mut core = self.shared.lock();
        if core.phase != TrackerPhase::Running {
            debug!("pause ignorert i fase {:?}", core.phase);
            return;
        }
        let now = self.shared.clock.now_ms();
        core.refresh_elapsed(now);
        core.pause_started_ms = Some(now);
        core.phase = TrackerPhase::Paused;
        core.scheduler.stop();
        info!("Økt pauset etter {} s", core.elapsed_ms / 1000);
        core.publish();
    }

    pub fn resume(&self) {
        let mut core = self.shared.lock();
        if core.phase != TrackerPhase::Paused {
            debug!("resume ignorert i fase {:?}", core.phase);
            return;
        }
        let now = self.shared.clock.now_ms();
        if let Some(paused_at) = core.pause_started_ms.take() {
            core.total_paused_ms += (now - paused_at).max(0);
        }
        core.phase = TrackerPhase::Running;
        core.refresh_elapsed(now);
        let bpm = core.current_bpm;
        core.scheduler.start(bpm);
        info!("Økt gjenopptatt ({} ms pause totalt)", core.total_paused_ms);
        core.publish();
    }

    /// Avslutt økten. Andre kall gir None.
    pub fn stop(&self) -> Option<SessionSummary> {
        let shared = &self.shared;
        // venter på en start_updates som er i gang
        let mut active = shared.subscription.lock().unwrap_or_else(|p| p.into_inner());
        let summary = {
            let mut core = shared.lock();
            if !matches!(core.phase, TrackerPhase::Running | TrackerPhase::Paused) {
                debug!("stop ignorert i fase {:?}", core.phase);
                return None;
            }
            core.scheduler.stop();
            if let Some(ticker) = core.ticker.take() {
                ticker.shutdown();
            }
            if *active {
                shared.location.stop_updates();
                *active = false;
            }

            let now = shared.clock.now_ms();
            core.refresh_elapsed(now);
            if let Some(paused_at) = core.pause_started_ms.take() {
                core.total_paused_ms += (now - paused_at).max(0);
            }
            core.phase = TrackerPhase::Stopped;

            let summary = SessionSummary {
                started_at_ms: core.started_at_ms,
                ended_at_ms: now,
                distance_meters: core.distance_m,
                elapsed_ms: core.elapsed_ms,
                average_pace_sec_per_km: core.current_pace,
                target_pace_sec_per_km: core.target_pace,
                route: core.route.clone(),
                segments: core.segments.clone(),
            };
            core.publish();
            summary
        };
        drop(active);

        info!(
            "Økt stoppet: {:.2} km på {} s, snitt {} s/km",
            summary.distance_meters / 1000.0,
            summary.elapsed_ms / 1000,
            summary.average_pace_sec_per_km
        );

        if let Some(recorder) = &shared.recorder {
            let record = RunningRecord::from_summary(&summary, shared.config.context_for(summary.started_at_ms));
            if let Err(e) = recorder.save(record) {
                warn!("Klarte ikke lagre økten: {e}");
            }
        }
        Some(summary)
    }

    /// Klokkeoppdatering: ny elapsed/pace mens økten går.
    pub fn tick(&self) {
        let mut core = self.shared.lock();
        self.shared.tick_locked(&mut core);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().snapshot()
    }

    pub fn route(&self) -> Vec<LocationFix> {
        self.shared.lock().route.clone()
    }

    pub fn segments(&self) -> Vec<PaceSegment> {
        self.shared.lock().segments.clone()
    }

    pub fn phase(&self) -> TrackerPhase {
        self.shared.lock().phase
    }

    /// Alle tilstandsendringer sendes hit. Droppede mottakere ryddes bort.
    pub fn subscribe(&self) -> Receiver<SessionState> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.shared.config
    }

    /// bpm metronomen går på nå (0 før start).
    pub fn current_bpm(&self) -> u32 {
        self.shared.lock().current_bpm
    }

    pub fn metronome_running(&self) -> bool {
        self.shared.lock().scheduler.is_running()
    }
}
