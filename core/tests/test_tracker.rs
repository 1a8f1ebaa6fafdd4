mod common;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::*;
use paceline_core::geo::{haversine_m, offset_north};
use paceline_core::metrics::{fixes_accepted_total, fixes_rejected_total, segments_closed_total};
use paceline_core::{
    CadenceScheduler, FatigueModel, FixSink, LocationFix, LocationRequest, LocationSource, ManualClock,
    MemoryRecorder, Metrics, SessionRecorder, SessionState, SessionTracker, SilentPlayer, TickSound,
    TrackerConfig, TrackerPhase,
};

#[test]
fn pause_while_idle_is_noop() {
    let rig = rig(None);
    let before = rig.tracker.state();
    rig.tracker.pause();
    rig.tracker.resume();
    assert_eq!(rig.tracker.phase(), TrackerPhase::Idle);
    assert_eq!(rig.tracker.state(), before);
    assert_eq!(before, SessionState::default());
}

#[test]
fn start_requires_positive_target_and_idle() {
    let rig = rig(None);
    assert!(!rig.tracker.start(0));
    assert_eq!(rig.tracker.phase(), TrackerPhase::Idle);

    assert!(rig.tracker.start(360));
    assert!(!rig.tracker.start(300), "andre start skal ignoreres");
    assert_eq!(rig.tracker.state().target_pace_sec_per_km, 360);
    rig.tracker.stop();
}

#[test]
fn untrained_start_uses_plain_stride_formula() {
    let rig = rig(None);
    rig.tracker.start(360);
    // (1000 / 0.8) / (360 / 60) = 208.3
    assert_eq!(rig.tracker.current_bpm(), 208);
    assert!(rig.tracker.metronome_running());
    rig.tracker.stop();
    assert!(!rig.tracker.metronome_running());
}

#[test]
fn half_meter_artifact_is_rejected() {
    let rig = rig(None);
    rig.tracker.start(360);

    let a = origin();
    rig.tracker.on_location_fix(a);
    rig.clock.advance(1_000);
    rig.tracker.on_location_fix(offset_north(&a, 0.5, rig.clock_now()));
    rig.clock.advance(2_000);
    rig.tracker.on_location_fix(offset_north(&a, 15.0, rig.clock_now()));

    let state = rig.tracker.state();
    assert!((state.distance_meters - 15.0).abs() < 1e-6, "distanse {}", state.distance_meters);
    assert_eq!(rig.tracker.route().len(), 3);
    assert_eq!(fixes_rejected_total(&rig.metrics, "jitter").get(), 1);
    assert_eq!(fixes_accepted_total(&rig.metrics).get(), 1);
    rig.tracker.stop();
}

#[test]
fn jitter_and_teleport_add_no_distance() {
    let rig = rig(None);
    rig.tracker.start(360);

    let a = origin();
    rig.tracker.on_location_fix(a);
    rig.clock.advance(1_000);
    // støy rundt samme punkt
    rig.tracker.on_location_fix(offset_north(&a, 0.8, rig.clock_now()));
    rig.tracker.on_location_fix(offset_north(&a, -0.6, rig.clock_now()));
    // teleport: 500 m unna
    let far = offset_north(&a, 500.0, rig.clock_now());
    rig.tracker.on_location_fix(far);
    assert_eq!(rig.tracker.state().distance_meters, 0.0);
    assert_eq!(fixes_rejected_total(&rig.metrics, "teleport").get(), 1);

    // videre løping måles fra teleport-punktet
    rig.clock.advance(3_000);
    rig.tracker.on_location_fix(offset_north(&far, 10.0, rig.clock_now()));
    assert!((rig.tracker.state().distance_meters - 10.0).abs() < 1e-6);
    rig.tracker.stop();
}

#[test]
fn thresholds_themselves_are_rejected() {
    let a = origin();
    let one = offset_north(&a, 1.0, a.timestamp_ms + 1_000);
    let hundred = offset_north(&a, 100.0, a.timestamp_ms + 2_000);
    // grensene settes til nøyaktig målt avstand, så `<=` / `>=` testes eksakt
    let jitter = haversine_m(&a, &one);
    let teleport = haversine_m(&a, &hundred);
    assert!((jitter - 1.0).abs() < 1e-4 && (teleport - 100.0).abs() < 1e-4);

    let config = TrackerConfig {
        jitter_threshold_m: jitter,
        teleport_threshold_m: teleport,
        ..TrackerConfig::default()
    };
    let rig = rig_with(config, FatigueModel::in_memory(), None);
    rig.tracker.start(360);

    rig.tracker.on_location_fix(a);
    rig.tracker.on_location_fix(one);
    rig.tracker.on_location_fix(hundred);
    assert_eq!(rig.tracker.state().distance_meters, 0.0);
    assert_eq!(fixes_rejected_total(&rig.metrics, "jitter").get(), 1);
    assert_eq!(fixes_rejected_total(&rig.metrics, "teleport").get(), 1);

    // like innenfor begge grensene telles
    let b = offset_north(&hundred, 1.001, a.timestamp_ms + 3_000);
    let c = offset_north(&b, 99.99, a.timestamp_ms + 40_000);
    rig.tracker.on_location_fix(b);
    rig.tracker.on_location_fix(c);
    assert!((rig.tracker.state().distance_meters - 100.991).abs() < 1e-4);
    assert_eq!(fixes_accepted_total(&rig.metrics).get(), 2);
    rig.tracker.stop();
}

#[test]
fn malformed_fixes_are_dropped() {
    let rig = rig(None);
    rig.tracker.start(360);
    let a = origin();
    rig.tracker.on_location_fix(a);
    rig.tracker.on_location_fix(LocationFix::new(f64::NAN, 10.0, a.timestamp_ms + 1));
    rig.tracker.on_location_fix(LocationFix::new(95.0, 10.0, a.timestamp_ms + 1));
    // eldre tidsstempel enn forrige fix
    rig.tracker.on_location_fix(offset_north(&a, 5.0, a.timestamp_ms - 1_000));

    assert_eq!(rig.tracker.route().len(), 1);
    assert_eq!(fixes_rejected_total(&rig.metrics, "malformed").get(), 3);
    rig.tracker.stop();
}

#[test]
fn fixes_are_ignored_unless_running() {
    let rig = rig(None);
    rig.tracker.on_location_fix(origin());
    assert!(rig.tracker.route().is_empty());

    rig.tracker.start(360);
    let end = run_north(&rig, origin(), 10, 5.0, 1_800);
    rig.tracker.pause();
    let paused_distance = rig.tracker.state().distance_meters;
    run_north(&rig, end, 10, 5.0, 1_800);
    assert_eq!(rig.tracker.state().distance_meters, paused_distance);
    assert_eq!(rig.tracker.route().len(), 10);
    rig.tracker.stop();
}

#[test]
fn elapsed_freezes_during_pause_and_continues_after() {
    let rig = rig(None);
    rig.tracker.start(360);

    rig.clock.advance(10_000);
    rig.tracker.tick();
    assert_eq!(rig.tracker.state().elapsed_ms, 10_000);

    rig.tracker.pause();
    assert!(rig.tracker.state().is_paused);
    assert!(!rig.tracker.metronome_running());

    rig.clock.advance(60_000);
    rig.tracker.tick();
    assert_eq!(rig.tracker.state().elapsed_ms, 10_000);

    rig.tracker.resume();
    assert_eq!(rig.tracker.state().elapsed_ms, 10_000, "ingen hopp ved resume");
    assert!(rig.tracker.metronome_running());
    assert_eq!(rig.tracker.current_bpm(), 208);

    rig.clock.advance(5_000);
    rig.tracker.tick();
    assert_eq!(rig.tracker.state().elapsed_ms, 15_000);

    let summary = rig.tracker.stop().unwrap();
    assert_eq!(summary.elapsed_ms, 15_000);
}

#[test]
fn elapsed_is_monotonic_while_running() {
    let rig = rig(None);
    rig.tracker.start(360);
    let mut last = 0;
    for _ in 0..20 {
        rig.clock.advance(700);
        rig.tracker.tick();
        let e = rig.tracker.state().elapsed_ms;
        assert!(e >= last);
        last = e;
    }
    rig.tracker.stop();
}

#[test]
fn five_k_run_adapts_cadence_and_closes_segments() {
    let rig = rig(None);
    rig.tracker.start(360);
    rig.tracker.on_location_fix(origin());

    // 5 m per fix, 1.8 s per fix = 6:00/km
    let pos = run_north(&rig, origin(), 50, 5.0, 1_800);
    let early_bpm = rig.tracker.current_bpm();
    let pos = run_north(&rig, pos, 900, 5.0, 1_800);
    let late_bpm = rig.tracker.current_bpm();

    // 0.95 × 360 tidlig, 1.05 × 360 sent
    assert_eq!(early_bpm, 219);
    assert_eq!(late_bpm, 198);
    assert!(early_bpm > late_bpm);

    run_north(&rig, pos, 51, 5.0, 1_800);
    let state = rig.tracker.state();
    assert!((state.progress - 1.0).abs() < 1e-9);

    let segments = rig.tracker.segments();
    assert_eq!(segments.len(), 5);
    for (i, seg) in segments.iter().enumerate() {
        assert_eq!(seg.segment_index, i as u32);
        assert!((358..=362).contains(&seg.pace_sec_per_km), "km {}: {}", i + 1, seg.pace_sec_per_km);
        assert!(seg.end_ms > seg.start_ms);
    }
    assert_eq!(segments_closed_total(&rig.metrics).get(), 5);

    let summary = rig.tracker.stop().unwrap();
    assert!((359..=361).contains(&summary.average_pace_sec_per_km));
}

#[test]
fn segment_pace_uses_covered_distance() {
    let config = TrackerConfig { segment_length_m: 20.0, ..TrackerConfig::default() };
    let rig = rig_with(config, FatigueModel::in_memory(), None);
    rig.tracker.start(360);
    let a = origin();
    rig.tracker.on_location_fix(a);

    // 50 m på 15 s passerer både 20 og 40 m: ett segment over hele strekningen
    rig.clock.advance(15_000);
    rig.tracker.on_location_fix(offset_north(&a, 50.0, rig.clock_now()));
    // 15 m på 5 s
    rig.clock.advance(5_000);
    rig.tracker.on_location_fix(offset_north(&a, 65.0, rig.clock_now()));
    // passering uten at tiden har gått: hoppes over
    rig.tracker.on_location_fix(offset_north(&a, 90.0, rig.clock_now()));
    // 12 m på 6 s
    rig.clock.advance(6_000);
    rig.tracker.on_location_fix(offset_north(&a, 102.0, rig.clock_now()));

    let paces: Vec<u32> = rig.tracker.segments().iter().map(|s| s.pace_sec_per_km).collect();
    assert_eq!(paces, vec![300, 333, 500]);
    let indices: Vec<u32> = rig.tracker.segments().iter().map(|s| s.segment_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(segments_closed_total(&rig.metrics).get(), 3);
    rig.tracker.stop();
}

/// Kilde som blir stående i `start_updates` til testen slipper den.
struct GatedSource {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    active: Mutex<bool>,
}

impl LocationSource for GatedSource {
    fn start_updates(&self, _request: LocationRequest, _sink: FixSink) {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(10));
        *self.active.lock().unwrap() = true;
    }

    fn stop_updates(&self) {
        *self.active.lock().unwrap() = false;
    }
}

#[test]
fn stop_during_start_still_turns_location_off() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let source = Arc::new(GatedSource {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        active: Mutex::new(false),
    });
    let metrics = Metrics::new();
    let tracker = SessionTracker::new(
        TrackerConfig::default(),
        FatigueModel::in_memory().into_shared(),
        CadenceScheduler::new(Arc::new(SilentPlayer), TickSound::default()).with_metrics(metrics.clone()),
        source.clone(),
        None,
        Arc::new(ManualClock::new(START_MS)),
    )
    .with_metrics(metrics);

    let starter = {
        let t = tracker.clone();
        thread::spawn(move || t.start(360))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).expect("start_updates ble ikke kalt");

    let stopper = {
        let t = tracker.clone();
        thread::spawn(move || t.stop())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!stopper.is_finished(), "stop skal vente på start_updates");

    release_tx.send(()).unwrap();
    assert!(starter.join().unwrap());
    assert!(stopper.join().unwrap().is_some());
    assert_eq!(tracker.phase(), TrackerPhase::Stopped);
    assert!(!*source.active.lock().unwrap(), "posisjonskilden er fortsatt aktiv");
}

#[test]
fn trained_model_drives_start_cadence() {
    let mut model = FatigueModel::in_memory();
    model.train(&[common_record(360, 5)]);
    assert!(model.has_trained_model());
    let expected = model.infer(360, 0.0, 5000.0);

    let rig = rig_with(TrackerConfig::default(), model, None);
    rig.tracker.start(360);
    assert_eq!(rig.tracker.current_bpm(), expected);
    rig.tracker.stop();
}

#[test]
fn fixed_cadence_when_adaptive_is_off() {
    let config = TrackerConfig { adaptive_cadence: false, ..TrackerConfig::default() };
    let rig = rig_with(config, FatigueModel::in_memory(), None);
    rig.tracker.start(360);
    run_north(&rig, origin(), 200, 5.0, 1_800);
    assert_eq!(rig.tracker.current_bpm(), 208);
    rig.tracker.stop();
}

#[test]
fn stop_is_idempotent_and_records_once() {
    let recorder = Arc::new(MemoryRecorder::new());
    let rig = rig(Some(recorder.clone()));
    rig.tracker.start(360);
    rig.tracker.on_location_fix(origin());
    run_north(&rig, origin(), 200, 5.0, 1_800);

    let summary = rig.tracker.stop().expect("første stop gir oppsummering");
    assert!(rig.tracker.stop().is_none());
    assert_eq!(rig.tracker.phase(), TrackerPhase::Stopped);
    assert!(!rig.tracker.start(360), "Stopped er terminal");

    assert_eq!(recorder.count().unwrap(), 1);
    let record = recorder.latest().unwrap().unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.target_pace_sec_per_km, 360);
    assert!((record.total_distance_meters - summary.distance_meters).abs() < 1e-9);
    assert_eq!(record.segments, summary.segments);
    assert_eq!(record.route.len(), 201);

    let state = rig.tracker.state();
    assert!(!state.is_running && !state.is_paused);
}

#[test]
fn stop_from_pause_finalises_frozen_time() {
    let rig = rig(None);
    rig.tracker.start(360);
    rig.clock.advance(30_000);
    rig.tracker.pause();
    rig.clock.advance(120_000);
    let summary = rig.tracker.stop().unwrap();
    assert_eq!(summary.elapsed_ms, 30_000);
    assert_eq!(summary.ended_at_ms - summary.started_at_ms, 150_000);
}

#[test]
fn location_source_is_wired_through_sink() {
    let rig = rig(None);
    rig.tracker.start(360);

    let request = rig.source.request.lock().unwrap().clone().expect("start_updates kalt");
    assert_eq!(request.interval_ms, 1_000);
    assert_eq!(request.fastest_interval_ms, 500);
    assert_eq!(request.min_distance_m, 2.0);

    let sink = rig.source.sink();
    let a = origin();
    assert!(sink.deliver(a));
    rig.clock.advance(3_000);
    assert!(sink.deliver(offset_north(&a, 12.0, rig.clock_now())));
    assert!((rig.tracker.state().distance_meters - 12.0).abs() < 1e-6);

    rig.tracker.stop();
    assert!(*rig.source.stopped.lock().unwrap());
    // sent levering treffer en stoppet tracker
    sink.deliver(offset_north(&a, 20.0, rig.clock_now() + 1_000));
    assert_eq!(rig.tracker.route().len(), 2);

    drop(rig);
}

#[test]
fn subscribers_receive_state_changes() {
    // klokketråden skal ikke publisere midt i testen
    let config = TrackerConfig { clock_tick_ms: 3_600_000, ..TrackerConfig::default() };
    let rig = rig_with(config, FatigueModel::in_memory(), None);
    let rx = rig.tracker.subscribe();
    rig.tracker.start(360);
    let first = rx.recv().unwrap();
    assert!(first.is_running);
    assert_eq!(first.current_bpm, 208);

    rig.tracker.pause();
    let paused = rx.recv().unwrap();
    assert!(paused.is_paused);

    drop(rx);
    rig.tracker.resume();
    rig.tracker.stop();
}

fn common_record(target: u32, km: u32) -> paceline_core::RunningRecord {
    use paceline_core::{PaceSegment, RecordContext, RunningRecord, SessionSummary};
    let segments: Vec<PaceSegment> = (0..km)
        .map(|i| PaceSegment {
            segment_index: i,
            pace_sec_per_km: target,
            start_ms: i as i64 * target as i64 * 1000,
            end_ms: (i + 1) as i64 * target as i64 * 1000,
        })
        .collect();
    let summary = SessionSummary {
        started_at_ms: START_MS,
        ended_at_ms: START_MS + km as i64 * target as i64 * 1000,
        distance_meters: km as f64 * 1000.0,
        elapsed_ms: km as i64 * target as i64 * 1000,
        average_pace_sec_per_km: target,
        target_pace_sec_per_km: target,
        route: Vec::new(),
        segments,
    };
    RunningRecord::from_summary(&summary, RecordContext::default())
}
