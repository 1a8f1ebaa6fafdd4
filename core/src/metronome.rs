use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::AudioError;
use crate::metrics::{beats_missed_total, beats_played_total, Metrics};
use crate::synth::TickSound;

pub const MIN_BPM: u32 = 100;
pub const MAX_BPM: u32 = 220;
pub const DEFAULT_VOLUME: f32 = 0.7;

/// "Spill av én gang". Implementeres per plattform; kjernen kjenner bare denne.
pub trait TickPlayer: Send + Sync {
    fn play(&self, samples: &[i16], sample_rate: u32, volume: f32) -> Result<(), AudioError>;
}

/// Hodeløs spiller (ingen lydenhet).
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPlayer;

impl TickPlayer for SilentPlayer {
    fn play(&self, _samples: &[i16], _sample_rate: u32, _volume: f32) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Intervall mellom slag: round(60000 / bpm) ms. `None` for bpm = 0.
pub fn interval_for_bpm(bpm: u32) -> Option<Duration> {
    if bpm == 0 {
        return None;
    }
    Some(Duration::from_millis((60_000.0 / bpm as f64).round() as u64))
}

/// Kadens fra mål-pace og skrittlengde:
/// bpm = (1000 / skritt) / (pace / 60), avrundet og begrenset til [100, 220].
pub fn bpm_for_pace(pace_sec_per_km: f64, stride_m: f64) -> u32 {
    if !(pace_sec_per_km > 0.0) || !(stride_m > 0.0) {
        return 0;
    }
    let steps_per_km = 1000.0 / stride_m;
    let pace_min = pace_sec_per_km / 60.0;
    ((steps_per_km / pace_min).round() as u32).clamp(MIN_BPM, MAX_BPM)
}

enum Command {
    Stop,
}

struct Worker {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Periodisk metronom på egen tråd.
///
/// `retune` = stopp + start med nytt intervall; ingen levende timer muteres.
/// `stop` venter til tråden er ferdig, så ingen slag er i gang etter retur.
pub struct CadenceScheduler {
    player: Arc<dyn TickPlayer>,
    sound: Option<TickSound>,
    /// f32-bits, leses av tråden ved hvert slag
    volume: Arc<AtomicU32>,
    current_bpm: u32,
    worker: Option<Worker>,
    metrics: Metrics,
}

impl CadenceScheduler {
    pub fn new(player: Arc<dyn TickPlayer>, sound: TickSound) -> Self {
        Self {
            player,
            sound: Some(sound),
            volume: Arc::new(AtomicU32::new(DEFAULT_VOLUME.to_bits())),
            current_bpm: 0,
            worker: None,
            metrics: crate::metrics::global().clone(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn start(&mut self, bpm: u32) {
        let Some(interval) = interval_for_bpm(bpm) else {
            return;
        };
        let Some(sound) = self.sound.clone() else {
            debug!("Metronom er frigjort, ignorerer start({bpm})");
            return;
        };

        self.stop();
        self.current_bpm = bpm;

        let (tx, rx) = mpsc::channel::<Command>();
        let player = Arc::clone(&self.player);
        let volume = Arc::clone(&self.volume);
        let metrics = self.metrics.clone();

        let spawned = thread::Builder::new()
            .name("metronome".into())
            .spawn(move || {
                let mut next = Instant::now();
                loop {
                    let vol = f32::from_bits(volume.load(Ordering::Relaxed));
                    play_once(player.as_ref(), &sound, vol, &metrics);

                    next += interval;
                    let now = Instant::now();
                    if next < now {
                        // avspilling tok lenger enn intervallet; ikke ta igjen slag
                        next = now;
                    }
                    match rx.recv_timeout(next - now) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                debug!("Metronom startet: {bpm} bpm ({} ms)", interval.as_millis());
                self.worker = Some(Worker { tx, handle });
            }
            Err(e) => warn!("Klarte ikke starte metronom-tråd: {e}"),
        }
    }

    pub fn retune(&mut self, bpm: u32) {
        if bpm > 0 && bpm != self.current_bpm {
            debug!("Metronom: {} → {bpm} bpm", self.current_bpm);
            self.start(bpm);
        }
    }

    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.tx.send(Command::Stop);
            if worker.handle.join().is_err() {
                warn!("Metronom-tråden avsluttet med panikk");
            }
        }
    }

    /// Spill ett slag nå, på kallerens tråd. Feil logges og telles.
    pub fn play_tick(&self) {
        match &self.sound {
            Some(sound) => play_once(self.player.as_ref(), sound, self.volume(), &self.metrics),
            None => {
                beats_missed_total(&self.metrics).inc();
                warn!("Slag hoppet over: {}", AudioError::Released);
            }
        }
    }

    /// Stopp og slipp bufferen. Kan ikke startes igjen etterpå.
    pub fn release(&mut self) {
        self.stop();
        if self.sound.take().is_some() {
            info!("Metronom frigjort");
        }
    }

    pub fn set_volume(&self, volume: f32) {
        let v = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { DEFAULT_VOLUME };
        self.volume.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    /// Siste bpm som ble startet (beholdes over stopp/pause).
    pub fn current_bpm(&self) -> u32 {
        self.current_bpm
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.sound.is_none()
    }
}

impl Drop for CadenceScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn play_once(player: &dyn TickPlayer, sound: &TickSound, volume: f32, metrics: &Metrics) {
    match player.play(sound.samples(), sound.sample_rate(), volume) {
        Ok(()) => beats_played_total(metrics).inc(),
        Err(e) => {
            // et tapt slag er ikke fatalt for økten
            beats_missed_total(metrics).inc();
            warn!("Slag hoppet over: {e}");
        }
    }
}
