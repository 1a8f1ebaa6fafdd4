use std::f64::consts::PI;
use std::sync::Arc;

const BASE_FREQ_HZ: f64 = 120.0;
const HARMONIC_FREQ_HZ: f64 = 180.0;
const ATTACK_S: f64 = 0.005;
const HEADROOM: f64 = 0.8;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_TICK_MS: u32 = 80;

/// Myk, lav "dunk": lineær attack (5 ms), eksponentiell decay,
/// grunntone 120 Hz + harmonisk 180 Hz + fallende pitch.
///
/// Ren funksjon: samme input gir alltid samme buffer.
pub fn synthesize(sample_rate: u32, duration_ms: u32) -> Vec<i16> {
    let n = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
    let duration_s = duration_ms as f64 / 1000.0;
    // tidskonstant = 0.3 × resten av lyden etter attack
    let tau = 0.3 * (duration_s - ATTACK_S).max(1e-4);

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 / sample_rate as f64;

        let envelope = if t < ATTACK_S {
            t / ATTACK_S
        } else {
            (-(t - ATTACK_S) / tau).exp()
        };

        let base = (2.0 * PI * BASE_FREQ_HZ * t).sin();
        let harmonic = (2.0 * PI * HARMONIC_FREQ_HZ * t).sin();
        let sweep = (2.0 * PI * (BASE_FREQ_HZ * (1.0 - 2.0 * t)) * t).sin();

        let signal = 0.6 * base + 0.2 * harmonic + 0.2 * sweep;
        out.push(quantize(signal * envelope * HEADROOM));
    }
    out
}

/// [-1, 1] → i16 med metning
fn quantize(x: f64) -> i16 {
    let scaled = (x * i16::MAX as f64).round();
    scaled.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Ferdig syntetisert slag, delt mellom scheduler-trådene uten kopiering.
#[derive(Debug, Clone)]
pub struct TickSound {
    samples: Arc<[i16]>,
    sample_rate: u32,
}

impl TickSound {
    pub fn new(sample_rate: u32, duration_ms: u32) -> Self {
        Self {
            samples: synthesize(sample_rate, duration_ms).into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

impl Default for TickSound {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_TICK_MS)
    }
}
