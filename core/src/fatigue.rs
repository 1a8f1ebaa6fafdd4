// core/src/fatigue.rs
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::metrics::{model_trainings_total, Metrics};
use crate::metronome::bpm_for_pace;
use crate::models::{RecordContext, RunningRecord};
use crate::storage::{MemoryPrefs, PrefsStore};

pub const CURVE_BUCKETS: usize = 10;

/// Standardkurve: 5 % raskere enn mål i starten, 5 % roligere mot slutten.
pub const DEFAULT_CURVE: [f64; CURVE_BUCKETS] =
    [0.95, 0.96, 0.97, 0.98, 1.00, 1.01, 1.02, 1.03, 1.04, 1.05];
pub const DEFAULT_STRIDE_M: f64 = 0.8;
pub const DEFAULT_EXPECTED_DISTANCE_M: f64 = 5000.0;

pub const LEARNING_RATE: f64 = 0.1;
pub const CURVE_MIN: f64 = 0.5;
pub const CURVE_MAX: f64 = 2.0;

/// Kortere økter sier lite om fatigue
const MIN_TRAINING_DISTANCE_M: f64 = 500.0;
const STEPS_PER_SECOND: f64 = 3.0;
const MIN_ESTIMATED_STEPS: f64 = 100.0;
const STRIDE_PLAUSIBLE: (f64, f64) = (0.5, 1.5);
const STRIDE_LOADABLE: (f64, f64) = (0.3, 2.0);
const ENOUGH_DATA_COUNT: u32 = 5;

pub const MODEL_NAMESPACE: &str = "pace_prediction_model";
const KEY_FATIGUE_PATTERN: &str = "fatigue_pattern";
const KEY_STRIDE_LENGTH: &str = "stride_length";
const KEY_TRAINING_COUNT: &str = "training_count";
const KEY_DAY_CONDITION: &str = "day_condition";
const KEY_HOUR_CONDITION: &str = "hour_condition";
const KEY_SEASON_CONDITION: &str = "season_condition";
const KEY_WEEKEND_CONDITION: &str = "weekend_condition";
const KEY_WEEKDAY_CONDITION: &str = "weekday_condition";

/// 10 pace-multiplikatorer, én per 10 % progresjon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FatigueCurve([f64; CURVE_BUCKETS]);

impl Default for FatigueCurve {
    fn default() -> Self {
        FatigueCurve(DEFAULT_CURVE)
    }
}

impl FatigueCurve {
    /// Gyldig kurve: 10 endelige, positive verdier.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.len() != CURVE_BUCKETS || values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return None;
        }
        let mut out = [0.0; CURVE_BUCKETS];
        out.copy_from_slice(values);
        Some(FatigueCurve(out))
    }

    pub fn values(&self) -> &[f64; CURVE_BUCKETS] {
        &self.0
    }

    pub fn mean(&self) -> f64 {
        self.0.iter().sum::<f64>() / CURVE_BUCKETS as f64
    }

    /// Lineær interpolasjon mellom bøttesentre; bøtte i ligger på (i + 0.5) / 10.
    /// Før første og etter siste senter holdes endeverdien.
    pub fn multiplier_at(&self, progress: f64) -> f64 {
        let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
        let mut x = (progress * CURVE_BUCKETS as f64 - 0.5).clamp(0.0, (CURVE_BUCKETS - 1) as f64);
        // treff på et senter skal gi bøtteverdien eksakt
        let nearest = x.round();
        if (x - nearest).abs() < 1e-9 {
            x = nearest;
        }
        let lo = x.floor() as usize;
        let hi = (lo + 1).min(CURVE_BUCKETS - 1);
        let frac = x - lo as f64;
        self.0[lo] * (1.0 - frac) + self.0[hi] * frac
    }

    /// Klem til [0.5, 2.0] og del på snittet slik at snittet blir 1.0.
    fn normalize(&mut self) {
        for v in self.0.iter_mut() {
            *v = v.clamp(CURVE_MIN, CURVE_MAX);
        }
        let mean = self.mean();
        if !(mean.is_finite() && mean > 0.0) {
            warn!("Fatigue-kurven ble ugyldig (snitt={mean}), nullstiller");
            *self = FatigueCurve::default();
            return;
        }
        for v in self.0.iter_mut() {
            *v /= mean;
        }
        if self.0.iter().all(|v| (CURVE_MIN..=CURVE_MAX).contains(v)) {
            return;
        }

        // Klemming og deling drar hver sin vei her. Finn skala s slik at
        // snittet av clamp(v * s) er 1.0 (monoton i s, så bisection holder).
        let base = self.0;
        let scaled = |s: f64| base.map(|v| (v * s).clamp(CURVE_MIN, CURVE_MAX));
        let min_v = base.iter().copied().fold(f64::INFINITY, f64::min);
        let (mut lo, mut hi) = (0.0, CURVE_MAX / min_v);
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if FatigueCurve(scaled(mid)).mean() < 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        self.0 = scaled(0.5 * (lo + hi));
    }
}

/// Kondisjonsfaktorer per ukedag / tidsblokk / årstid / helg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub day_of_week: [f64; 7],
    pub hour_block: [f64; 6],
    pub season: [f64; 4],
    pub weekend: f64,
    pub weekday: f64,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            day_of_week: [1.0; 7],
            hour_block: [1.0; 6],
            season: [1.0; 4],
            weekend: 1.0,
            weekday: 1.0,
        }
    }
}

/// All lært tilstand; det eneste som overlever mellom økter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub curve: FatigueCurve,
    pub stride_m: f64,
    pub training_count: u32,
    pub conditions: Conditions,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            curve: FatigueCurve::default(),
            stride_m: DEFAULT_STRIDE_M,
            training_count: 0,
            conditions: Conditions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainingOutcome {
    /// Poster som passerte filtrene (mål-pace > 0, distanse ≥ 500 m)
    pub consumed: usize,
    pub buckets_updated: usize,
    pub stride_updated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionLevel {
    Excellent,
    Good,
    Normal,
    Fair,
    Poor,
}

impl ConditionLevel {
    pub fn from_multiplier(m: f64) -> Self {
        if m < 0.95 {
            ConditionLevel::Excellent
        } else if m < 1.0 {
            ConditionLevel::Good
        } else if m < 1.05 {
            ConditionLevel::Normal
        } else if m < 1.1 {
            ConditionLevel::Fair
        } else {
            ConditionLevel::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionAnalysis {
    pub context: RecordContext,
    pub multiplier: f64,
    pub level: ConditionLevel,
    pub has_enough_data: bool,
}

/// Adaptiv kadensmodell: fatigue-kurve + skrittlengde (+ kondisjon),
/// lastet fra og lagret til et [`PrefsStore`].
#[derive(Clone)]
pub struct FatigueModel {
    state: ModelState,
    store: Arc<dyn PrefsStore>,
    metrics: Metrics,
}

impl std::fmt::Debug for FatigueModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatigueModel").field("state", &self.state).finish()
    }
}

/// Modell delt mellom tracker og bakgrunnstrening.
pub type SharedModel = Arc<RwLock<FatigueModel>>;

impl FatigueModel {
    /// Last fra lager. Manglende eller ødelagte nøkler gir default per nøkkel.
    pub fn load(store: Arc<dyn PrefsStore>) -> Self {
        let state = load_state(store.as_ref());
        debug!(
            "Modell lastet: count={}, stride={:.3}",
            state.training_count, state.stride_m
        );
        Self {
            state,
            store,
            metrics: crate::metrics::global().clone(),
        }
    }

    /// Modell uten varig lagring.
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryPrefs::new()))
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn into_shared(self) -> SharedModel {
        Arc::new(RwLock::new(self))
    }

    /// Kadens for nåværende punkt i økten. 0 hvis mål-pace er 0.
    pub fn infer(&self, target_pace_sec_per_km: u32, current_distance_m: f64, expected_total_m: f64) -> u32 {
        if target_pace_sec_per_km == 0 {
            return 0;
        }
        let total = if expected_total_m > 0.0 { expected_total_m } else { DEFAULT_EXPECTED_DISTANCE_M };
        let progress = current_distance_m / total;
        let multiplier = self.state.curve.multiplier_at(progress);
        bpm_for_pace(target_pace_sec_per_km as f64 * multiplier, self.state.stride_m)
    }

    /// Kadens uten fatigue-justering (kun skrittlengde).
    pub fn simple_bpm(&self, target_pace_sec_per_km: u32) -> u32 {
        bpm_for_pace(target_pace_sec_per_km as f64, self.state.stride_m)
    }

    /// Lær av tidligere økter. Rekkefølge- og historikkavhengig, ikke idempotent.
    pub fn train(&mut self, records: &[RunningRecord]) -> TrainingOutcome {
        let mut outcome = TrainingOutcome::default();
        if records.is_empty() {
            return outcome;
        }

        let mut bucket_sum = [0.0f64; CURVE_BUCKETS];
        let mut bucket_n = [0u32; CURVE_BUCKETS];
        let mut acc = ConditionAccumulator::default();
        let mut stride = self.state.stride_m;

        for record in records {
            let target = record.target_pace_sec_per_km as f64;
            if target <= 0.0 || record.total_distance_meters < MIN_TRAINING_DISTANCE_M {
                debug!(
                    "Hopper over post {} (mål={}, distanse={:.0} m)",
                    record.id, record.target_pace_sec_per_km, record.total_distance_meters
                );
                continue;
            }
            outcome.consumed += 1;

            if record.average_pace_sec_per_km > 0 {
                acc.add(&record.context(), record.average_pace_sec_per_km as f64 / target);
            }

            let n = record.segments.len();
            for (i, seg) in record.segments.iter().enumerate() {
                let progress = (i as f64 + 0.5) / n as f64;
                let bucket = ((progress * CURVE_BUCKETS as f64).floor() as usize).min(CURVE_BUCKETS - 1);
                bucket_sum[bucket] += seg.pace_sec_per_km as f64 / target;
                bucket_n[bucket] += 1;
            }

            // grovt skrittestimat: 3 skritt/sek
            let steps = record.total_time_ms as f64 / 1000.0 * STEPS_PER_SECOND;
            if steps > MIN_ESTIMATED_STEPS {
                let estimated = record.total_distance_meters / steps;
                if (STRIDE_PLAUSIBLE.0..=STRIDE_PLAUSIBLE.1).contains(&estimated) {
                    stride = stride * 0.9 + estimated * 0.1;
                    outcome.stride_updated = true;
                }
            }
        }

        if outcome.consumed == 0 {
            info!("Trening: ingen brukbare poster av {}", records.len());
            return outcome;
        }

        let mut curve = self.state.curve;
        for i in 0..CURVE_BUCKETS {
            if bucket_n[i] > 0 {
                let observed = bucket_sum[i] / bucket_n[i] as f64;
                curve.0[i] = curve.0[i] * (1.0 - LEARNING_RATE) + observed * LEARNING_RATE;
                outcome.buckets_updated += 1;
            }
        }
        curve.normalize();

        self.state.curve = curve;
        self.state.stride_m = stride;
        acc.blend_into(&mut self.state.conditions);
        self.state.training_count = self.state.training_count.saturating_add(outcome.consumed as u32);
        model_trainings_total(&self.metrics).inc();

        info!(
            "Modell trent på {} poster ({} bøtter, stride={:.3} m, count={})",
            outcome.consumed, outcome.buckets_updated, self.state.stride_m, self.state.training_count
        );
        self.persist();
        outcome
    }

    /// Tilbake til innebygd default, og lagre.
    pub fn reset(&mut self) {
        self.state = ModelState::default();
        info!("Modell nullstilt");
        self.persist();
    }

    pub fn save(&self) -> crate::error::StoreResult<()> {
        let s = &self.state;
        let entries = [
            (KEY_FATIGUE_PATTERN, serde_json::to_string(&s.curve.0.to_vec())?),
            (KEY_STRIDE_LENGTH, serde_json::to_string(&s.stride_m)?),
            (KEY_TRAINING_COUNT, s.training_count.to_string()),
            (KEY_DAY_CONDITION, serde_json::to_string(&s.conditions.day_of_week.to_vec())?),
            (KEY_HOUR_CONDITION, serde_json::to_string(&s.conditions.hour_block.to_vec())?),
            (KEY_SEASON_CONDITION, serde_json::to_string(&s.conditions.season.to_vec())?),
            (KEY_WEEKEND_CONDITION, serde_json::to_string(&s.conditions.weekend)?),
            (KEY_WEEKDAY_CONDITION, serde_json::to_string(&s.conditions.weekday)?),
        ];
        self.store.put_all(MODEL_NAMESPACE, &entries)
    }

    // lagringsfeil er ikke fatale; modellen i minnet er fortsatt gyldig
    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Klarte ikke lagre modell: {e}");
        }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn curve(&self) -> &FatigueCurve {
        &self.state.curve
    }

    pub fn stride_length(&self) -> f64 {
        self.state.stride_m
    }

    pub fn training_count(&self) -> u32 {
        self.state.training_count
    }

    pub fn has_trained_model(&self) -> bool {
        self.state.training_count > 0
    }

    /// Samlet kondisjonsfaktor for en kontekst, [0.8, 1.2]. 1.0 uten trening.
    pub fn condition_multiplier(&self, ctx: &RecordContext) -> f64 {
        if self.state.training_count == 0 {
            return 1.0;
        }
        let c = &self.state.conditions;
        let mut m = c.day_of_week[(ctx.day_of_week as usize).min(6)]
            * c.hour_block[ctx.hour_block()]
            * c.season[ctx.season.index()]
            * if ctx.is_weekend { c.weekend } else { c.weekday };

        let baseline = mean(&c.day_of_week)
            * mean(&c.hour_block)
            * mean(&c.season)
            * (c.weekend + c.weekday)
            / 2.0;
        if baseline > 0.0 {
            m /= baseline;
        }
        m.clamp(0.8, 1.2)
    }

    /// Forventet tid (ms) for distansen i gitt kontekst. 0 for ugyldig input.
    pub fn predict_finish_time_ms(&self, distance_m: f64, target_pace_sec_per_km: u32, ctx: &RecordContext) -> i64 {
        if target_pace_sec_per_km == 0 || !(distance_m > 0.0) {
            return 0;
        }
        let adjusted = target_pace_sec_per_km as f64 * self.condition_multiplier(ctx);
        // sek/km × m = ms
        (adjusted * distance_m).round() as i64
    }

    pub fn condition_analysis(&self, ctx: &RecordContext) -> ConditionAnalysis {
        let multiplier = self.condition_multiplier(ctx);
        ConditionAnalysis {
            context: *ctx,
            multiplier,
            level: ConditionLevel::from_multiplier(multiplier),
            has_enough_data: self.state.training_count >= ENOUGH_DATA_COUNT,
        }
    }

    /// Ukedagsfaktorer, søndag først.
    pub fn day_conditions(&self) -> [f64; 7] {
        self.state.conditions.day_of_week
    }

    pub fn hour_block_conditions(&self) -> [f64; 6] {
        self.state.conditions.hour_block
    }
}

/// Tren en kopi av modellen på egen tråd og bytt den inn når den er ferdig.
/// Trackeren leser videre fra den gamle modellen så lenge treningen pågår.
pub fn train_in_background(
    shared: SharedModel,
    records: Vec<RunningRecord>,
) -> std::io::Result<JoinHandle<TrainingOutcome>> {
    thread::Builder::new().name("model-training".into()).spawn(move || {
        let mut candidate = match shared.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let outcome = candidate.train(&records);
        if outcome.consumed > 0 {
            let mut guard = shared.write().unwrap_or_else(|p| p.into_inner());
            *guard = candidate;
        }
        outcome
    })
}

#[derive(Default)]
struct ConditionAccumulator {
    day: [(f64, u32); 7],
    hour: [(f64, u32); 6],
    season: [(f64, u32); 4],
    weekend: (f64, u32),
    weekday: (f64, u32),
}

impl ConditionAccumulator {
    fn add(&mut self, ctx: &RecordContext, ratio: f64) {
        fn push(slot: &mut (f64, u32), ratio: f64) {
            slot.0 += ratio;
            slot.1 += 1;
        }
        push(&mut self.day[(ctx.day_of_week as usize).min(6)], ratio);
        push(&mut self.hour[ctx.hour_block()], ratio);
        push(&mut self.season[ctx.season.index()], ratio);
        if ctx.is_weekend {
            push(&mut self.weekend, ratio);
        } else {
            push(&mut self.weekday, ratio);
        }
    }

    fn blend_into(&self, c: &mut Conditions) {
        fn blend(value: &mut f64, slot: (f64, u32)) {
            if slot.1 > 0 {
                *value = *value * (1.0 - LEARNING_RATE) + (slot.0 / slot.1 as f64) * LEARNING_RATE;
            }
        }
        for (v, s) in c.day_of_week.iter_mut().zip(self.day) {
            blend(v, s);
        }
        for (v, s) in c.hour_block.iter_mut().zip(self.hour) {
            blend(v, s);
        }
        for (v, s) in c.season.iter_mut().zip(self.season) {
            blend(v, s);
        }
        blend(&mut c.weekend, self.weekend);
        blend(&mut c.weekday, self.weekday);
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn load_state(store: &dyn PrefsStore) -> ModelState {
    let mut state = ModelState::default();

    if let Some(curve) = load_array::<CURVE_BUCKETS>(store, KEY_FATIGUE_PATTERN).and_then(|v| FatigueCurve::from_values(&v)) {
        state.curve = curve;
    }
    if let Some(stride) = load_scalar(store, KEY_STRIDE_LENGTH) {
        if (STRIDE_LOADABLE.0..=STRIDE_LOADABLE.1).contains(&stride) {
            state.stride_m = stride;
        } else {
            warn!("Lagret skrittlengde {stride} er urimelig, bruker default");
        }
    }
    if let Some(raw) = store.get(MODEL_NAMESPACE, KEY_TRAINING_COUNT) {
        match raw.trim().parse::<u32>() {
            Ok(n) => state.training_count = n,
            Err(e) => warn!("Ugyldig {KEY_TRAINING_COUNT} ({e}), bruker 0"),
        }
    }
    if let Some(v) = load_array::<7>(store, KEY_DAY_CONDITION) {
        state.conditions.day_of_week = v;
    }
    if let Some(v) = load_array::<6>(store, KEY_HOUR_CONDITION) {
        state.conditions.hour_block = v;
    }
    if let Some(v) = load_array::<4>(store, KEY_SEASON_CONDITION) {
        state.conditions.season = v;
    }
    if let Some(v) = load_scalar(store, KEY_WEEKEND_CONDITION) {
        state.conditions.weekend = v;
    }
    if let Some(v) = load_scalar(store, KEY_WEEKDAY_CONDITION) {
        state.conditions.weekday = v;
    }
    state
}

fn load_array<const N: usize>(store: &dyn PrefsStore, key: &str) -> Option<[f64; N]> {
    let raw = store.get(MODEL_NAMESPACE, key)?;
    let de = &mut serde_json::Deserializer::from_str(&raw);
    let values: Vec<f64> = match serde_path_to_error::deserialize(de) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ugyldig {key} ved `{}`: {}, bruker default", e.path(), e.inner());
            return None;
        }
    };
    if values.len() != N || values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
        warn!("{key} har {} verdier (forventet {N} positive), bruker default", values.len());
        return None;
    }
    let mut out = [0.0; N];
    out.copy_from_slice(&values);
    Some(out)
}

fn load_scalar(store: &dyn PrefsStore, key: &str) -> Option<f64> {
    let raw = store.get(MODEL_NAMESPACE, key)?;
    match serde_json::from_str::<f64>(raw.trim()) {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        Ok(v) => {
            warn!("Ugyldig {key}={v}, bruker default");
            None
        }
        Err(e) => {
            warn!("Ugyldig {key} ({e}), bruker default");
            None
        }
    }
}
