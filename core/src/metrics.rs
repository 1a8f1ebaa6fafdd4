use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Tellere for økt, metronom og modell. Én felles instans via [`global`],
/// egne instanser i tester via [`Metrics::new`].
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    fixes_accepted: IntCounter,
    fixes_rejected: IntCounterVec,
    segments_closed: IntCounter,
    beats_played: IntCounter,
    beats_missed: IntCounter,
    model_trainings: IntCounter,
}

static GLOBAL: Lazy<Metrics> = Lazy::new(Metrics::new);

pub fn global() -> &'static Metrics {
    &GLOBAL
}

// Navnene er konstante, så registrering kan bare feile ved programmeringsfeil.
fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("gyldig teller");
    registry.register(Box::new(c.clone())).expect("unik teller");
    c
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("paceline".into()), None).expect("gyldig prefiks");
        let fixes_rejected = IntCounterVec::new(
            Opts::new("fixes_rejected_total", "GPS-punkter forkastet, per årsak"),
            &["reason"],
        )
        .expect("gyldig teller");
        registry
            .register(Box::new(fixes_rejected.clone()))
            .expect("unik teller");

        Self {
            fixes_accepted: counter(&registry, "fixes_accepted_total", "GPS-punkter som ga distanse"),
            segments_closed: counter(&registry, "segments_closed_total", "Fullførte kilometersegmenter"),
            beats_played: counter(&registry, "beats_played_total", "Metronomslag spilt"),
            beats_missed: counter(&registry, "beats_missed_total", "Metronomslag som feilet"),
            model_trainings: counter(&registry, "model_trainings_total", "Treningsrunder for kadensmodellen"),
            fixes_rejected,
            registry,
        }
    }

    /// Prometheus tekstformat
    pub fn gather_text(&self) -> String {
        let mut buf = Vec::new();
        if TextEncoder::new().encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("fixes_accepted", &self.fixes_accepted.get())
            .field("beats_played", &self.beats_played.get())
            .field("beats_missed", &self.beats_missed.get())
            .finish()
    }
}

pub fn fixes_accepted_total(m: &Metrics) -> &IntCounter {
    &m.fixes_accepted
}

/// `reason`: "malformed" | "jitter" | "teleport"
pub fn fixes_rejected_total(m: &Metrics, reason: &str) -> IntCounter {
    m.fixes_rejected.with_label_values(&[reason])
}

pub fn segments_closed_total(m: &Metrics) -> &IntCounter {
    &m.segments_closed
}

pub fn beats_played_total(m: &Metrics) -> &IntCounter {
    &m.beats_played
}

pub fn beats_missed_total(m: &Metrics) -> &IntCounter {
    &m.beats_missed
}

pub fn model_trainings_total(m: &Metrics) -> &IntCounter {
    &m.model_trainings
}
