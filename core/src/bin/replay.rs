// core/src/bin/replay.rs
//! Spill av et GPS-spor (CSV: lat,lon,t_ms) gjennom trackeren med simulert klokke.
//!
//! ```bash
//! paceline-replay spor.csv --target 360
//! paceline-replay spor.csv --target 360 --data-dir ./data --train
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde::Deserialize;

use paceline_core::{
    load_config, session_report, CadenceScheduler, FatigueModel, JsonFilePrefs, JsonFileRecorder, LocationFix,
    ManualClock, MemoryRecorder, NoopLocationSource, SessionRecorder, SessionTracker, SilentPlayer, TickSound,
};

#[derive(Parser)]
#[command(name = "paceline-replay", about = "Replay a GPS trace through the session tracker")]
struct ReplayArgs {
    /// CSV-fil med kolonnene lat,lon,t_ms
    trace: PathBuf,

    /// Mål-pace i sekunder per km
    #[arg(long, default_value_t = 390)]
    target: u32,

    /// TrackerConfig som JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Katalog for lagret modell og økthistorikk (ellers kun i minnet)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Tren modellen på historikken etter avspilling
    #[arg(long)]
    train: bool,
}

#[derive(Debug, Deserialize)]
struct TraceRow {
    lat: f64,
    lon: f64,
    t_ms: i64,
}

fn read_trace(path: &Path) -> Result<Vec<LocationFix>> {
    let mut rdr = csv::Reader::from_path(path).with_context(|| format!("kunne ikke åpne {}", path.display()))?;
    let mut fixes = Vec::new();
    for (i, row) in rdr.deserialize::<TraceRow>().enumerate() {
        let row = row.with_context(|| format!("ugyldig rad {} i {}", i + 1, path.display()))?;
        fixes.push(LocationFix::new(row.lat, row.lon, row.t_ms));
    }
    Ok(fixes)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = ReplayArgs::parse();

    let config = match &args.config {
        Some(p) => load_config(p)?,
        None => Default::default(),
    };
    let fixes = read_trace(&args.trace)?;
    let Some(first) = fixes.first() else {
        bail!("sporet {} er tomt", args.trace.display());
    };

    let (model, recorder): (FatigueModel, Arc<dyn SessionRecorder>) = match &args.data_dir {
        Some(dir) => (
            FatigueModel::load(Arc::new(JsonFilePrefs::new(dir))),
            Arc::new(JsonFileRecorder::new(dir.join("records.json"))) as Arc<dyn SessionRecorder>,
        ),
        None => (FatigueModel::in_memory(), Arc::new(MemoryRecorder::new()) as Arc<dyn SessionRecorder>),
    };
    let model = model.into_shared();

    let clock = ManualClock::new(first.timestamp_ms);
    let scheduler = CadenceScheduler::new(
        Arc::new(SilentPlayer),
        TickSound::new(config.sample_rate, config.tick_duration_ms),
    );
    let tracker = SessionTracker::new(
        config,
        Arc::clone(&model),
        scheduler,
        Arc::new(NoopLocationSource),
        Some(Arc::clone(&recorder)),
        Arc::new(clock.clone()),
    );

    if !tracker.start(args.target) {
        bail!("kunne ikke starte økt med mål-pace {}", args.target);
    }
    for fix in &fixes {
        clock.set(fix.timestamp_ms);
        tracker.on_location_fix(*fix);
    }
    let summary = tracker.stop().context("økten var allerede stoppet")?;
    print!("{}", session_report(&summary));

    if args.train {
        let records = recorder.load_all()?;
        let mut guard = model.write().unwrap_or_else(|p| p.into_inner());
        let outcome = guard.train(&records);
        info!("Trening: {} økter brukt", outcome.consumed);
        println!(
            "Model: {} sessions, stride {:.3} m, curve {:?}",
            guard.training_count(),
            guard.stride_length(),
            guard.curve().values()
        );
    }
    Ok(())
}
