// core/src/recorder.rs
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Datelike, Duration, TimeZone};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{read_json_file, write_json_file, StoreError, StoreResult};
use crate::models::RunningRecord;

/// Antatt kroppsvekt for kaloriestimatet
pub const ASSUMED_BODY_WEIGHT_KG: f64 = 65.0;
const KCAL_PER_KG_KM: f64 = 1.036;

/// Enkel formel: km × kg × 1.036, rundet ned.
pub fn calories_for_distance(distance_m: f64) -> u32 {
    if !(distance_m > 0.0) {
        return 0;
    }
    (distance_m / 1000.0 * ASSUMED_BODY_WEIGHT_KG * KCAL_PER_KG_KM).floor() as u32
}

/// Mandag 00:00 i uken `now_ms` ligger i, i gitt tidssone.
pub fn start_of_week_ms<Tz: TimeZone>(now_ms: i64, tz: &Tz) -> Option<i64> {
    let now = tz.timestamp_millis_opt(now_ms).single()?;
    let monday = now.date_naive() - Duration::days(now.weekday().num_days_from_monday() as i64);
    let midnight = monday.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Grensen mot varig lagring av ferdige økter.
pub trait SessionRecorder: Send + Sync {
    /// Lagre og returner id. `id == 0` gir ny id, ellers erstattes posten.
    fn save(&self, record: RunningRecord) -> StoreResult<u64>;

    /// Alle poster, nyeste først.
    fn load_all(&self) -> StoreResult<Vec<RunningRecord>>;

    fn delete(&self, record: &RunningRecord) -> StoreResult<()>;

    fn delete_all(&self) -> StoreResult<()>;

    fn count(&self) -> StoreResult<usize> {
        Ok(self.load_all()?.len())
    }

    /// Poster som startet i eller etter `start_of_week_ms`, nyeste først.
    fn load_this_week(&self, start_of_week_ms: i64) -> StoreResult<Vec<RunningRecord>> {
        let mut all = self.load_all()?;
        all.retain(|r| r.start_time_ms >= start_of_week_ms);
        Ok(all)
    }

    fn latest(&self) -> StoreResult<Option<RunningRecord>> {
        Ok(self.load_all()?.into_iter().next())
    }

    fn find(&self, id: u64) -> StoreResult<Option<RunningRecord>> {
        Ok(self.load_all()?.into_iter().find(|r| r.id == id))
    }
}

/// Det som faktisk ligger på disk / i minnet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordBook {
    next_id: u64,
    records: Vec<RunningRecord>,
}

impl RecordBook {
    fn insert(&mut self, mut record: RunningRecord) -> u64 {
        if record.id == 0 {
            self.next_id = self.next_id.max(self.max_id()) + 1;
            record.id = self.next_id;
        } else {
            self.next_id = self.next_id.max(record.id);
        }
        let id = record.id;
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        id
    }

    fn remove(&mut self, id: u64) -> StoreResult<()> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn max_id(&self) -> u64 {
        self.records.iter().map(|r| r.id).max().unwrap_or(0)
    }

    fn newest_first(&self) -> Vec<RunningRecord> {
        let mut out = self.records.clone();
        out.sort_by_key(|r| Reverse((r.start_time_ms, r.id)));
        out
    }
}

/// Recorder i minnet.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    book: Mutex<RecordBook>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRecorder for MemoryRecorder {
    fn save(&self, record: RunningRecord) -> StoreResult<u64> {
        let mut book = self.book.lock().unwrap_or_else(|p| p.into_inner());
        Ok(book.insert(record))
    }

    fn load_all(&self) -> StoreResult<Vec<RunningRecord>> {
        let book = self.book.lock().unwrap_or_else(|p| p.into_inner());
        Ok(book.newest_first())
    }

    fn delete(&self, record: &RunningRecord) -> StoreResult<()> {
        let mut book = self.book.lock().unwrap_or_else(|p| p.into_inner());
        book.remove(record.id)
    }

    fn delete_all(&self) -> StoreResult<()> {
        let mut book = self.book.lock().unwrap_or_else(|p| p.into_inner());
        book.records.clear();
        Ok(())
    }

    fn count(&self) -> StoreResult<usize> {
        let book = self.book.lock().unwrap_or_else(|p| p.into_inner());
        Ok(book.records.len())
    }
}

/// Alle poster i én JSON-fil. Hele filen leses og skrives per operasjon.
#[derive(Debug)]
pub struct JsonFileRecorder {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_book(&self) -> StoreResult<RecordBook> {
        if !self.path.exists() {
            debug!("Fant ikke {}, starter med tom historikk", self.path.display());
            return Ok(RecordBook::default());
        }
        read_json_file(&self.path)
    }

    fn modify<T>(&self, f: impl FnOnce(&mut RecordBook) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut book = self.read_book()?;
        let out = f(&mut book)?;
        write_json_file(&self.path, &book)?;
        Ok(out)
    }
}

impl SessionRecorder for JsonFileRecorder {
    fn save(&self, record: RunningRecord) -> StoreResult<u64> {
        let distance = record.total_distance_meters;
        let id = self.modify(|book| Ok(book.insert(record)))?;
        info!("Økt {id} lagret til {} ({:.2} km)", self.path.display(), distance / 1000.0);
        Ok(id)
    }

    fn load_all(&self) -> StoreResult<Vec<RunningRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(self.read_book()?.newest_first())
    }

    fn delete(&self, record: &RunningRecord) -> StoreResult<()> {
        self.modify(|book| book.remove(record.id))
    }

    fn delete_all(&self) -> StoreResult<()> {
        self.modify(|book| {
            book.records.clear();
            Ok(())
        })?;
        info!("All historikk slettet fra {}", self.path.display());
        Ok(())
    }
}
