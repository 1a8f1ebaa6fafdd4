// core/src/storage.rs
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::error::{read_json_file, write_json_file, StoreResult};

/// Nøkkel/verdi-lager for lært modelltilstand, delt i navnerom.
///
/// `get` feiler aldri: manglende eller ødelagt data gir `None`, og kalleren
/// faller tilbake til default.
pub trait PrefsStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Option<String>;

    /// Skriv alle nøklene samlet (en modell lagres som én enhet).
    fn put_all(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()>;

    fn clear(&self, namespace: &str) -> StoreResult<()>;
}

/// Prefs i minnet. Brukes i tester og når ingenting skal overleve prosessen.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    data: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sett én rå verdi (for å simulere ødelagt lagring i tester).
    pub fn put_raw(&self, namespace: &str, key: &str, value: &str) {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

impl PrefsStore for MemoryPrefs {
    fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        data.get(namespace).and_then(|ns| ns.get(key)).cloned()
    }

    fn put_all(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        let ns = data.entry(namespace.to_string()).or_default();
        for (k, v) in entries {
            ns.insert((*k).to_string(), v.clone());
        }
        Ok(())
    }

    fn clear(&self, namespace: &str) -> StoreResult<()> {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        data.remove(namespace);
        Ok(())
    }
}

/// Én JSON-fil per navnerom (`<dir>/<namespace>.json`), pretty-printet.
#[derive(Debug)]
pub struct JsonFilePrefs {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFilePrefs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), write_lock: Mutex::new(()) }
    }

    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }

    fn read_namespace(&self, path: &Path) -> Option<BTreeMap<String, String>> {
        if !path.exists() {
            debug!("Fant ikke {}, bruker tomme prefs", path.display());
            return None;
        }
        match read_json_file::<BTreeMap<String, String>>(path) {
            Ok(map) => Some(map),
            Err(e) => {
                warn!("Klarte ikke lese prefs ({e}), faller tilbake til default");
                None
            }
        }
    }
}

impl PrefsStore for JsonFilePrefs {
    fn get(&self, namespace: &str, key: &str) -> Option<String> {
        self.read_namespace(&self.path_for(namespace))
            .and_then(|mut map| map.remove(key))
    }

    fn put_all(&self, namespace: &str, entries: &[(&str, String)]) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.path_for(namespace);
        let mut map = self.read_namespace(&path).unwrap_or_default();
        for (k, v) in entries {
            map.insert((*k).to_string(), v.clone());
        }
        write_json_file(&path, &map)?;
        info!("Prefs lagret til {} ({} nøkler)", path.display(), map.len());
        Ok(())
    }

    fn clear(&self, namespace: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.path_for(namespace);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::error::StoreError::io(path.display().to_string(), e)),
        }
    }
}
