use thiserror::Error;

/// Feil fra persistenslaget (records, modell-prefs, config).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O-feil mot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ugyldig JSON i {path} ved `{at}`: {source}")]
    Json {
        path: String,
        at: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialisering feilet: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("fant ikke post med id {0}")]
    NotFound(u64),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<String>, err: serde_path_to_error::Error<serde_json::Error>) -> Self {
        StoreError::Json {
            path: path.into(),
            at: err.path().to_string(),
            source: err.into_inner(),
        }
    }
}

/// Feil ved avspilling av et metronom-slag. Svelges alltid av scheduleren.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("lydenhet utilgjengelig: {0}")]
    DeviceUnavailable(String),

    #[error("lydbuffer er frigjort")]
    Released,

    #[error("avspilling feilet: {0}")]
    Playback(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Les og dekod en JSON-fil med sti-informasjon i feilen.
pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> StoreResult<T> {
    let shown = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::io(&shown, e))?;
    let de = &mut serde_json::Deserializer::from_str(&contents);
    serde_path_to_error::deserialize(de).map_err(|e| StoreError::json(&shown, e))
}

/// Skriv JSON (pretty-print) til disk.
pub(crate) fn write_json_file<T: serde::Serialize>(path: &std::path::Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }
    }
    std::fs::write(path, json).map_err(|e| StoreError::io(path.display().to_string(), e))
}
