use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reefid_engine::{
    system_clock, AnalysisSettings, AtomicFileWriter, BatchSettings, ClientSettings, EngineConfig,
};
use reefid_logging::LogSettings;
use serde::{Deserialize, Serialize};

/// Settings read from the RON config file. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientSettings,
    pub store_dir: PathBuf,
    pub library_dir: PathBuf,
    /// Upper bound for loading a photo from the library, in seconds.
    pub fetch_deadline_secs: u64,
    pub cache_failed_bytes: bool,
    pub log: LogSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientSettings::default(),
            store_dir: PathBuf::from("./reefid/pending"),
            library_dir: PathBuf::from("./reefid/photos"),
            fetch_deadline_secs: 30,
            cache_failed_bytes: true,
            log: LogSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn engine_config(&self) -> EngineConfig {
        let fetch_deadline = Duration::from_secs(self.fetch_deadline_secs);
        EngineConfig {
            client: self.client.clone(),
            analysis: AnalysisSettings {
                fetch_deadline,
                cache_failed_bytes: self.cache_failed_bytes,
            },
            batch: BatchSettings { fetch_deadline },
            store_dir: self.store_dir.clone(),
            library_dir: self.library_dir.clone(),
            clock: system_clock(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },
}

/// Loads `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(AppConfig::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    ron::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<PathBuf> {
    let pretty = ron::ser::PrettyConfig::new();
    let content = ron::ser::to_string_pretty(config, pretty)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("config path {:?} has no file name", path))?;
    let written = AtomicFileWriter::new(dir).write(filename, content.as_bytes())?;
    Ok(written)
}
