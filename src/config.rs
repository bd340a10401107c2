//! Persistent configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

const APP_DIR_NAME: &str = "queuekeeper";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Where playlist documents and the catalog live.
    pub storage: StorageConfig,
    #[serde(default)]
    /// Queue behavior.
    pub queue: QueueConfig,
    #[serde(default)]
    /// Logging preferences.
    pub log: LogConfig,
}

/// File locations for persisted state.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct StorageConfig {
    /// Directory holding every document. Defaults to the platform data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_playlists_file")]
    pub playlists_file: String,
    #[serde(default = "default_most_played_file")]
    pub most_played_file: String,
    /// Track list served by the in-process engine.
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
}

/// Queue connection preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct QueueConfig {
    /// Catalog node fetched in bulk while connecting.
    #[serde(default = "default_catalog_root_id")]
    pub catalog_root_id: String,
    /// Maximum recently-played entries. 0 keeps everything.
    #[serde(default = "default_recently_played_limit")]
    pub recently_played_limit: usize,
    /// Request a background flush after each track transition.
    #[serde(default = "default_true")]
    pub flush_on_transition: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            playlists_file: default_playlists_file(),
            most_played_file: default_most_played_file(),
            catalog_file: default_catalog_file(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            catalog_root_id: default_catalog_root_id(),
            recently_played_limit: default_recently_played_limit(),
            flush_on_transition: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_playlists_file() -> String {
    "playlists.json".to_string()
}

fn default_most_played_file() -> String {
    "most_played.json".to_string()
}

fn default_catalog_file() -> String {
    "catalog.json".to_string()
}

fn default_catalog_root_id() -> String {
    "root".to_string()
}

fn default_recently_played_limit() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl StorageConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
        })
    }

    pub fn playlists_path(&self) -> PathBuf {
        self.data_dir().join(&self.playlists_file)
    }

    pub fn most_played_path(&self) -> PathBuf {
        self.data_dir().join(&self.most_played_file)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir().join(&self.catalog_file)
    }
}

impl LogConfig {
    /// Parsed level filter, falling back to `Info` for unknown names.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Default location of `config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join("config.toml")
}

fn replace_blank(value: &mut String, default: fn() -> String) {
    if value.trim().is_empty() {
        *value = default();
    }
}

/// Clamps values that would make the queue misbehave.
pub fn sanitize_config(mut config: Config) -> Config {
    replace_blank(&mut config.queue.catalog_root_id, default_catalog_root_id);
    replace_blank(&mut config.storage.playlists_file, default_playlists_file);
    replace_blank(&mut config.storage.most_played_file, default_most_played_file);
    replace_blank(&mut config.storage.catalog_file, default_catalog_file);
    config
}

/// Loads `path`, writing a default file first if none exists. A file that
/// fails to parse falls back to defaults.
pub fn load_config(path: &Path) -> Config {
    if !path.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!("Failed to create config directory {}: {}", parent.display(), err);
            }
        }
        match toml::to_string(&Config::default()) {
            Ok(text) => {
                if let Err(err) = std::fs::write(path, text) {
                    warn!("Failed to write default config {}: {}", path.display(), err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
        return Config::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read config {}: {}", path.display(), err);
            return Config::default();
        }
    };
    let config = toml::from_str::<Config>(&content).unwrap_or_else(|err| {
        warn!("Config {} is invalid, using defaults: {}", path.display(), err);
        Config::default()
    });
    sanitize_config(config)
}
