use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory of the local archive (overrides XDG default).
    pub archive_root: Option<PathBuf>,
    /// Default hydrophone name for commands that omit one.
    pub hydrophone: Option<String>,
    /// Number of parallel transform workers. 0 = auto-detect
    /// (cores / 2, min 1).
    pub workers: usize,
    /// Amplitude reference level for dB conversion.
    pub ref_level: f64,
}

impl AppConfig {
    /// Load config from `~/.config/hydronoise/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Amplitude reference, defaulting to 1.0 (full scale).
    pub fn resolve_ref_level(&self) -> f64 {
        if self.ref_level > 0.0 {
            self.ref_level
        } else {
            1.0
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default archive root using XDG data directory.
pub fn default_archive_root() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir().join("archive");
        std::fs::create_dir_all(&data_dir).ok();
        data_dir
    } else {
        // Fallback: current directory
        PathBuf::from("archive")
    }
}
