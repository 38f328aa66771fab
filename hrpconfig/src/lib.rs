//! # hrpconfig
//!
//! Typed configuration for the player, loaded from a YAML file with serde
//! defaults for every key:
//!
//! ```yaml
//! device: "hw:1"
//! dop: true
//! cache_size: 268435456
//! cache_files: minimal
//! volume: 70
//! output: "[%n/%N] %d: %f [%i] (%t/%T) (%p)"
//! ```
//!
//! The lookup order is: explicit `--config` path, the directory named by
//! `HRPLAY_CONFIG`, then the user config directory (`~/.config/hrplay/`).
//! A missing file yields the defaults.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const ENV_CONFIG_DIR: &str = "HRPLAY_CONFIG";
const CONFIG_FILE_NAME: &str = "hrplay.yaml";

pub const CACHE_SIZE_MIN: u64 = 4 * 1024 * 1024;
pub const CACHE_SIZE_MAX: u64 = 256 * 1024 * 1024;

pub const DEFAULT_OUTPUT_FORMAT: &str = "[%n/%N] %d: %f [%i] (%t/%T) (%p)";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Ring-buffer scope across the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheFiles {
    /// No read-ahead buffers at all.
    #[default]
    Off,
    /// Buffers on the previous, current and next queue entries.
    Minimal,
    /// Buffers on every entry; non-current ones sit empty at minimum size.
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Preferred output device name.
    pub device: Option<String>,
    /// Force DoP framing for DSD.
    pub dop: bool,
    /// Accept 705.6/768 kHz sample rates.
    pub experimental: bool,
    /// Extra diagnostics.
    pub developer: bool,
    /// Suppress progress output.
    pub quiet: bool,
    /// Print tag metadata before each file.
    pub metadata: bool,
    /// Progress line template.
    pub output: String,
    /// Read-ahead ceiling in bytes; clamped into 4 MiB ..= 256 MiB.
    pub cache_size: u64,
    pub cache_files: CacheFiles,
    /// Startup volume (0..=100); the hardware value is kept when unset.
    pub volume: Option<i32>,
    /// Log filter (tracing EnvFilter syntax).
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            device: None,
            dop: false,
            experimental: false,
            developer: false,
            quiet: false,
            metadata: false,
            output: DEFAULT_OUTPUT_FORMAT.to_string(),
            cache_size: CACHE_SIZE_MAX,
            cache_files: CacheFiles::Off,
            volume: None,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `explicit` or the default lookup locations.
    pub fn load(explicit: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut settings = match path {
            Some(ref p) if p.exists() => {
                tracing::debug!("loading configuration from {}", p.display());
                let text = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&text)?
            }
            _ => Settings::default(),
        };

        settings.validate();
        Ok(settings)
    }

    fn default_path() -> Option<PathBuf> {
        if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE_NAME));
        }
        dirs::config_dir().map(|d| d.join("hrplay").join(CONFIG_FILE_NAME))
    }

    /// Clamp out-of-range values instead of failing the run.
    pub fn validate(&mut self) {
        if self.cache_size != 0 {
            self.cache_size = self.cache_size.clamp(CACHE_SIZE_MIN, CACHE_SIZE_MAX);
        }
        if let Some(v) = self.volume {
            self.volume = Some(v.clamp(0, 100));
        }
        if self.output.is_empty() {
            self.output = DEFAULT_OUTPUT_FORMAT.to_string();
        }
    }
}
