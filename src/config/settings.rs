//! Application settings
//!
//! Timing knobs and logging options, read from an optional TOML file.
//! Every field has a default so a missing file or section is not an error.

use crate::core::bridge::BridgeOptions;
use crate::core::channel::ChannelOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Settings error types
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("cannot read settings {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bridge timing
    pub bridge: BridgeSettings,
    /// Port monitor timing
    pub monitor: MonitorSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, otherwise from the default location if it
    /// exists, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        if let Some(path) = path {
            return Self::load_from(path);
        }
        match super::default_settings_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Bridge timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Pause after each relayed unit (milliseconds)
    pub yield_ms: u64,
    /// Read timeout slice (milliseconds)
    pub read_timeout_ms: u64,
    /// Write timeout of hardware ports (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            yield_ms: 1,
            read_timeout_ms: 100,
            write_timeout_ms: 2000,
        }
    }
}

impl BridgeSettings {
    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            yield_delay: Duration::from_millis(self.yield_ms),
        }
    }

    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
            write_timeout: Duration::from_millis(self.write_timeout_ms.max(1)),
        }
    }
}

/// Port monitor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Poll interval (milliseconds)
    pub interval_ms: u64,
    /// Blinks per transition
    pub flash_count: u32,
    /// Duration of one blink phase (milliseconds)
    pub flash_ms: u64,
    /// Log lines kept on screen
    pub max_logs: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            flash_count: 3,
            flash_ms: 200,
            max_logs: 100,
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn flash_phase(&self) -> Duration {
        Duration::from_millis(self.flash_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive (e.g. "info", "comlink_core=debug")
    pub level: String,
    /// Directory for daily log files; stderr only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
