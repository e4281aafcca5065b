//! Configuration module
//!
//! Handles the channel configuration file and optional application settings

mod channels;
mod settings;

pub use channels::{load_channels, parse_channels, parse_channel_line, ConfigError};
pub use settings::{AppConfig, BridgeSettings, LoggingSettings, MonitorSettings, SettingsError};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Default channel configuration file, relative to the working directory
pub const DEFAULT_CHANNEL_FILE: &str = "config.txt";

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "comlink", "Comlink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the settings file
pub fn default_settings_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("settings.toml"))
}
