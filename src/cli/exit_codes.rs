//! CLI Exit Codes
//!
//! Stable process exit codes so scripts can tell failure classes apart.

use crate::config::{ConfigError, SettingsError};
use crate::core::bridge::BridgeError;
use crate::core::channel::ChannelError;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// A bridged channel failed while relaying
    pub const LINK_LOST: u8 = 9;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// Exit code for an error that ended the process
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<SettingsError>().is_some()
    {
        return ExitCodes::CONFIG_ERROR;
    }
    if let Some(e) = err.downcast_ref::<ChannelError>() {
        return match e {
            ChannelError::Connection { .. } => ExitCodes::CONNECTION_FAILED,
            ChannelError::Read { .. } | ChannelError::Write { .. } => ExitCodes::LINK_LOST,
        };
    }
    match err.downcast_ref::<BridgeError>() {
        Some(BridgeError::NoViableDirection { .. }) => ExitCodes::CONFIG_ERROR,
        Some(BridgeError::AlreadyRunning | BridgeError::Spawn(_)) => ExitCodes::INTERNAL_ERROR,
        None => ExitCodes::ERROR,
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        3 => "Connection failed",
        8 => "Configuration error",
        9 => "Link lost",
        127 => "Internal error",
        _ => "Unknown error",
    }
}
