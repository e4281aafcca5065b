//! # Comlink Core Library
//!
//! Serial port plumbing for two jobs:
//! - Bridging two serial devices, relaying every line from one to the other
//!   in both directions until either side fails
//! - Watching the system's serial ports and reporting hot-plug transitions
//!
//! ## Example
//!
//! ```rust,no_run
//! use comlink_core::{open_pair, BridgeOptions, ChannelMode, ChannelOptions, ChannelSpec, ForwardingPair};
//!
//! fn main() -> anyhow::Result<()> {
//!     let a = ChannelSpec::new("/dev/ttyUSB0", 115200, ChannelMode::ReadWrite);
//!     let b = ChannelSpec::new("/dev/ttyUSB1", 115200, ChannelMode::ReadWrite);
//!     let (a, b) = open_pair(a, b, &ChannelOptions::default())?;
//!
//!     let pair = ForwardingPair::new(&a, &b, BridgeOptions::default())?;
//!     let report = pair.run()?;
//!     println!("relayed {} units", report.total_units());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::bridge::{BridgeError, BridgeOptions, BridgeReport, BridgeState, ForwardingPair};
pub use crate::core::channel::{
    open, open_pair, ChannelError, ChannelMode, ChannelOptions, ChannelSpec, SerialChannel,
};
pub use crate::core::registry::{
    EnumerationError, PortEnumerator, PortRegistry, RegistryEvent, SystemPorts, TransitionEvent,
    TransitionKind,
};
pub use crate::core::virtual_port::VirtualPort;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
