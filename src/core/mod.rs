//! Core module containing the bridging and monitoring engines
//!
//! This module provides:
//! - Serial channels with line-delimited receive and idempotent close
//! - The forwarding pair that relays units between two channels
//! - The port registry that turns port snapshots into hot-plug transitions
//! - Virtual serial lines for running channels without hardware

pub mod bridge;
pub mod channel;
pub mod registry;
pub mod virtual_port;
