//! CLI Module
//!
//! Provides command-line support shared by the `comlink` binary:
//! - Exit codes for automation

pub mod exit_codes;

pub use exit_codes::{exit_code_description, exit_code_for, ExitCodes};
