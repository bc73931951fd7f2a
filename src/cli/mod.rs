//! Command-line interface
//!
//! Argument definitions and command handlers for the `trialsync` binary.

pub mod args;
pub mod commands;
