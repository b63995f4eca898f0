//! CLI module for tempo - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for the scheduler demos
//! and configuration inspection.

pub mod commands;

pub use commands::{Cli, Commands};
