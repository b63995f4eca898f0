//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - events: phased-event demo with jitter statistics (the default)
//! - tasks: task-style demo with priorities, dependencies and retries
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tempo - a timed task and event scheduler
#[derive(Parser, Debug)]
#[command(name = "tempo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (also mirrors the log to stderr)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run staggered phased events until they time out and report jitter
    Events {
        /// Number of events (overrides the config file)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Run a small task graph with priorities, dependencies and retries
    Tasks {
        /// Retry budget of the flaky task
        #[arg(short, long, default_value_t = 2)]
        retries: u32,

        /// Attempts the flaky task needs before it succeeds
        #[arg(short, long, default_value_t = 2)]
        attempts: u32,
    },

    /// Print the effective configuration
    Config,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Events { count: None }
    }
}
