//! The scheduling engine and its lifecycle API.
//!
//! This module provides:
//! - **Scheduler**: the shareable handle callers add, pause, erase and query
//!   entries through, and which owns the worker thread.
//! - **Engine cycle**: prune, order by priority, evaluate every entry and
//!   compute how long the worker may sleep.
//! - **Configuration** and cumulative **stats**.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tempo::{EntryConfig, NextState, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default().with_name("io"));
//! scheduler.add(
//!     EntryConfig::task(|inv| {
//!         println!("tick {}", inv.invocations);
//!         NextState::Running
//!     })
//!     .with_interval(Duration::from_millis(250))
//!     .with_lifetime(Duration::from_secs(5)),
//! )?;
//! scheduler.start();
//! # Ok::<(), tempo::TempoError>(())
//! ```

mod config;
mod engine;
mod manager;
mod stats;

pub use config::{DEFAULT_MAX_IDLE_MS, DEFAULT_MIN_SLEEP_MS, SchedulerConfig};
pub use manager::Scheduler;
pub use stats::EngineStats;
