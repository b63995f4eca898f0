//! Tempo - a timed task and event scheduler
//!
//! Tempo runs callbacks on a single worker thread on behalf of many
//! registered entries. Each entry has a serve interval, an optional start
//! delay and lifetime, a priority, a retry budget and dependencies on other
//! entries. The worker sleeps exactly until the next decision is due.

pub mod clock;
pub mod entry;
pub mod error;
pub mod id;
mod registry;
pub mod scheduler;

pub use clock::{Clock, ManualClock, StopTimer, SystemClock};
pub use entry::{
    Context, EntryConfig, EntryKind, EntrySnapshot, EntryState, Invocation, NextState, PhaseControl,
    PhaseHandlers, PhaseRequest,
};
pub use error::{Result, TempoError};
pub use id::EntryId;
pub use scheduler::{EngineStats, Scheduler, SchedulerConfig};
