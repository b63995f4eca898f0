//! Entry states and the values callbacks report back.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a scheduled entry.
///
/// Pausing is not a state: it is a flag that can be set on any non-terminal
/// entry and leaves the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Waiting for its start delay, its dependencies, or a retry
    Waiting,
    /// Started; invoked every serve interval
    Running,
    /// Finished successfully (task `Done` / event completed)
    Done,
    /// Failed with no retries left, or its callback panicked
    Failed,
    /// Lifetime limit exceeded
    Timeout,
    /// Aborted from outside
    Aborted,
}

impl EntryState {
    /// Terminal entries are pruned on the next cycle and never invoked again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryState::Done | EntryState::Failed | EntryState::Timeout | EntryState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Waiting => "waiting",
            EntryState::Running => "running",
            EntryState::Done => "done",
            EntryState::Failed => "failed",
            EntryState::Timeout => "timeout",
            EntryState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task-style callback reports after one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextState {
    /// Keep going; invoke again after the interval
    Running,
    /// Finished successfully
    Done,
    /// Failed; retried while budget remains
    Failed,
}

/// Which capability set an entry was created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// One callback returning the next state
    Task,
    /// Separate start/serve/abort/complete/timeout callbacks
    Phased,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Task => f.write_str("task"),
            EntryKind::Phased => f.write_str("phased"),
        }
    }
}
