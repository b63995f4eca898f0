//! Engine counters.
//!
//! Cumulative since the scheduler was created; read them with
//! `Scheduler::stats()`.

use serde::Serialize;

use crate::entry::EntryState;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Completed engine cycles
    pub cycles: u64,
    /// Start and serve callbacks invoked
    pub invocations: u64,
    /// Entries that passed their start gate
    pub started: u64,
    /// Entries pruned as done
    pub completed: u64,
    /// Entries pruned as failed
    pub failed: u64,
    /// Automatic retries after a failure
    pub retries: u64,
    /// Entries pruned after their lifetime ran out
    pub timed_out: u64,
    /// Entries pruned as aborted
    pub aborted: u64,
    /// Entries removed by an explicit erase
    pub erased: u64,
    /// Callbacks that panicked
    pub panics: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cycle(&mut self) {
        self.cycles += 1;
    }

    pub(crate) fn invoked(&mut self) {
        self.invocations += 1;
    }

    pub(crate) fn started(&mut self) {
        self.started += 1;
    }

    pub(crate) fn retried(&mut self) {
        self.retries += 1;
    }

    pub(crate) fn panicked(&mut self) {
        self.panics += 1;
    }

    pub(crate) fn erased(&mut self, count: usize) {
        self.erased += count as u64;
    }

    /// Count an entry leaving the registry in a terminal state.
    pub(crate) fn finished(&mut self, state: EntryState) {
        match state {
            EntryState::Done => self.completed += 1,
            EntryState::Failed => self.failed += 1,
            EntryState::Timeout => self.timed_out += 1,
            EntryState::Aborted => self.aborted += 1,
            EntryState::Waiting | EntryState::Running => {}
        }
    }

    /// Entries that left the registry for any reason.
    pub fn removed(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.aborted + self.erased
    }
}
