//! Callback shapes an entry can carry.
//!
//! An entry is either a *task* (one callback invoked every due cycle that
//! returns the next state) or a *phased event* (separate callbacks for each
//! lifecycle transition). The engine dispatches on [`Behavior`] and never
//! needs to know anything else about the caller's code.

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use crate::entry::context::Context;
use crate::entry::state::{EntryKind, NextState};
use crate::id::EntryId;

/// Task-style callback.
pub type TaskFn = Box<dyn FnMut(&Invocation<'_>) -> NextState + Send>;

/// Phased-event callback.
pub type PhaseFn = Box<dyn FnMut(&mut PhaseControl<'_>) + Send>;

/// What a callback sees about the entry it was invoked for.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub id: EntryId,
    pub label: Option<&'a str>,
    pub group: Option<i64>,
    pub controller: Option<&'a Context>,
    pub user_data: Option<&'a Context>,
    /// Nominal time between serve invocations.
    pub serve_interval: Duration,
    /// Actual time since the previous invocation (or since creation).
    pub since_last: Duration,
    /// Invocations before this one.
    pub invocations: u64,
    pub retries_used: u32,
}

/// State change requested from inside a phased callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRequest {
    Complete,
    Abort,
}

/// Handle passed to phased callbacks: the invocation plus the ability to
/// finish the event or change its cadence.
#[derive(Debug)]
pub struct PhaseControl<'a> {
    invocation: Invocation<'a>,
    request: Option<PhaseRequest>,
    next_interval: Option<Duration>,
}

impl<'a> PhaseControl<'a> {
    pub(crate) fn new(invocation: Invocation<'a>) -> Self {
        Self {
            invocation,
            request: None,
            next_interval: None,
        }
    }

    /// Mark the event completed once the callback returns.
    pub fn complete(&mut self) {
        self.request = Some(PhaseRequest::Complete);
    }

    /// Mark the event aborted once the callback returns.
    pub fn abort(&mut self) {
        self.request = Some(PhaseRequest::Abort);
    }

    /// Use a different serve interval from now on.
    pub fn set_serve_interval(&mut self, interval: Duration) {
        self.next_interval = Some(interval);
    }

    pub fn request(&self) -> Option<PhaseRequest> {
        self.request
    }

    pub fn next_interval(&self) -> Option<Duration> {
        self.next_interval
    }
}

impl<'a> Deref for PhaseControl<'a> {
    type Target = Invocation<'a>;

    fn deref(&self) -> &Self::Target {
        &self.invocation
    }
}

/// Lifecycle callbacks of a phased event; every one is optional.
#[derive(Default)]
pub struct PhaseHandlers {
    pub(crate) on_start: Option<PhaseFn>,
    pub(crate) on_serve: Option<PhaseFn>,
    pub(crate) on_abort: Option<PhaseFn>,
    pub(crate) on_complete: Option<PhaseFn>,
    pub(crate) on_timeout: Option<PhaseFn>,
}

impl PhaseHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once when the start delay has passed.
    pub fn on_start(mut self, f: impl FnMut(&mut PhaseControl<'_>) + Send + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    /// Called every serve interval while running.
    pub fn on_serve(mut self, f: impl FnMut(&mut PhaseControl<'_>) + Send + 'static) -> Self {
        self.on_serve = Some(Box::new(f));
        self
    }

    pub fn on_abort(mut self, f: impl FnMut(&mut PhaseControl<'_>) + Send + 'static) -> Self {
        self.on_abort = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnMut(&mut PhaseControl<'_>) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnMut(&mut PhaseControl<'_>) + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for PhaseHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseHandlers")
            .field("on_start", &self.on_start.is_some())
            .field("on_serve", &self.on_serve.is_some())
            .field("on_abort", &self.on_abort.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

/// The callback set an entry carries.
pub enum Behavior {
    Task(TaskFn),
    Phased(PhaseHandlers),
}

impl Behavior {
    pub fn kind(&self) -> EntryKind {
        match self {
            Behavior::Task(_) => EntryKind::Task,
            Behavior::Phased(_) => EntryKind::Phased,
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Task(_) => f.write_str("Task(..)"),
            Behavior::Phased(handlers) => f.debug_tuple("Phased").field(handlers).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> Invocation<'static> {
        Invocation {
            id: EntryId::new(3),
            label: Some("probe"),
            group: None,
            controller: None,
            user_data: None,
            serve_interval: Duration::from_millis(100),
            since_last: Duration::from_millis(101),
            invocations: 0,
            retries_used: 0,
        }
    }

    #[test]
    fn test_phase_control_defaults() {
        let control = PhaseControl::new(invocation());
        assert_eq!(control.request(), None);
        assert_eq!(control.next_interval(), None);
        assert_eq!(control.id, EntryId::new(3));
        assert_eq!(control.label, Some("probe"));
    }

    #[test]
    fn test_phase_control_last_request_wins() {
        let mut control = PhaseControl::new(invocation());
        control.abort();
        control.complete();
        assert_eq!(control.request(), Some(PhaseRequest::Complete));
    }

    #[test]
    fn test_phase_control_interval() {
        let mut control = PhaseControl::new(invocation());
        control.set_serve_interval(Duration::from_millis(5));
        assert_eq!(control.next_interval(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_handlers_builder() {
        let handlers = PhaseHandlers::new().on_start(|_| {}).on_timeout(|_| {});
        assert!(handlers.on_start.is_some());
        assert!(handlers.on_serve.is_none());
        assert!(handlers.on_timeout.is_some());
        let debug = format!("{:?}", handlers);
        assert!(debug.contains("on_start: true"));
        assert!(debug.contains("on_serve: false"));
    }

    #[test]
    fn test_behavior_kind() {
        let task = Behavior::Task(Box::new(|_| NextState::Done));
        let phased = Behavior::Phased(PhaseHandlers::new());
        assert_eq!(task.kind(), EntryKind::Task);
        assert_eq!(phased.kind(), EntryKind::Phased);
    }
}
