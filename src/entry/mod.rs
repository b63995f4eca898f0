//! Scheduled entries.
//!
//! An entry is one unit of timed work: its timing parameters, its state, the
//! callbacks to invoke and the context handles to forward to them. Callers
//! describe an entry with [`EntryConfig`] and observe it through
//! [`EntrySnapshot`]; the live [`Entry`] itself stays inside the registry.

mod callbacks;
mod context;
mod state;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::StopTimer;
use crate::id::EntryId;

pub use callbacks::{Behavior, Invocation, PhaseControl, PhaseFn, PhaseHandlers, PhaseRequest, TaskFn};
pub use context::Context;
pub use state::{EntryKind, EntryState, NextState};

/// Serve interval used when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Everything needed to add an entry.
#[derive(Debug)]
pub struct EntryConfig {
    pub(crate) behavior: Behavior,
    pub(crate) label: Option<String>,
    pub(crate) interval: Duration,
    pub(crate) delay_start: Duration,
    pub(crate) lifetime: Option<Duration>,
    pub(crate) priority: i32,
    pub(crate) retry_budget: u32,
    pub(crate) group: Option<i64>,
    pub(crate) dependencies: Vec<EntryId>,
    pub(crate) controller: Option<Context>,
    pub(crate) user_data: Option<Context>,
}

impl EntryConfig {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            label: None,
            interval: DEFAULT_INTERVAL,
            delay_start: Duration::ZERO,
            lifetime: None,
            priority: 0,
            retry_budget: 0,
            group: None,
            dependencies: Vec::new(),
            controller: None,
            user_data: None,
        }
    }

    /// A task-style entry: `f` runs every interval and returns the next state.
    pub fn task(f: impl FnMut(&Invocation<'_>) -> NextState + Send + 'static) -> Self {
        Self::with_behavior(Behavior::Task(Box::new(f)))
    }

    /// A phased event driven by lifecycle callbacks.
    pub fn phased(handlers: PhaseHandlers) -> Self {
        Self::with_behavior(Behavior::Phased(handlers))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Time between invocations once running.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait this long after creation before starting.
    pub fn with_delay_start(mut self, delay: Duration) -> Self {
        self.delay_start = delay;
        self
    }

    /// Hard cap on the entry's total existence. Zero means unlimited.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = (!lifetime.is_zero()).then_some(lifetime);
        self
    }

    /// Higher runs first when several entries are due in the same cycle.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// How many times a `Failed` result is retried before giving up.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_budget = retries;
        self
    }

    /// Informational grouping tag. Negative values mean "no group".
    pub fn with_group(mut self, group: i64) -> Self {
        self.group = (group >= 0).then_some(group);
        self
    }

    /// Entries that must finish with `Done` before this one may start.
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = EntryId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn depends_on(mut self, dependency: EntryId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_controller(mut self, controller: Context) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_user_data(mut self, user_data: Context) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn kind(&self) -> EntryKind {
        self.behavior.kind()
    }
}

/// A live entry, owned by the registry.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) id: EntryId,
    pub(crate) label: Option<String>,
    pub(crate) behavior: Behavior,
    pub(crate) state: EntryState,
    pub(crate) paused: bool,
    /// Set once the start-delay gate has been passed; retries skip it.
    pub(crate) started: bool,
    pub(crate) priority: i32,
    pub(crate) interval: Duration,
    pub(crate) delay_start: Duration,
    pub(crate) lifetime: Option<Duration>,
    pub(crate) retry_budget: u32,
    pub(crate) retries_used: u32,
    pub(crate) group: Option<i64>,
    pub(crate) dependencies: Vec<EntryId>,
    /// A dependency named an id not yet issued at creation; never satisfied.
    pub(crate) orphaned: bool,
    pub(crate) controller: Option<Context>,
    pub(crate) user_data: Option<Context>,
    pub(crate) created_at: Instant,
    pub(crate) created_wall: DateTime<Utc>,
    pub(crate) last_run: Option<Instant>,
    pub(crate) invocations: u64,
    /// Start delay while waiting, serve interval while running.
    pub(crate) serve_clock: StopTimer,
    pub(crate) life_clock: StopTimer,
}

impl Entry {
    pub(crate) fn new(id: EntryId, config: EntryConfig, now: Instant) -> Self {
        let mut serve_clock = StopTimer::new(config.interval);
        if !config.delay_start.is_zero() {
            serve_clock.start_with(now, config.delay_start);
        }
        let mut life_clock = StopTimer::default();
        if let Some(lifetime) = config.lifetime {
            life_clock.start_with(now, lifetime);
        }

        Self {
            id,
            label: config.label,
            behavior: config.behavior,
            state: EntryState::Waiting,
            paused: false,
            started: false,
            priority: config.priority,
            interval: config.interval,
            delay_start: config.delay_start,
            lifetime: config.lifetime,
            retry_budget: config.retry_budget,
            retries_used: 0,
            group: config.group,
            dependencies: config.dependencies,
            orphaned: false,
            controller: config.controller,
            user_data: config.user_data,
            created_at: now,
            created_wall: Utc::now(),
            last_run: None,
            invocations: 0,
            serve_clock,
            life_clock,
        }
    }

    pub(crate) fn kind(&self) -> EntryKind {
        self.behavior.kind()
    }

    /// Whether the entry carries `ctx` as its controller or user data.
    pub(crate) fn references(&self, ctx: &Context) -> bool {
        self.controller.as_ref().is_some_and(|c| c.same_as(ctx))
            || self.user_data.as_ref().is_some_and(|u| u.same_as(ctx))
    }

    /// Borrow the callbacks mutably alongside a view of the rest of the entry.
    pub(crate) fn split(&mut self, now: Instant) -> (&mut Behavior, Invocation<'_>) {
        let invocation = Invocation {
            id: self.id,
            label: self.label.as_deref(),
            group: self.group,
            controller: self.controller.as_ref(),
            user_data: self.user_data.as_ref(),
            serve_interval: self.interval,
            since_last: now.saturating_duration_since(self.last_run.unwrap_or(self.created_at)),
            invocations: self.invocations,
            retries_used: self.retries_used,
        };
        (&mut self.behavior, invocation)
    }

    pub(crate) fn snapshot(&self, now: Instant) -> EntrySnapshot {
        EntrySnapshot {
            id: self.id,
            label: self.label.clone(),
            kind: self.kind(),
            state: self.state,
            paused: self.paused,
            priority: self.priority,
            interval: self.interval,
            delay_start: self.delay_start,
            lifetime: self.lifetime,
            retry_budget: self.retry_budget,
            retries_used: self.retries_used,
            group: self.group,
            dependencies: self.dependencies.clone(),
            invocations: self.invocations,
            created_at: self.created_wall,
            age: now.saturating_duration_since(self.created_at),
            since_last_run: self.last_run.map(|t| now.saturating_duration_since(t)),
        }
    }
}

/// Owned copy of an entry's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    pub id: EntryId,
    pub label: Option<String>,
    pub kind: EntryKind,
    pub state: EntryState,
    pub paused: bool,
    pub priority: i32,
    #[serde(rename = "interval_ms", serialize_with = "millis::serialize")]
    pub interval: Duration,
    #[serde(rename = "delay_start_ms", serialize_with = "millis::serialize")]
    pub delay_start: Duration,
    #[serde(rename = "lifetime_ms", serialize_with = "millis::serialize_opt")]
    pub lifetime: Option<Duration>,
    pub retry_budget: u32,
    pub retries_used: u32,
    pub group: Option<i64>,
    pub dependencies: Vec<EntryId>,
    pub invocations: u64,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "age_ms", serialize_with = "millis::serialize")]
    pub age: Duration,
    #[serde(rename = "since_last_run_ms", serialize_with = "millis::serialize_opt")]
    pub since_last_run: Option<Duration>,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn serialize_opt<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => serialize(d, s),
            None => s.serialize_none(),
        }
    }
}
