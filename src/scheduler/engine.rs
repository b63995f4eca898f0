//! One engine cycle.
//!
//! A cycle runs with exclusive access to the registry and:
//! 1. prunes entries that turned terminal, firing their terminal callbacks
//! 2. orders the rest by descending priority (stable, so ties keep insertion order)
//! 3. evaluates every entry: lifetime, pause flag, dependencies, start delay,
//!    serve due-ness, invoking whatever callbacks are due
//! 4. returns how long the worker may sleep before the next decision is due
//!
//! Every callback runs inside [`guarded`], which catches panics and marks the
//! thread as busy in a callback of this scheduler so reentrant API calls fail
//! fast instead of deadlocking on the registry lock.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::entry::{Behavior, Entry, EntryState, NextState, PhaseControl, PhaseRequest};
use crate::id::EntryId;
use crate::registry::Registry;
use crate::scheduler::stats::EngineStats;

thread_local! {
    /// Schedulers whose callbacks are on this thread's stack, outermost first.
    static ACTIVE_OWNERS: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Whether the current thread is inside a callback run by scheduler `owner`,
/// however deeply nested in callbacks of other schedulers.
pub(crate) fn inside_callback_of(owner: usize) -> bool {
    ACTIVE_OWNERS.with_borrow(|owners| owners.contains(&owner))
}

fn guarded<R>(owner: usize, f: impl FnOnce() -> R) -> thread::Result<R> {
    ACTIVE_OWNERS.with_borrow_mut(|owners| owners.push(owner));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    ACTIVE_OWNERS.with_borrow_mut(|owners| {
        owners.pop();
    });
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Everything the scheduler mutex protects.
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub(crate) registry: Registry,
    pub(crate) stats: EngineStats,
}

/// Per-cycle inputs that live outside the lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CycleContext<'a> {
    pub(crate) name: &'a str,
    /// Identity of the owning scheduler, for reentrancy detection.
    pub(crate) owner: usize,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) max_idle: Duration,
    pub(crate) min_sleep: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Serve,
}

/// Run one cycle and return the time until the next decision is due.
pub(crate) fn run_cycle(state: &mut EngineState, ctx: &CycleContext<'_>) -> Duration {
    state.stats.cycle();
    prune(state, ctx);
    state
        .registry
        .entries
        .sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut next = ctx.max_idle;
    let EngineState { registry, stats } = state;
    let Registry { entries, done, .. } = registry;
    for entry in entries.iter_mut() {
        if let Some(wait) = evaluate(entry, done, stats, ctx) {
            next = next.min(wait);
        }
    }

    let wait = next.max(ctx.min_sleep);
    debug!(
        "[{}] Cycle {} done, {} entries live, sleeping {:?}",
        ctx.name,
        state.stats.cycles,
        state.registry.len(),
        wait
    );
    wait
}

/// Empty the registry on termination: live entries are aborted, and every
/// entry gets its terminal callback. Returns how many entries were drained.
pub(crate) fn drain(state: &mut EngineState, ctx: &CycleContext<'_>) -> usize {
    let entries = state.registry.take_all();
    let count = entries.len();
    for mut entry in entries {
        if !entry.state.is_terminal() {
            entry.state = EntryState::Aborted;
        }
        finish(entry, state, ctx);
    }
    count
}

fn prune(state: &mut EngineState, ctx: &CycleContext<'_>) {
    if !state.registry.entries.iter().any(|e| e.state.is_terminal()) {
        return;
    }
    let (finished, live): (Vec<Entry>, Vec<Entry>) = state
        .registry
        .take_all()
        .into_iter()
        .partition(|e| e.state.is_terminal());
    state.registry.entries = live;
    for entry in finished {
        finish(entry, state, ctx);
    }
}

fn finish(mut entry: Entry, state: &mut EngineState, ctx: &CycleContext<'_>) {
    let now = ctx.clock.now();
    if entry.state == EntryState::Done {
        state.registry.record_done(entry.id);
    }
    fire_terminal(&mut entry, &mut state.stats, ctx, now);
    state.stats.finished(entry.state);
    info!("[{}] Removing finished entry {} ({})", ctx.name, entry.id, entry.state);
}

fn fire_terminal(entry: &mut Entry, stats: &mut EngineStats, ctx: &CycleContext<'_>, now: Instant) {
    let id = entry.id;
    let terminal = entry.state;
    let (behavior, invocation) = entry.split(now);
    let Behavior::Phased(handlers) = behavior else {
        return;
    };
    let slot = match terminal {
        EntryState::Done => &mut handlers.on_complete,
        EntryState::Aborted => &mut handlers.on_abort,
        EntryState::Timeout => &mut handlers.on_timeout,
        _ => return,
    };
    let Some(handler) = slot.as_mut() else {
        return;
    };
    // Requests made from a terminal callback have nothing left to change.
    let mut control = PhaseControl::new(invocation);
    if let Err(payload) = guarded(ctx.owner, || handler(&mut control)) {
        stats.panicked();
        error!(
            "[{}] Entry {} {} callback panicked: {}",
            ctx.name,
            id,
            terminal,
            panic_message(payload.as_ref())
        );
    }
}

fn evaluate(
    entry: &mut Entry,
    done: &HashSet<EntryId>,
    stats: &mut EngineStats,
    ctx: &CycleContext<'_>,
) -> Option<Duration> {
    if entry.state.is_terminal() {
        return Some(Duration::ZERO);
    }

    let now = ctx.clock.now();
    if entry.life_clock.is_running_and_elapsed(now) {
        warn!("[{}] Entry {} timeout triggered.", ctx.name, entry.id);
        entry.state = EntryState::Timeout;
        return Some(Duration::ZERO);
    }
    let life_left = entry.lifetime.map(|_| entry.life_clock.remaining(now));

    if entry.paused {
        return life_left;
    }

    let next = match entry.state {
        EntryState::Waiting => evaluate_waiting(entry, done, stats, ctx, now),
        EntryState::Running => evaluate_running(entry, stats, ctx, now),
        _ => Some(Duration::ZERO),
    };

    if entry.state.is_terminal() {
        return Some(Duration::ZERO);
    }
    earliest(next, life_left)
}

fn evaluate_waiting(
    entry: &mut Entry,
    done: &HashSet<EntryId>,
    stats: &mut EngineStats,
    ctx: &CycleContext<'_>,
    now: Instant,
) -> Option<Duration> {
    if !Registry::dependencies_satisfied(done, entry) {
        return None;
    }

    if entry.started {
        // Retry: the delay gate only staggers the first start.
        entry.state = EntryState::Running;
        if !entry.serve_clock.is_running() {
            entry.serve_clock.start_with(now, entry.interval);
        }
        return evaluate_running(entry, stats, ctx, now);
    }

    if entry.serve_clock.is_elapsed(now) == Some(false) {
        return Some(entry.serve_clock.remaining(now));
    }

    entry.started = true;
    entry.state = EntryState::Running;
    entry.serve_clock.start_with(now, entry.interval);
    stats.started();
    info!("[{}] Entry {} started", ctx.name, entry.id);

    if matches!(entry.behavior, Behavior::Phased(_)) {
        invoke_phase(entry, Phase::Start, stats, ctx, now);
    } else {
        entry.last_run = Some(now);
    }
    Some(entry.serve_clock.remaining(now))
}

fn evaluate_running(
    entry: &mut Entry,
    stats: &mut EngineStats,
    ctx: &CycleContext<'_>,
    now: Instant,
) -> Option<Duration> {
    match entry.serve_clock.is_elapsed(now) {
        None => {
            entry.serve_clock.start_with(now, entry.interval);
            return Some(entry.interval);
        }
        Some(false) => return Some(entry.serve_clock.remaining(now)),
        Some(true) => {}
    }

    if matches!(entry.behavior, Behavior::Task(_)) {
        invoke_task(entry, stats, ctx, now);
    } else {
        invoke_phase(entry, Phase::Serve, stats, ctx, now);
    }
    Some(entry.serve_clock.remaining(now))
}

fn invoke_task(entry: &mut Entry, stats: &mut EngineStats, ctx: &CycleContext<'_>, now: Instant) {
    let id = entry.id;
    let outcome = {
        let (behavior, invocation) = entry.split(now);
        let Behavior::Task(callback) = behavior else {
            return;
        };
        guarded(ctx.owner, || callback(&invocation))
    };

    entry.last_run = Some(now);
    entry.invocations += 1;
    stats.invoked();

    match outcome {
        Ok(NextState::Running) => entry.serve_clock.start_with(now, entry.interval),
        Ok(NextState::Done) => {
            info!("[{}] Entry {} finished successfully.", ctx.name, id);
            entry.state = EntryState::Done;
        }
        Ok(NextState::Failed) => fail(entry, stats, ctx, now),
        Err(payload) => {
            stats.panicked();
            error!(
                "[{}] Entry {} callback panicked: {}",
                ctx.name,
                id,
                panic_message(payload.as_ref())
            );
            entry.state = EntryState::Failed;
        }
    }
}

fn fail(entry: &mut Entry, stats: &mut EngineStats, ctx: &CycleContext<'_>, now: Instant) {
    if entry.retries_used < entry.retry_budget {
        entry.retries_used += 1;
        entry.state = EntryState::Waiting;
        entry.serve_clock.start_with(now, entry.interval);
        stats.retried();
        warn!(
            "[{}] Entry {} failed, retrying ({}/{})",
            ctx.name, entry.id, entry.retries_used, entry.retry_budget
        );
    } else {
        entry.state = EntryState::Failed;
        error!("[{}] Entry {} permanently failed.", ctx.name, entry.id);
    }
}

fn invoke_phase(entry: &mut Entry, phase: Phase, stats: &mut EngineStats, ctx: &CycleContext<'_>, now: Instant) {
    let id = entry.id;
    let (outcome, request, next_interval) = {
        let (behavior, invocation) = entry.split(now);
        let Behavior::Phased(handlers) = behavior else {
            return;
        };
        let slot = match phase {
            Phase::Start => &mut handlers.on_start,
            Phase::Serve => &mut handlers.on_serve,
        };
        match slot.as_mut() {
            Some(handler) => {
                let mut control = PhaseControl::new(invocation);
                let outcome = guarded(ctx.owner, || handler(&mut control));
                (Some(outcome), control.request(), control.next_interval())
            }
            None => (None, None, None),
        }
    };

    entry.last_run = Some(now);
    if let Some(outcome) = outcome {
        entry.invocations += 1;
        stats.invoked();
        if let Err(payload) = outcome {
            stats.panicked();
            error!(
                "[{}] Entry {} {:?} callback panicked: {}",
                ctx.name,
                id,
                phase,
                panic_message(payload.as_ref())
            );
            entry.state = EntryState::Failed;
            return;
        }
    }

    if let Some(interval) = next_interval {
        entry.interval = interval;
    }
    entry.serve_clock.start_with(now, entry.interval);

    match request {
        Some(PhaseRequest::Complete) => {
            info!("[{}] Entry {} completed.", ctx.name, id);
            entry.state = EntryState::Done;
        }
        Some(PhaseRequest::Abort) => {
            info!("[{}] Entry {} aborted itself.", ctx.name, id);
            entry.state = EntryState::Aborted;
        }
        None => {}
    }
}

fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
