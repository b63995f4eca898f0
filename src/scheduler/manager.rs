//! Scheduler handle and worker thread.
//!
//! The `Scheduler` owns the registry behind one mutex and runs the engine on
//! a dedicated worker thread:
//! 1. The worker locks the registry and runs a cycle
//! 2. It waits on the condition variable, releasing the lock, for the time the
//!    cycle asked for
//! 3. Any mutation through the API notifies the condition variable while it
//!    still holds the lock, so the worker re-evaluates promptly and no wake-up
//!    is lost between a cycle and the wait that follows it
//!
//! Callbacks run on the worker with the lock held. A callback that calls back
//! into the same scheduler gets `TempoError::Reentrant` instead of a deadlock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::entry::{Context, EntryConfig, EntrySnapshot, EntryState};
use crate::error::{Result, TempoError};
use crate::id::EntryId;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::engine::{self, CycleContext, EngineState};
use crate::scheduler::stats::EngineStats;

/// State shared between the handle and the worker thread.
#[derive(Debug)]
struct Shared {
    name: String,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    wake: Condvar,
    shutdown: AtomicBool,
    max_idle_ms: AtomicU64,
    min_sleep: Duration,
}

impl Shared {
    /// Identity token for reentrancy detection; stable for the life of the `Arc`.
    fn owner(&self) -> usize {
        self as *const Shared as usize
    }

    fn in_callback(&self) -> bool {
        engine::inside_callback_of(self.owner())
    }

    fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms.load(Ordering::Relaxed))
    }

    fn cycle_context(&self) -> CycleContext<'_> {
        let max_idle = self.max_idle();
        CycleContext {
            name: &self.name,
            owner: self.owner(),
            clock: self.clock.as_ref(),
            max_idle,
            min_sleep: self.min_sleep.min(max_idle),
        }
    }

    /// Lock the registry for an API call.
    fn lock(&self, op: &str) -> Result<MutexGuard<'_, EngineState>> {
        if self.in_callback() {
            return Err(TempoError::Reentrant(op.to_string()));
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A timed task/event scheduler.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Dropping the
/// scheduler stops its worker.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler driven by the system clock. The worker is not started.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a scheduler driven by `clock`.
    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let max_idle_ms = config.max_idle_ms.max(1);
        debug!(
            "[{}] Created with max idle {} ms, min sleep {} ms",
            config.name, max_idle_ms, config.min_sleep_ms
        );
        Self {
            shared: Arc::new(Shared {
                min_sleep: config.min_sleep(),
                name: config.name,
                clock,
                state: Mutex::new(EngineState::default()),
                wake: Condvar::new(),
                shutdown: AtomicBool::new(false),
                max_idle_ms: AtomicU64::new(max_idle_ms),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Register a new entry and wake the worker so it is considered promptly.
    pub fn add(&self, config: EntryConfig) -> Result<EntryId> {
        let mut state = self.shared.lock("add")?;
        let kind = config.kind();
        let now = self.shared.clock.now();
        let unknown = state.registry.unknown_dependencies(&config);
        let id = state.registry.insert(config, now);
        info!("[{}] Added {} entry {}", self.shared.name, kind, id);
        for dep in unknown {
            warn!("[{}] Entry {} depends on unknown entry {}; it will never start", self.shared.name, id, dep);
        }
        self.shared.wake.notify_all();
        Ok(id)
    }

    /// Stop invoking an entry until resumed. Idempotent.
    pub fn pause(&self, id: EntryId) -> Result<()> {
        let mut state = self.shared.lock("pause")?;
        if state.registry.pause(id)? {
            info!("[{}] Paused entry {}", self.shared.name, id);
            self.shared.wake.notify_all();
        }
        Ok(())
    }

    /// Let a paused entry run again. Idempotent.
    pub fn resume(&self, id: EntryId) -> Result<()> {
        let mut state = self.shared.lock("resume")?;
        if state.registry.resume(id)? {
            info!("[{}] Resumed entry {}", self.shared.name, id);
            self.shared.wake.notify_all();
        }
        Ok(())
    }

    /// Remove an entry immediately. No callbacks fire.
    pub fn erase(&self, id: EntryId) -> Result<()> {
        let mut state = self.shared.lock("erase")?;
        state.registry.remove(id).ok_or(TempoError::EntryNotFound(id))?;
        state.stats.erased(1);
        info!("[{}] Erased entry {}", self.shared.name, id);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Remove every entry whose controller or user data is `ctx`.
    pub fn erase_by_context(&self, ctx: &Context) -> Result<usize> {
        let mut state = self.shared.lock("erase_by_context")?;
        let removed = state.registry.remove_by_context(ctx);
        if removed > 0 {
            state.stats.erased(removed);
            info!("[{}] Erased {} entries by context", self.shared.name, removed);
            self.shared.wake.notify_all();
        }
        Ok(removed)
    }

    /// Finish an entry as `Done`; dependents are released once it is pruned.
    pub fn complete(&self, id: EntryId) -> Result<()> {
        self.request(id, EntryState::Done, "complete")
    }

    /// Finish an entry as `Aborted`.
    pub fn abort(&self, id: EntryId) -> Result<()> {
        self.request(id, EntryState::Aborted, "abort")
    }

    fn request(&self, id: EntryId, target: EntryState, op: &str) -> Result<()> {
        let mut state = self.shared.lock(op)?;
        state.registry.request(id, target)?;
        info!("[{}] Entry {} marked {} by request", self.shared.name, id, target);
        self.shared.wake.notify_all();
        Ok(())
    }

    pub fn find(&self, id: EntryId) -> Result<EntrySnapshot> {
        let state = self.shared.lock("find")?;
        let now = self.shared.clock.now();
        state
            .registry
            .get(id)
            .map(|e| e.snapshot(now))
            .ok_or(TempoError::EntryNotFound(id))
    }

    /// First entry whose controller or user data is `ctx`.
    pub fn find_by_context(&self, ctx: &Context) -> Result<EntrySnapshot> {
        let state = self.shared.lock("find_by_context")?;
        let now = self.shared.clock.now();
        state
            .registry
            .find_by_context(ctx)
            .map(|e| e.snapshot(now))
            .ok_or(TempoError::ContextNotFound)
    }

    /// Snapshots of every live entry, in cycle order.
    pub fn entries(&self) -> Result<Vec<EntrySnapshot>> {
        let state = self.shared.lock("entries")?;
        Ok(state.registry.snapshots(self.shared.clock.now()))
    }

    pub fn in_group(&self, group: i64) -> Result<Vec<EntrySnapshot>> {
        let mut entries = self.entries()?;
        entries.retain(|e| e.group == Some(group));
        Ok(entries)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.shared.lock("len")?.registry.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.shared.lock("is_empty")?.registry.is_empty())
    }

    pub fn stats(&self) -> Result<EngineStats> {
        Ok(self.shared.lock("stats")?.stats.clone())
    }

    /// Longest sleep between cycles.
    pub fn max_idle(&self) -> Duration {
        self.shared.max_idle()
    }

    /// Change the longest sleep between cycles. Zero is raised to 1 ms.
    pub fn set_max_idle(&self, max_idle: Duration) {
        let ms = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX).max(1);
        self.shared.max_idle_ms.store(ms, Ordering::Relaxed);
        debug!("[{}] Max idle set to {} ms", self.shared.name, ms);
        self.wake_up();
    }

    /// Make the worker run a cycle now. A no-op from inside a callback, where
    /// the worker is already busy.
    pub fn wake_up(&self) {
        if self.shared.in_callback() {
            return;
        }
        let _state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.wake.notify_all();
    }

    /// Run one cycle on the calling thread and return the sleep it computed.
    pub fn service(&self) -> Result<Duration> {
        let mut state = self.shared.lock("service")?;
        let ctx = self.shared.cycle_context();
        Ok(engine::run_cycle(&mut state, &ctx))
    }

    /// Spawn the worker thread. Returns false if it is already running or
    /// cannot be spawned.
    pub fn start(&self) -> bool {
        if self.shared.in_callback() {
            warn!("[{}] start() called from inside a callback, ignored", self.shared.name);
            return false;
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.as_ref()
            && !handle.is_finished()
        {
            warn!("[{}] Scheduler already running", self.shared.name);
            return false;
        }
        if let Some(handle) = worker.take()
            && handle.join().is_err()
        {
            error!("[{}] Previous worker thread panicked", self.shared.name);
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || worker_loop(&shared));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!("[{}] Scheduler started", self.shared.name);
                true
            }
            Err(e) => {
                error!("[{}] {}", self.shared.name, TempoError::WorkerSpawn(e));
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the worker and wait for it to exit. Entries stay registered and
    /// a later `start()` picks them up again.
    ///
    /// Waits for a callback in progress to return. From inside a callback the
    /// worker cannot be joined, so this only requests the shutdown.
    pub fn stop(&self) {
        self.shutdown_worker("stop");
    }

    /// Stop the worker, then abort every remaining entry, firing `on_abort`
    /// for live phased events.
    pub fn terminate(&self) {
        if !self.shutdown_worker("terminate") {
            return;
        }
        let mut state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ctx = self.shared.cycle_context();
        let drained = engine::drain(&mut state, &ctx);
        info!("[{}] Terminated, {} entries drained", self.shared.name, drained);
    }

    /// Returns false when called from a callback, where joining is impossible.
    fn shutdown_worker(&self, op: &str) -> bool {
        if self.shared.in_callback() {
            warn!(
                "[{}] {}() called from inside a callback; worker exits after this cycle",
                self.shared.name, op
            );
            self.shared.shutdown.store(true, Ordering::SeqCst);
            return false;
        }

        // Held until the join completes so a concurrent start() cannot race it.
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.as_ref()
            && handle.thread().id() == thread::current().id()
        {
            // Dropped by the worker itself, e.g. while pruning an entry that owned us.
            self.shared.shutdown.store(true, Ordering::SeqCst);
            return false;
        }
        let Some(handle) = worker.take() else {
            return true;
        };
        {
            let _state = self.shared.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.shared.shutdown.store(true, Ordering::SeqCst);
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            error!("[{}] Worker thread panicked", self.shared.name);
        }
        true
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &Shared) {
    debug!("[{}] Worker running", shared.name);
    let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
    while !shared.shutdown.load(Ordering::SeqCst) {
        let ctx = shared.cycle_context();
        let wait = engine::run_cycle(&mut state, &ctx);
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let (guard, _) = shared
            .wake
            .wait_timeout(state, wait)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
    }
    drop(state);
    info!("[{}] Scheduler stopped.", shared.name);
}
