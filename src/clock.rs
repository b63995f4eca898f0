//! Time sources and stop timers.
//!
//! The engine never calls `Instant::now()` directly. It asks a [`Clock`] for
//! the current reading and hands that reading to every [`StopTimer`] query,
//! so a whole evaluation step sees one consistent "now" and tests can drive
//! time by hand with [`ManualClock`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic reading.
    fn now(&self) -> Instant;
}

/// Wall clock backed by `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-driven clock for deterministic tests.
///
/// Clones share the same reading, so a test can keep one handle and give
/// another to the scheduler.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Start at the current real instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resettable timeout.
///
/// A timer that was never started (or was reset) reports `None` from
/// [`StopTimer::is_elapsed`], which keeps "not armed" distinct from "armed
/// but not yet due".
#[derive(Debug, Clone, Copy, Default)]
pub struct StopTimer {
    started_at: Option<Instant>,
    timeout: Duration,
    running: bool,
}

impl StopTimer {
    /// Create a stopped timer with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            started_at: None,
            timeout,
            running: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Instant of the last `start`, kept across `stop` but cleared by `reset`.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// (Re)start with the current timeout.
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.running = true;
    }

    /// (Re)start with a new timeout.
    pub fn start_with(&mut self, now: Instant, timeout: Duration) {
        self.timeout = timeout;
        self.start(now);
    }

    /// Stop running but keep the start point.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Stop running and forget the start point.
    pub fn reset(&mut self) {
        self.running = false;
        self.started_at = None;
    }

    /// `None` when not running, `Some(true)` once the timeout has passed.
    /// A zero timeout is elapsed immediately.
    pub fn is_elapsed(&self, now: Instant) -> Option<bool> {
        if !self.running {
            return None;
        }
        if self.timeout.is_zero() {
            return Some(true);
        }
        Some(self.elapsed(now) >= self.timeout)
    }

    pub fn is_running_and_elapsed(&self, now: Instant) -> bool {
        self.is_elapsed(now).unwrap_or(false)
    }

    /// Time since start; zero when not running.
    pub fn elapsed(&self, now: Instant) -> Duration {
        match (self.running, self.started_at) {
            (true, Some(start)) => now.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Time left until the timeout; zero when not running, never negative.
    pub fn remaining(&self, now: Instant) -> Duration {
        if !self.running {
            return Duration::ZERO;
        }
        self.timeout.saturating_sub(self.elapsed(now))
    }
}
