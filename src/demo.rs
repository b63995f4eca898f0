//! Demo workloads driven by the binary.
//!
//! `events` pushes staggered phased events that serve until their lifetime
//! runs out and records serve jitter. `tasks` wires a small dependency chain
//! with a flaky middle step.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::info;
use serde::Serialize;

use tempo::{Context, EntryConfig, EntryId, Invocation, NextState, PhaseHandlers};

use crate::config::DemoConfig;

/// Min/max/mean/std-dev of `actual - nominal` serve intervals, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JitterStats {
    pub samples: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
}

impl JitterStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_ms = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean_ms).powi(2)).sum::<f64>() / n;
        Some(Self {
            samples: samples.len(),
            min_ms,
            max_ms,
            mean_ms,
            std_dev_ms: variance.sqrt(),
        })
    }
}

/// Shared sink for jitter samples, cloned into every serve callback.
#[derive(Debug, Clone, Default)]
pub struct JitterRecorder {
    samples: Arc<Mutex<Vec<f64>>>,
}

impl JitterRecorder {
    pub fn record(&self, invocation: &Invocation<'_>) {
        let actual = invocation.since_last.as_secs_f64() * 1000.0;
        let nominal = invocation.serve_interval.as_secs_f64() * 1000.0;
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(actual - nominal);
    }

    pub fn stats(&self) -> Option<JitterStats> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        JitterStats::from_samples(&samples)
    }
}

/// Controller shared by all demo events.
#[derive(Debug, Default)]
pub struct Panel {
    pub started: AtomicU64,
    pub served: AtomicU64,
}

/// Per-event user data.
#[derive(Debug, Default)]
pub struct Counter {
    pub serves: AtomicU32,
}

fn panel<'a>(invocation: &Invocation<'a>) -> Option<&'a Panel> {
    invocation.controller.and_then(|c| c.downcast_ref::<Panel>())
}

fn counter<'a>(invocation: &Invocation<'a>) -> Option<&'a Counter> {
    invocation.user_data.and_then(|c| c.downcast_ref::<Counter>())
}

/// Phased event number `index` of the demo.
pub fn phased_event(index: usize, demo: &DemoConfig, jitter: &JitterRecorder, panel_ctx: &Context) -> EntryConfig {
    let jitter = jitter.clone();
    let handlers = PhaseHandlers::new()
        .on_start(move |ctl| {
            println!("Event {} started", index);
            if let Some(p) = panel(ctl) {
                p.started.fetch_add(1, Ordering::Relaxed);
            }
        })
        .on_serve(move |ctl| {
            jitter.record(ctl);
            if let Some(p) = panel(ctl) {
                p.served.fetch_add(1, Ordering::Relaxed);
            }
            if let Some(c) = counter(ctl) {
                c.serves.fetch_add(1, Ordering::Relaxed);
            }
            println!("Event {} running", index);
        })
        .on_abort(move |_| println!("Event {} aborted", index))
        .on_complete(move |_| println!("Event {} completed", index))
        .on_timeout(move |ctl| {
            let serves = counter(ctl).map_or(0, |c| c.serves.load(Ordering::Relaxed));
            println!("Event {} time out after {} serves", index, serves);
        });

    EntryConfig::phased(handlers)
        .with_label(format!("event-{}", index))
        .with_delay_start(demo.start_delay(index))
        .with_interval(demo.interval(index))
        .with_lifetime(demo.lifetime(index))
        .with_group(index as i64 % 2)
        .with_controller(panel_ctx.clone())
        .with_user_data(Context::new(Counter::default()))
}

/// Order in which task callbacks ran, shared with the callbacks.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RunLog {
    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Task that finishes on its first run.
pub fn one_shot(label: &str, priority: i32, run_log: &RunLog) -> EntryConfig {
    let run_log = run_log.clone();
    let name = label.to_string();
    EntryConfig::task(move |_| {
        run_log.push(name.clone());
        NextState::Done
    })
    .with_label(label)
    .with_priority(priority)
    .with_interval(Duration::from_millis(100))
}

/// Task that fails until its `attempts`-th run.
pub fn flaky(attempts: u32, retries: u32, depends_on: EntryId, run_log: &RunLog) -> EntryConfig {
    let run_log = run_log.clone();
    EntryConfig::task(move |inv| {
        let attempt = inv.retries_used + 1;
        if attempt < attempts {
            run_log.push(format!("flaky (attempt {} failed)", attempt));
            NextState::Failed
        } else {
            run_log.push(format!("flaky (attempt {} ok)", attempt));
            NextState::Done
        }
    })
    .with_label("flaky")
    .with_priority(3)
    .with_interval(Duration::from_millis(100))
    .with_retries(retries)
    .depends_on(depends_on)
}

/// Runs until its lifetime expires.
pub fn heartbeat(run_log: &RunLog) -> EntryConfig {
    let run_log = run_log.clone();
    EntryConfig::task(move |inv| {
        info!("heartbeat {}", inv.invocations);
        run_log.push(format!("heartbeat {}", inv.invocations));
        NextState::Running
    })
    .with_label("heartbeat")
    .with_interval(Duration::from_millis(150))
    .with_lifetime(Duration::from_millis(1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo::{ManualClock, Scheduler, SchedulerConfig};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_jitter_stats_empty() {
        assert!(JitterStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_jitter_stats_values() {
        let stats = JitterStats::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(stats.samples, 8);
        assert_eq!(stats.min_ms, 2.0);
        assert_eq!(stats.max_ms, 9.0);
        assert_eq!(stats.mean_ms, 5.0);
        assert_eq!(stats.std_dev_ms, 2.0);
    }

    #[test]
    fn test_jitter_stats_negative_samples() {
        let stats = JitterStats::from_samples(&[-1.5, 0.5]).unwrap();
        assert_eq!(stats.min_ms, -1.5);
        assert_eq!(stats.mean_ms, -0.5);
    }

    #[test]
    fn test_phased_event_serves_until_timeout() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(SchedulerConfig::default(), Arc::new(clock.clone()));
        let demo = DemoConfig {
            interval_spread_ms: 0,
            base_interval_ms: 100,
            base_lifetime_ms: 350,
            ..Default::default()
        };
        let jitter = JitterRecorder::default();
        let panel_ctx = Context::new(Panel::default());
        let id = scheduler.add(phased_event(0, &demo, &jitter, &panel_ctx)).unwrap();

        scheduler.service().unwrap();
        for _ in 0..4 {
            clock.advance(ms(100));
            scheduler.service().unwrap();
        }
        // Timed out at 350 ms; pruned on the next cycle.
        scheduler.service().unwrap();
        assert!(scheduler.find(id).is_err());

        let panel = panel_ctx.downcast_ref::<Panel>().unwrap();
        assert_eq!(panel.started.load(Ordering::Relaxed), 1);
        assert_eq!(panel.served.load(Ordering::Relaxed), 3);
        let stats = jitter.stats().unwrap();
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.max_ms, 0.0);
    }

    #[test]
    fn test_task_chain_order() {
        let clock = ManualClock::new();
        let scheduler = Scheduler::with_clock(SchedulerConfig::default(), Arc::new(clock.clone()));
        let run_log = RunLog::default();
        let fetch = scheduler.add(one_shot("fetch", 5, &run_log)).unwrap();
        let flaky_id = scheduler.add(flaky(2, 1, fetch, &run_log)).unwrap();
        scheduler.add(one_shot("report", 1, &run_log).depends_on(flaky_id)).unwrap();

        scheduler.service().unwrap();
        for _ in 0..10 {
            clock.advance(ms(100));
            scheduler.service().unwrap();
        }
        assert_eq!(
            run_log.lines(),
            vec!["fetch", "flaky (attempt 1 failed)", "flaky (attempt 2 ok)", "report"]
        );
        assert!(scheduler.is_empty().unwrap());
    }
}
