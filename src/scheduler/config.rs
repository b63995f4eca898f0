//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TempoError};

/// Longest the worker sleeps when nothing needs attention sooner.
pub const DEFAULT_MAX_IDLE_MS: u64 = 10_000;
/// Floor on every sleep so a zero wait cannot turn into a busy loop.
pub const DEFAULT_MIN_SLEEP_MS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Log prefix and worker thread name.
    pub name: String,
    pub max_idle_ms: u64,
    pub min_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "Scheduler".to_string(),
            max_idle_ms: DEFAULT_MAX_IDLE_MS,
            min_sleep_ms: DEFAULT_MIN_SLEEP_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle_ms = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_idle_ms == 0 {
            return Err(TempoError::Config("max_idle_ms must be greater than zero".to_string()));
        }
        if self.min_sleep_ms > self.max_idle_ms {
            return Err(TempoError::Config(format!(
                "min_sleep_ms ({}) exceeds max_idle_ms ({})",
                self.min_sleep_ms, self.max_idle_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.name, "Scheduler");
        assert_eq!(config.max_idle(), Duration::from_secs(10));
        assert_eq!(config.min_sleep(), Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::default()
            .with_name("io")
            .with_max_idle(Duration::from_millis(250));
        assert_eq!(config.name, "io");
        assert_eq!(config.max_idle_ms, 250);
    }

    #[test]
    fn test_validate_rejects_zero_idle() {
        let config = SchedulerConfig {
            max_idle_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = SchedulerConfig {
            max_idle_ms: 5,
            min_sleep_ms: 10,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_sleep_ms (10)"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SchedulerConfig = serde_yaml::from_str("name: sensors\n").unwrap();
        assert_eq!(config.name, "sensors");
        assert_eq!(config.max_idle_ms, DEFAULT_MAX_IDLE_MS);
        assert_eq!(config.min_sleep_ms, DEFAULT_MIN_SLEEP_MS);
    }
}
