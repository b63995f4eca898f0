use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempo::SchedulerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub demo: DemoConfig,
}

/// Shape of the phased-event demo: event `i` starts `i * stagger_ms` after
/// the first, serves every `base_interval_ms` plus a per-event spread, and
/// lives `base_lifetime_ms + i * lifetime_step_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub events: usize,
    pub stagger_ms: u64,
    pub base_interval_ms: u64,
    pub interval_spread_ms: u64,
    pub base_lifetime_ms: u64,
    pub lifetime_step_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            events: 10,
            stagger_ms: 200,
            base_interval_ms: 900,
            interval_spread_ms: 300,
            base_lifetime_ms: 6500,
            lifetime_step_ms: 250,
        }
    }
}

impl DemoConfig {
    pub fn start_delay(&self, index: usize) -> Duration {
        Duration::from_millis(self.stagger_ms.saturating_mul(index as u64))
    }

    /// Spread intervals deterministically so events drift against each other.
    pub fn interval(&self, index: usize) -> Duration {
        let spread = if self.interval_spread_ms == 0 {
            0
        } else {
            (index as u64).wrapping_mul(97) % self.interval_spread_ms
        };
        Duration::from_millis(self.base_interval_ms + spread)
    }

    pub fn lifetime(&self, index: usize) -> Duration {
        Duration::from_millis(self.base_lifetime_ms + self.lifetime_step_ms.saturating_mul(index as u64))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.scheduler.validate().context("Invalid scheduler section")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.scheduler.name, "Scheduler");
        assert_eq!(config.demo.events, 10);
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  name: sensors\n  max_idle_ms: 500\ndemo:\n  events: 3").unwrap();
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.scheduler.name, "sensors");
        assert_eq!(config.scheduler.max_idle_ms, 500);
        assert_eq!(config.scheduler.min_sleep_ms, 1);
        assert_eq!(config.demo.events, 3);
        assert_eq!(config.demo.stagger_ms, 200);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_scheduler() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scheduler:\n  max_idle_ms: 0").unwrap();
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_yaml_round_trip_keeps_names() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("max_idle_ms: 10000"));
        assert!(yaml.contains("stagger_ms: 200"));
    }

    #[test]
    fn test_demo_shape() {
        let demo = DemoConfig::default();
        assert_eq!(demo.start_delay(0), Duration::ZERO);
        assert_eq!(demo.start_delay(3), Duration::from_millis(600));
        assert_eq!(demo.interval(0), Duration::from_millis(900));
        assert_eq!(demo.interval(1), Duration::from_millis(997));
        assert_eq!(demo.interval(4), Duration::from_millis(900 + 388 % 300));
        assert_eq!(demo.lifetime(2), Duration::from_millis(7000));
    }

    #[test]
    fn test_zero_spread() {
        let demo = DemoConfig {
            interval_spread_ms: 0,
            ..Default::default()
        };
        assert_eq!(demo.interval(7), Duration::from_millis(900));
    }
}
