//! Engine configuration

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Engine configuration, loaded from the environment with the `POLICY`
/// prefix (e.g. `POLICY_PORT=9000`)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bulk evaluation worker pool size
    #[serde(default = "default_eval_workers")]
    pub max_eval_workers: usize,

    /// Per-workload deadline inside a bulk evaluation, in seconds
    #[serde(default = "default_workload_timeout")]
    pub workload_timeout_secs: u64,

    /// Automation rule execution pool size
    #[serde(default = "default_automation_pool")]
    pub automation_pool: usize,

    /// Threshold monitor cadence in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Age after which completed/failed enforcement statuses are swept,
    /// in hours
    #[serde(default = "default_retention_hours")]
    pub enforcement_retention_hours: u64,

    /// Cadence of the enforcement retention sweep, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Event bus channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_bus_capacity: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_eval_workers() -> usize {
    16
}

fn default_workload_timeout() -> u64 {
    30
}

fn default_automation_pool() -> usize {
    8
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_retention_hours() -> u64 {
    24
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_eval_workers: default_eval_workers(),
            workload_timeout_secs: default_workload_timeout(),
            automation_pool: default_automation_pool(),
            monitor_interval_secs: default_monitor_interval(),
            enforcement_retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
            event_bus_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("POLICY"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }

    pub fn workload_timeout(&self) -> Duration {
        Duration::from_secs(self.workload_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn retention_horizon(&self) -> Duration {
        Duration::from_secs(self.enforcement_retention_hours * 3600)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_eval_workers, 16);
        assert_eq!(config.automation_pool, 8);
        assert_eq!(config.monitor_interval_secs, 30);
        assert_eq!(config.retention_horizon(), Duration::from_secs(24 * 3600));
    }
}
