//! Configuration for the command-line runner.
//!
//! Runtime knobs come from environment variables; what to run comes from the
//! command line (see `cli`).

use enchantnet_core::ManagerConfig;
use std::time::Duration;

/// Default status report interval in seconds.
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 5;

/// Default log filter.
pub const DEFAULT_LOG_FILTER: &str = "enchantnet=info";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub manager: ManagerConfig,

    /// How often collected status is logged.
    pub status_interval: Duration,

    pub log_filter: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ENCHANTNET_STATUS_INTERVAL_SECS` | `5` |
    /// | `ENCHANTNET_LOG` | `enchantnet=info` |
    /// | `ENCHANTNET_MAX_INSTANCES` | `16` |
    /// | `ENCHANTNET_STOP_TIMEOUT_MS` | `3000` |
    /// | `ENCHANTNET_HEARTBEAT_MS` | `1000` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            manager: ManagerConfig::from_env(),
            status_interval: std::env::var("ENCHANTNET_STATUS_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.status_interval),
            log_filter: std::env::var("ENCHANTNET_LOG").unwrap_or(default.log_filter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.status_interval, Duration::from_secs(5));
        assert_eq!(config.log_filter, "enchantnet=info");
        assert_eq!(config.manager, ManagerConfig::default());
    }

    #[test]
    fn test_from_env_uses_defaults() {
        std::env::remove_var("ENCHANTNET_STATUS_INTERVAL_SECS");
        std::env::remove_var("ENCHANTNET_LOG");
        std::env::remove_var("ENCHANTNET_MAX_INSTANCES");
        std::env::remove_var("ENCHANTNET_STOP_TIMEOUT_MS");
        std::env::remove_var("ENCHANTNET_HEARTBEAT_MS");

        assert_eq!(CliConfig::from_env(), CliConfig::default());
    }
}
