//! Centralized daemon configuration.
//!
//! Loaded via the `config` crate from `FLOWBOT_`-prefixed environment
//! variables. Nested keys use `__`, e.g. `FLOWBOT_QUEUE__WORKERS=4` or
//! `FLOWBOT_ENGINE__MAX_DEPTH=32`.

use config::{Config, ConfigError, Environment};
use flowbot_flows::EngineConfig;
use flowbot_scheduler::{PollerConfig, QueueConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLOWBOT";

/// Daemon configuration composed from library configs.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Execution engine limits.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Queue worker settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Whether executions go through the queue. When false every
    /// submission runs inline.
    #[serde(default = "default_true")]
    pub queue_enabled: bool,

    /// Poller settings.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Whether the poller runs.
    #[serde(default = "default_true")]
    pub poller_enabled: bool,

    /// JSON file of flows to load at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            queue: QueueConfig::default(),
            queue_enabled: true,
            poller: PollerConfig::default(),
            poller_enabled: true,
            seed_file: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed into its field.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(environment())
    }

    fn from_environment(source: Environment) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> AppConfig {
        let source = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect::<config::Map<String, String>>();
        AppConfig::from_environment(environment().source(Some(source))).unwrap()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = load(&[]);
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.poller.interval_secs, 15);
        assert_eq!(config.poller.default_poll_interval_secs, 60);
        assert!(config.queue_enabled);
        assert!(config.poller_enabled);
        assert!(config.seed_file.is_none());
    }

    #[test]
    fn nested_variables_override_sections() {
        let config = load(&[
            ("FLOWBOT_QUEUE__WORKERS", "4"),
            ("FLOWBOT_ENGINE__MAX_DEPTH", "8"),
            ("FLOWBOT_POLLER__INTERVAL_SECS", "30"),
            ("FLOWBOT_QUEUE_ENABLED", "false"),
            ("FLOWBOT_SEED_FILE", "/etc/flowbot/flows.json"),
        ]);
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.engine.max_depth, 8);
        assert_eq!(config.poller.interval_secs, 30);
        assert!(!config.queue_enabled);
        assert_eq!(
            config.seed_file,
            Some(PathBuf::from("/etc/flowbot/flows.json"))
        );
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let config = load(&[("OTHER_QUEUE__WORKERS", "9")]);
        assert_eq!(config.queue.workers, 2);
    }
}
