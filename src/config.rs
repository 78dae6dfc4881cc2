//! Application-level configuration loading: retry timings, buffering and detector tuning.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

use crate::services::{
    motion::DetectorConfig,
    retry::RetryPolicy,
    session::{DEFAULT_TRIGGER_CAPACITY, SessionOptions},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LAPGATE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Fixed backoff between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Give up after this many consecutive failures; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Bound on host id regenerations; `None` retries forever.
    pub max_id_attempts: Option<u32>,
    /// Period of the elapsed-time sampler while a race runs.
    pub sampler_interval_ms: u64,
    /// Number of received triggers kept for inspection.
    pub trigger_buffer_capacity: usize,
    /// Haptic pulse length on a gate trigger.
    pub haptic_pulse_ms: u64,
    /// Motion detector tuning.
    pub detector: DetectorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: None,
            max_id_attempts: None,
            sampler_interval_ms: 10,
            trigger_buffer_capacity: DEFAULT_TRIGGER_CAPACITY,
            haptic_pulse_ms: 200,
            detector: DetectorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration from `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        reconnect_delay_ms = config.reconnect_delay_ms,
                        sampler_interval_ms = config.sampler_interval_ms,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Retry schedule derived from the reconnect settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(Duration::from_millis(self.reconnect_delay_ms));
        match self.max_reconnect_attempts {
            Some(max) => policy.with_max_attempts(max),
            None => policy,
        }
    }

    /// Options handed to the session engine.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            retry: self.retry_policy(),
            max_id_attempts: self.max_id_attempts,
            trigger_capacity: self.trigger_buffer_capacity,
        }
    }

    /// Sampler period, never shorter than one millisecond.
    pub fn sampler_interval(&self) -> Duration {
        Duration::from_millis(self.sampler_interval_ms.max(1))
    }

    /// Haptic pulse length.
    pub fn haptic_pulse(&self) -> Duration {
        Duration::from_millis(self.haptic_pulse_ms)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn write_temp(contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("lapgate-{}.json", Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let path = write_temp(
            r#"{ "reconnect_delay_ms": 500, "max_id_attempts": 5,
                 "detector": { "threshold": 0.3 } }"#,
        );
        let config = AppConfig::load_from(&path);
        fs::remove_file(&path).unwrap();

        assert_eq!(config.reconnect_delay_ms, 500);
        assert_eq!(config.max_id_attempts, Some(5));
        assert_eq!(config.sampler_interval_ms, 10);
        assert_eq!(config.detector.threshold, 0.3);
        assert_eq!(config.detector.sensitivity, 1.0);
        assert_eq!(config.retry_policy().delay(), Duration::from_millis(500));
        assert_eq!(config.retry_policy().max_attempts(), None);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = env::temp_dir().join(format!("lapgate-missing-{}.json", Uuid::new_v4()));
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = write_temp("{ not json");
        let config = AppConfig::load_from(&path);
        fs::remove_file(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn bounded_reconnects_flow_into_session_options() {
        let config = AppConfig {
            max_reconnect_attempts: Some(4),
            trigger_buffer_capacity: 8,
            ..AppConfig::default()
        };
        let options = config.session_options();
        assert_eq!(options.retry.max_attempts(), Some(4));
        assert_eq!(options.trigger_capacity, 8);
    }
}
