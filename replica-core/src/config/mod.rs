//! Configuration for replicas, links and the ambient stack
//!
//! Defaults, optional TOML file, then `REPLICA_*` environment overrides.

use crate::core_boundary::link::LinkConfig;
use crate::core_sync::reconciler::ReconcilerConfig;
use crate::logging::{LogConfig, LogLevel};
use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot fetch policy
    pub reconciler: ReconcilerConfig,

    /// Fault injection on the simulated boundary
    pub link: LinkConfig,

    pub logging: LogConfig,

    pub metrics: MetricsConfig,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Describe metrics at startup
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn parse_env<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue { key: key.to_string(), reason: e.to_string() })
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim())
        .map_err(|e| ConfigError::InvalidValue { key: key.to_string(), reason: e.to_string() })
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `REPLICA_<SECTION>_<KEY>`, for example
    /// `REPLICA_RECONCILER_FETCH_TIMEOUT=2s` or `REPLICA_LINK_DROP_RATE=0.1`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing sections take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Optional file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REPLICA_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        const FETCH_TIMEOUT: &str = "REPLICA_RECONCILER_FETCH_TIMEOUT";
        const FETCH_ATTEMPTS: &str = "REPLICA_RECONCILER_FETCH_ATTEMPTS";
        const RETRY_BACKOFF: &str = "REPLICA_RECONCILER_RETRY_BACKOFF";
        const DROP_RATE: &str = "REPLICA_LINK_DROP_RATE";
        const REORDER_RATE: &str = "REPLICA_LINK_REORDER_RATE";
        const SEED: &str = "REPLICA_LINK_SEED";
        const LOG_LEVEL: &str = "REPLICA_LOG_LEVEL";
        const LOG_JSON: &str = "REPLICA_LOG_JSON";
        const METRICS_ENABLED: &str = "REPLICA_METRICS_ENABLED";

        // Reconciler
        if let Some(raw) = lookup(FETCH_TIMEOUT) {
            self.reconciler.fetch_timeout = parse_duration(FETCH_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(FETCH_ATTEMPTS) {
            self.reconciler.fetch_attempts = parse_env(FETCH_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(RETRY_BACKOFF) {
            self.reconciler.retry_backoff = parse_duration(RETRY_BACKOFF, &raw)?;
        }

        // Link
        if let Some(raw) = lookup(DROP_RATE) {
            self.link.drop_rate = parse_env(DROP_RATE, &raw)?;
        }
        if let Some(raw) = lookup(REORDER_RATE) {
            self.link.reorder_rate = parse_env(REORDER_RATE, &raw)?;
        }
        if let Some(raw) = lookup(SEED) {
            self.link.seed = Some(parse_env(SEED, &raw)?);
        }

        // Logging
        if let Some(raw) = lookup(LOG_LEVEL) {
            self.logging.level = parse_env::<LogLevel>(LOG_LEVEL, &raw)?;
        }
        if let Some(raw) = lookup(LOG_JSON) {
            self.logging.json_format = parse_env(LOG_JSON, &raw)?;
        }

        // Metrics
        if let Some(raw) = lookup(METRICS_ENABLED) {
            self.metrics.enabled = parse_env(METRICS_ENABLED, &raw)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconciler.fetch_attempts == 0 {
            return Err(ConfigError::ValidationFailed("fetch_attempts must be greater than 0".to_string()));
        }

        if self.reconciler.fetch_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed("fetch_timeout must be greater than 0".to_string()));
        }

        for (name, rate) in [("drop_rate", self.link.drop_rate), ("reorder_rate", self.link.reorder_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::ValidationFailed(format!("{} must be within [0, 1], got {}", name, rate)));
            }
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }
}
