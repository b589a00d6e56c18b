//! TOML configuration for casewatch.
//!
//! Layered lookup: an explicit path, the `CASEWATCH_CONFIG` environment
//! variable, `./casewatch.toml`, then compiled-in defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "CASEWATCH_CONFIG";
const LOCAL_CONFIG: &str = "casewatch.toml";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("polling.interval_ms must be between 250 and 60000, got {0}")]
    IntervalOutOfRange(u64),

    #[error("polling.failure_streak_threshold must be at least 1")]
    ZeroStreakThreshold,

    #[error("tracker.tick_ms must be at least 1")]
    ZeroTick,

    #[error("api.base_url must not be empty")]
    EmptyBaseUrl,
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration. An explicit path must load; the environment
    /// and local file are best-effort.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "CASEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if !(250..=60_000).contains(&self.polling.interval_ms) {
            return Err(ConfigError::IntervalOutOfRange(self.polling.interval_ms));
        }
        if self.polling.failure_streak_threshold == 0 {
            return Err(ConfigError::ZeroStreakThreshold);
        }
        if self.tracker.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Platform REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Consecutive task-queue failures after which only the record store is polled.
    pub failure_streak_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            failure_streak_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tick_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { tick_ms: 1_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.polling.interval_ms, 2_000);
        assert_eq!(cfg.polling.failure_streak_threshold, 3);
        assert_eq!(cfg.tracker.tick_ms, 1_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [polling]
            interval_ms = 2500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.polling.interval_ms, 2_500);
        assert_eq!(cfg.polling.failure_streak_threshold, 3);
        assert_eq!(cfg.api, ApiConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.polling.interval_ms = 10;
        assert_eq!(cfg.validate(), Err(ConfigError::IntervalOutOfRange(10)));

        let mut cfg = Config::default();
        cfg.polling.failure_streak_threshold = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroStreakThreshold));

        let mut cfg = Config::default();
        cfg.api.base_url = " ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyBaseUrl));
    }
}
