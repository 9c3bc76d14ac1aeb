//! Configuration using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. built-in defaults
//! 2. `labdeck.toml` (or the file passed with `--config`)
//! 3. environment variables prefixed with `LABDECK_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! LABDECK_APPLICATION__LOG_LEVEL=debug
//! LABDECK_RUNS__ROOT=/data/runs
//! LABDECK_RETRY__MAX_ATTEMPTS=5
//! ```

use crate::error::DeckError;
use crate::position::Format;
use figment::{
    providers::{Env, Format as _, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "labdeck.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for DeckError {
    fn from(err: ConfigError) -> Self {
        DeckError::Config(err.to_string())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub runs: RunsConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name, used in operator notifications
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json_logs: bool,
}

/// Where run directories live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    #[serde(default = "default_runs_root")]
    pub root: PathBuf,
}

/// Device driver boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Completion timeout for one dispatched command, in milliseconds
    #[serde(default = "default_device_timeout")]
    pub timeout_ms: u64,
}

/// Whole-method retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

/// Minimum 2-probe separation per labware format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default = "default_separation_384")]
    pub separation_384: usize,
    #[serde(default = "default_separation_small")]
    pub separation_96: usize,
    #[serde(default = "default_separation_small")]
    pub separation_24: usize,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "labdeck".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_runs_root() -> PathBuf {
    PathBuf::from("runs")
}

fn default_device_timeout() -> u64 {
    120_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    1000
}

fn default_separation_384() -> usize {
    Format::Wells384.default_separation()
}

fn default_separation_small() -> usize {
    Format::Wells96.default_separation()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            root: default_runs_root(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_device_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            separation_384: default_separation_384(),
            separation_96: default_separation_small(),
            separation_24: default_separation_small(),
        }
    }
}

impl AllocationConfig {
    /// Configured separation for `format`.
    pub fn separation_for(&self, format: Format) -> usize {
        match format {
            Format::Wells384 => self.separation_384,
            Format::Wells96 => self.separation_96,
            Format::Wells24 => self.separation_24,
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `labdeck.toml` (if present) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LABDECK_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - At least one attempt is allowed
    /// - Every separation is at least 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        for format in Format::ALL {
            if self.allocation.separation_for(format) == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "allocation separation for {format} must be at least 1"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let settings = Settings::load_from("missing.toml").unwrap();
            assert_eq!(settings.retry.max_attempts, 3);
            assert_eq!(settings.allocation.separation_for(Format::Wells384), 4);
            assert_eq!(settings.runs.root, PathBuf::from("runs"));
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "labdeck.toml",
                r#"
                [application]
                log_level = "debug"

                [allocation]
                separation_96 = 2
                "#,
            )?;
            jail.set_env("LABDECK_RETRY__MAX_ATTEMPTS", "5");
            let settings = Settings::load().unwrap();
            assert_eq!(settings.application.log_level, "debug");
            assert_eq!(settings.allocation.separation_96, 2);
            assert_eq!(settings.retry.max_attempts, 5);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.allocation.separation_24 = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_config_errors_are_final() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        let err = DeckError::from(settings.validate().unwrap_err());
        assert!(matches!(&err, DeckError::Config(msg) if msg.contains("max_attempts")));
        assert!(!err.is_retryable());
        assert_eq!(err.exit_code(), crate::error::exit::FAILURE);
    }
}
