use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::HarnessConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid gate capacity for {0}: must be at least 1")]
    InvalidGateCapacity(String),

    #[error("Invalid dialog max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("poll_interval_ms ({0}) must not exceed convergence_secs ({1}s)")]
    PollIntervalExceedsTimeout(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("{0} ({1}s) exceeds the maximum of {MAX_TIMEOUT_SECS}s")]
    TimeoutTooLarge(&'static str, u64),

    #[error("Checkpoint ref name cannot be empty")]
    EmptyCheckpointRef,

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Upper bound on configured timeouts, one day.
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration relative to the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .e2e/config.yaml (shared harness settings)
    /// 3. .e2e/local.yaml (developer overrides, optional)
    /// 4. Environment variables (E2E_* prefix, `__` separates nesting)
    pub fn load() -> Result<HarnessConfig> {
        Self::load_from_dir(".")
    }

    /// Load configuration with `root` in place of the current directory.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<HarnessConfig> {
        let root = root.as_ref();
        let config: HarnessConfig = Figment::new()
            .merge(Serialized::defaults(HarnessConfig::default()))
            .merge(Yaml::file(root.join(".e2e/config.yaml")))
            .merge(Yaml::file(root.join(".e2e/local.yaml")))
            .merge(Env::prefixed("E2E_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<HarnessConfig> {
        let config: HarnessConfig = Figment::new()
            .merge(Serialized::defaults(HarnessConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &HarnessConfig) -> Result<(), ConfigError> {
        if let Some((agent, _)) = config.gates.iter().find(|(_, capacity)| **capacity == 0) {
            return Err(ConfigError::InvalidGateCapacity(agent.clone()));
        }

        if config.dialog.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(config.dialog.max_iterations));
        }

        let timeouts = &config.timeouts;
        for (field, secs) in [
            ("timeouts.test_secs", timeouts.test_secs),
            ("timeouts.convergence_secs", timeouts.convergence_secs),
            ("timeouts.session_wait_secs", timeouts.session_wait_secs),
            ("dialog.wait_secs", config.dialog.wait_secs),
        ] {
            if secs > MAX_TIMEOUT_SECS {
                return Err(ConfigError::TimeoutTooLarge(field, secs));
            }
        }
        for (field, millis) in [
            ("timeouts.retry_delay_ms", timeouts.retry_delay_ms),
            ("timeouts.kill_grace_ms", timeouts.kill_grace_ms),
        ] {
            if millis / 1_000 > MAX_TIMEOUT_SECS {
                return Err(ConfigError::TimeoutTooLarge(field, millis / 1_000));
            }
        }
        if timeouts.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(timeouts.poll_interval_ms));
        }
        if timeouts.poll_interval() > timeouts.convergence() {
            return Err(ConfigError::PollIntervalExceedsTimeout(
                timeouts.poll_interval_ms,
                timeouts.convergence_secs,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.checkpoints.ref_name.trim().is_empty() {
            return Err(ConfigError::EmptyCheckpointRef);
        }

        if config.checkpoints.shadow_branch_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "shadow_branch_prefix cannot be empty".to_string(),
            ));
        }

        if config.repo.setup_commands.iter().any(Vec::is_empty) {
            return Err(ConfigError::ValidationFailed(
                "repo.setup_commands entries cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
