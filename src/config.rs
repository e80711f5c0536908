//! Reconciler configuration
//!
//! Loaded from an optional YAML file; every field has a default, so an empty
//! file (or none at all) yields a working configuration. The CLI layers its
//! flags and environment variables on top before calling [`ReconcilerConfig::validate`].
//!
//! ```yaml
//! namePrefix: mlops
//! container:
//!   image: sklearn-inference:1.2-1
//!   executionRole: arn:aws:iam::123456789012:role/SageMakerRole
//! environment:
//!   SAGEMAKER_PROGRAM: inference.py
//! pollIntervalMs: 1000
//! settleTimeoutSecs: 1800
//! deleteTimeoutSecs: 600
//! retry:
//!   maxAttempts: 4
//!   initialDelayMs: 200
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::naming::validate_prefix;
use crate::retry::RetryConfig;
use crate::types::{default_container_env, ContainerEnv, ContainerSpec};
use crate::Error;

/// Ceiling on `retry.maxAttempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 20;

/// Retry policy for platform calls, in serializable form
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    /// Attempts including the first, between 1 and [`MAX_RETRY_ATTEMPTS`]
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig {
            max_attempts: s.max_attempts,
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
        }
    }
}

/// Everything the reconciler needs besides its adapter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    /// Prefix owning every resource this reconciler creates
    pub name_prefix: String,
    /// Serving container for new models
    pub container: ContainerSpec,
    /// Environment for new models' containers
    pub environment: ContainerEnv,
    /// Sleep between describe calls while waiting for an endpoint
    pub poll_interval_ms: u64,
    /// Bound on waiting for an endpoint to settle
    pub settle_timeout_secs: u64,
    /// Bound on waiting for an endpoint deletion
    pub delete_timeout_secs: u64,
    /// Retry policy for platform calls
    pub retry: RetrySettings,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            name_prefix: crate::DEFAULT_NAME_PREFIX.to_string(),
            container: ContainerSpec::default(),
            environment: default_container_env(),
            poll_interval_ms: crate::DEFAULT_POLL_INTERVAL_MS,
            settle_timeout_secs: crate::DEFAULT_SETTLE_TIMEOUT_SECS,
            delete_timeout_secs: crate::DEFAULT_DELETE_TIMEOUT_SECS,
            retry: RetrySettings::default(),
        }
    }
}

impl ReconcilerConfig {
    /// Parse YAML; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid config: {e}")))
    }

    /// Read and parse a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    /// Reject settings the reconciler cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        validate_prefix(&self.name_prefix)?;
        if self.container.image.trim().is_empty() {
            return Err(Error::validation_for_field(
                "container.image",
                "container image must not be empty",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::validation_for_field(
                "pollIntervalMs",
                "poll interval must be positive",
            ));
        }
        if self.settle_timeout_secs == 0 || self.delete_timeout_secs == 0 {
            return Err(Error::validation_for_field(
                "settleTimeoutSecs",
                "wait timeouts must be positive",
            ));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(Error::validation_for_field(
                "retry.maxAttempts",
                format!(
                    "max attempts must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                    self.retry.max_attempts
                ),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::validation_for_field(
                "retry.backoffMultiplier",
                format!(
                    "backoff multiplier must be at least 1.0, got {}",
                    self.retry.backoff_multiplier
                ),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::validation_for_field(
                "retry.initialDelayMs",
                "initial delay must not exceed max delay",
            ));
        }
        Ok(())
    }

    /// Sleep between describe calls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on waiting for an endpoint to settle
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    /// Bound on waiting for an endpoint deletion
    pub fn delete_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_timeout_secs)
    }

    /// Retry policy for platform calls
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }
}
