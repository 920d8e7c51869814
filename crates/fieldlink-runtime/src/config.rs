//! Runtime configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fieldlink_core::MAX_BATCH_SIZE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid runtime config: {0}")]
    Invalid(String),
}

/// Follow-up requests for records lost to truncated responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContinuationConfig {
    pub enabled: bool,

    /// Follow-up requests per batch
    pub max_rounds: usize,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rounds: 2,
        }
    }
}

/// How the invoker batches, times out and retries backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Upper bound on records per backend call; tools may ask for less
    pub max_batch_size: usize,

    /// Per-call timeout, e.g. `120s` or `2m`
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    /// Retries after the first attempt, transient errors only
    pub max_retries: usize,

    #[serde(with = "humantime_duration")]
    pub retry_min_delay: Duration,

    pub max_concurrent_batches: usize,

    pub continuation: ContinuationConfig,
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_BATCH_SIZE,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            retry_min_delay: Duration::from_millis(500),
            max_concurrent_batches: 4,
            continuation: ContinuationConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_batch_size) {
            return Err(ConfigError::Invalid(format!(
                "maxBatchSize must be between 1 and {}",
                MAX_BATCH_SIZE
            )));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::Invalid(
                "maxConcurrentBatches must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Effective batch size for a tool.
    pub fn batch_size_for(&self, tool_batch_size: usize) -> usize {
        tool_batch_size.min(self.max_batch_size).clamp(1, MAX_BATCH_SIZE)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: usize, min_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_min_delay = min_delay;
        self
    }

    pub fn with_continuation(mut self, enabled: bool, max_rounds: usize) -> Self {
        self.continuation = ContinuationConfig {
            enabled,
            max_rounds,
        };
        self
    }
}
