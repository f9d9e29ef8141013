use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::primitive::StrategyPreference;
use crate::shared::error::ConfigError;

/// Smallest chunk that can always hold one complete UTF-8 character.
const MIN_CHUNK_SIZE: usize = 4;

/// Tunables for both flow-control directions and the session lifecycle.
///
/// Every field has a default, so a config file only needs to name the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub output: OutputBatchConfig,
    pub input: InputThrottleConfig,
    pub strategy: StrategyPreference,
    /// How long to keep draining child output after the exit notification
    /// while more output keeps arriving.
    pub exit_drain_ms: u64,
    /// Escalate to SIGKILL when a softer kill signal has not ended the child
    /// within this many milliseconds. `None` disables escalation.
    pub kill_timeout_ms: Option<u64>,
    /// Consumer acknowledgement backpressure. Disabled when `None`.
    pub ack: Option<AckWatermarks>,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            output: OutputBatchConfig::default(),
            input: InputThrottleConfig::default(),
            strategy: StrategyPreference::Auto,
            exit_drain_ms: 250,
            kill_timeout_ms: Some(3000),
            ack: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputBatchConfig {
    pub flush_threshold: usize,
    pub quiet_period_ms: u64,
    pub max_latency_ms: u64,
}

impl Default for OutputBatchConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 4000,
            quiet_period_ms: 10,
            max_latency_ms: 50,
        }
    }
}

impl OutputBatchConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_millis(self.max_latency_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputThrottleConfig {
    pub chunk_size: usize,
    pub chunk_interval_ms: u64,
}

impl Default for InputThrottleConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_interval_ms: 5,
        }
    }
}

impl InputThrottleConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AckWatermarks {
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for AckWatermarks {
    fn default() -> Self {
        Self {
            high_watermark: 12000,
            low_watermark: 4000,
        }
    }
}

impl FlowControlConfig {
    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.flush_threshold == 0 {
            return Err(ConfigError::Invalid(
                "output.flush_threshold must be greater than zero".to_string(),
            ));
        }
        if self.input.chunk_size < MIN_CHUNK_SIZE {
            return Err(ConfigError::Invalid(format!(
                "input.chunk_size must be at least {MIN_CHUNK_SIZE} bytes"
            )));
        }
        if let Some(ack) = self.ack
            && ack.low_watermark >= ack.high_watermark
        {
            return Err(ConfigError::Invalid(
                "ack.low_watermark must be below ack.high_watermark".to_string(),
            ));
        }
        Ok(())
    }

    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.exit_drain_ms)
    }

    pub fn kill_timeout(&self) -> Option<Duration> {
        self.kill_timeout_ms.map(Duration::from_millis)
    }
}
