//! KernelConfig - TOML configuration with defaults and validation.
//!
//! ```toml
//! tick_interval_ms = 50
//! apply_proposals = false
//! track_stalls = false
//! activation_delay_ms = 100
//! inbound_capacity = 1024
//!
//! [limits]
//! max_observations_per_task = 1000
//! max_task_age_ms = 300000
//! max_stalled_cycles = 10
//! max_observation_gap_ms = 30000
//! max_duplicate_ratio = 0.3
//!
//! [observations]
//! max_per_correlation = 5000
//!
//! [telemetry]
//! retention = 5000
//! publish = true
//! ```
//!
//! Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::policy::PolicyLimits;
use crate::execution::DEFAULT_ACTIVATION_DELAY_MS;
use crate::impls::recording_telemetry::DEFAULT_RETENTION;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub tick_interval_ms: u64,
    /// Apply each proposal to the runtime before handing it to the effector.
    pub apply_proposals: bool,
    /// Run stall accounting (`stalled_cycle_count`) on every tick.
    pub track_stalls: bool,
    pub activation_delay_ms: i64,
    /// Raw inbound messages queued for the loop; further ones are dropped.
    pub inbound_capacity: usize,
    pub limits: PolicyLimits,
    pub observations: ObservationConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            apply_proposals: false,
            track_stalls: false,
            activation_delay_ms: DEFAULT_ACTIVATION_DELAY_MS,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            limits: PolicyLimits::default(),
            observations: ObservationConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    /// Per-correlation cap; absent means unbounded.
    pub max_per_correlation: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Events kept by the in-memory telemetry buffer.
    pub retention: usize,
    /// Publish every event on the transport, when there is one.
    pub publish: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            publish: true,
        }
    }
}

impl KernelConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: KernelConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.activation_delay_ms < 0 {
            return Err(ConfigError::Invalid(
                "activation_delay_ms must not be negative".into(),
            ));
        }
        if self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "inbound_capacity must be greater than zero".into(),
            ));
        }
        if let Some(ratio) = self.limits.max_duplicate_ratio
            && !(0.0..=1.0).contains(&ratio)
        {
            return Err(ConfigError::Invalid(format!(
                "limits.max_duplicate_ratio must be within [0, 1], got {ratio}"
            )));
        }
        if self.observations.max_per_correlation == Some(0) {
            return Err(ConfigError::Invalid(
                "observations.max_per_correlation must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
