//! Configuration for the detector and its host.
//!
//! Every section deserializes with defaults, so a config file only needs the
//! fields it wants to change:
//!
//! ```json
//! { "engine": { "window_capacity": 200, "sensitivity": 0.1 },
//!   "stream": { "interval_ms": 20 } }
//! ```

use crate::algo::isolation_forest::MAX_TREES;
use crate::error::ConfigError;
use crate::model::validate_sensitivity;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detection engine and outlier model settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Sliding window capacity, also the training snapshot size (default: 100)
    pub window_capacity: usize,
    /// Expected anomaly proportion, 0.01 to 0.5 (default: 0.05)
    pub sensitivity: f64,
    /// Trees in the isolation forest, 1 to 1000 (default: 100)
    pub trees: usize,
    /// Subsample size per tree (default: 256)
    pub subsample: usize,
    /// Relative widening of node ranges before a value counts as outside (default: 0.05)
    pub hull_tolerance: f64,
    /// Fixed RNG seed for reproducible forests
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            sensitivity: 0.05,
            trees: 100,
            subsample: 256,
            hull_tolerance: 0.05,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn with_capacity(window_capacity: usize, sensitivity: f64) -> Self {
        Self {
            window_capacity,
            sensitivity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid(
                "engine.window_capacity must be positive".into(),
            ));
        }
        if self.trees == 0 || self.trees > MAX_TREES {
            return Err(ConfigError::Invalid(format!(
                "engine.trees must be within 1 to {}, got {}",
                MAX_TREES, self.trees
            )));
        }
        if self.subsample < 2 {
            return Err(ConfigError::Invalid(
                "engine.subsample must be at least 2".into(),
            ));
        }
        if !self.hull_tolerance.is_finite() || self.hull_tolerance < 0.0 {
            return Err(ConfigError::Invalid(
                "engine.hull_tolerance must be a non-negative number".into(),
            ));
        }
        validate_sensitivity(self.sensitivity)?;
        Ok(())
    }
}

/// Synthetic measurement generator settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// Number of readings before the source ends (default: 1000)
    pub num_points: usize,
    /// Probability that a reading carries an injected spike (default: 0.05)
    pub anomaly_ratio: f64,
    /// Probability that a reading is lost (default: 0.01)
    pub failure_ratio: f64,
    /// Baseline level (default: 100.0)
    pub base: f64,
    /// Half-width of the uniform noise band (default: 10.0)
    pub noise: f64,
    /// Length of the sawtooth seasonal cycle in readings (default: 100)
    pub season_period: usize,
    /// Lower bound of injected spike magnitude (default: 50.0)
    pub spike_min: f64,
    /// Upper bound of injected spike magnitude (default: 100.0)
    pub spike_max: f64,
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            num_points: 1000,
            anomaly_ratio: 0.05,
            failure_ratio: 0.01,
            base: 100.0,
            noise: 10.0,
            season_period: 100,
            spike_min: 50.0,
            spike_max: 100.0,
            seed: None,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, p) in [
            ("source.anomaly_ratio", self.anomaly_ratio),
            ("source.failure_ratio", self.failure_ratio),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within 0.0 to 1.0, got {}",
                    name, p
                )));
            }
        }
        if !self.base.is_finite() {
            return Err(ConfigError::Invalid("source.base must be a finite number".into()));
        }
        if !self.noise.is_finite() || self.noise <= 0.0 {
            return Err(ConfigError::Invalid("source.noise must be positive".into()));
        }
        if !(self.spike_min.is_finite() && self.spike_max.is_finite())
            || self.spike_min >= self.spike_max
        {
            return Err(ConfigError::Invalid(
                "source.spike_min must be below source.spike_max".into(),
            ));
        }
        if self.season_period == 0 {
            return Err(ConfigError::Invalid(
                "source.season_period must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Ingestion loop and result delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Pause between measurements in milliseconds (default: 50)
    pub interval_ms: u64,
    /// Bounded result channel between loop and consumer (default: 1024)
    pub channel_capacity: usize,
    /// Trailing results kept by the consumer (default: 200)
    pub history_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            channel_capacity: 1024,
            history_capacity: 200,
        }
    }
}

/// HTTP control surface settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port to listen on (default: 8080)
    pub port: u16,
    /// Serve the control API while streaming (default: true)
    pub enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enabled: true,
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub source: SourceConfig,
    pub stream: StreamConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    /// Read a JSON config file. Missing sections and fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.source.validate()?;
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.channel_capacity must be positive".into(),
            ));
        }
        if self.stream.history_capacity == 0 {
            return Err(ConfigError::Invalid(
                "stream.history_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
