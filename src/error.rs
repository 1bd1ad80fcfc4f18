//! Error taxonomy for the detection core and its host.
//!
//! Corrupt (absent) measurements and source exhaustion are not errors and
//! have no variant here: the engine drops the former and the ingestion loop
//! simply ends on the latter.

use std::fmt;

/// Errors raised by the outlier model and the detection engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// A tunable was outside its accepted domain. The previous value stays
    /// in effect.
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// `classify` was reached before any successful `train`.
    NotTrained,
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter {
                name,
                value,
                min,
                max,
            } => write!(
                f,
                "Invalid parameter {}: {} (accepted range {} to {})",
                name, value, min, max
            ),
            Self::NotTrained => write!(f, "Model has not been trained"),
        }
    }
}

impl std::error::Error for DetectorError {}

/// Errors that can occur while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
            Self::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<DetectorError> for ConfigError {
    fn from(e: DetectorError) -> Self {
        Self::Invalid(e.to_string())
    }
}

/// Errors from starting or stopping the ingestion loop.
#[derive(Debug)]
pub enum StreamError {
    /// The host is shutting down; no new runs are accepted
    ShuttingDown,
    Spawn(std::io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShuttingDown => write!(f, "Stream host is shutting down"),
            Self::Spawn(e) => write!(f, "Failed to spawn ingestion thread: {}", e),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ShuttingDown => None,
            Self::Spawn(e) => Some(e),
        }
    }
}
