//! Streaming anomaly detection over a sliding window.
//!
//! Measurements flow from a source into [`engine::DetectionEngine`], which
//! keeps the last `capacity` accepted values, trains an isolation forest
//! once the window first fills, and classifies every later value. Any
//! thread may change the sensitivity through
//! [`controller::SensitivityController`]; the change forces a full retrain
//! on the current window.
//!
//! ```no_run
//! use anomaly_stream::engine::DetectionEngine;
//!
//! let engine = DetectionEngine::new(10, 0.05).unwrap();
//! for _ in 0..10 {
//!     engine.ingest(Some(5.0));
//! }
//! let result = engine.ingest(Some(500.0)).unwrap();
//! assert!(result.is_anomaly);
//! ```

pub mod algo;
pub mod api;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod history;
pub mod metrics;
pub mod model;
pub mod source;
pub mod stream;
pub mod window;

pub use config::{AppConfig, EngineConfig};
pub use controller::SensitivityController;
pub use engine::{DetectionEngine, DetectionResult, EngineStats, Phase};
pub use error::{ConfigError, DetectorError};
