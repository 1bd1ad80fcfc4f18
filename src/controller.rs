use crate::engine::{DetectionEngine, EngineStats};
use crate::error::DetectorError;
use crate::model::validate_sensitivity;
use std::sync::Arc;
use tracing::{info, warn};

/// Entry point for sensitivity changes from any execution context.
///
/// Holds nothing but a handle to the engine: it checks the requested ratio
/// against the model's domain, then forwards it. Safe to call while the
/// ingestion loop is running.
#[derive(Clone)]
pub struct SensitivityController {
    engine: Arc<DetectionEngine>,
}

impl SensitivityController {
    pub fn new(engine: Arc<DetectionEngine>) -> Self {
        Self { engine }
    }

    /// Validate and apply `ratio`, forcing a retrain when the window is full.
    pub fn apply(&self, ratio: f64) -> Result<EngineStats, DetectorError> {
        if let Err(e) = validate_sensitivity(ratio) {
            warn!(requested = ratio, error = %e, "Rejected sensitivity change.");
            return Err(e);
        }

        self.engine.set_sensitivity(ratio)?;
        let stats = self.engine.stats();
        info!(
            sensitivity = stats.sensitivity,
            trainings = stats.trainings,
            "Sensitivity applied."
        );
        Ok(stats)
    }

    /// Refit on the current window without changing sensitivity.
    pub fn retrain(&self) -> EngineStats {
        self.engine.retrain();
        self.engine.stats()
    }

    pub fn engine(&self) -> &Arc<DetectionEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn controller(capacity: usize) -> SensitivityController {
        let config = EngineConfig {
            seed: Some(9),
            ..EngineConfig::with_capacity(capacity, 0.05)
        };
        SensitivityController::new(Arc::new(DetectionEngine::with_config(&config).unwrap()))
    }

    #[test]
    fn test_apply_valid_ratio_retrains_full_window() {
        let ctl = controller(4);
        for v in [1.0, 2.0, 3.0, 4.0] {
            ctl.engine().ingest(Some(v));
        }

        let stats = ctl.apply(0.25).unwrap();
        assert_eq!(stats.sensitivity, 0.25);
        assert_eq!(stats.trainings, 2);
    }

    #[test]
    fn test_apply_rejects_out_of_domain() {
        let ctl = controller(4);
        assert!(ctl.apply(0.0).is_err());
        assert!(ctl.apply(1.5).is_err());
        assert!(ctl.apply(f64::NAN).is_err());
        assert_eq!(ctl.engine().sensitivity(), 0.05);
    }

    #[test]
    fn test_retrain_while_warming_is_noop() {
        let ctl = controller(4);
        ctl.engine().ingest(Some(1.0));
        assert_eq!(ctl.retrain().trainings, 0);
    }
}
