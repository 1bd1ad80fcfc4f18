use crate::algo::isolation_forest::OutlierScorer;
use crate::config::EngineConfig;
use crate::error::DetectorError;
use crate::metrics;
use crate::model::OutlierModel;
use crate::window::SlidingWindow;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace};

// --- Core Abstractions ---

/// Lifecycle of an engine instance. Moves forward only.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No measurement accepted yet
    Idle,
    /// Window filling, model untrained; every result is non-anomalous
    Warming,
    /// Model trained, every result is classified
    Active,
}

/// Outcome for one accepted measurement
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DetectionResult {
    pub value: f64,
    pub is_anomaly: bool,
    /// Outlier score in [0, 1]; `None` while warming up
    pub score: Option<f64>,
}

impl DetectionResult {
    fn cold_start(value: f64) -> Self {
        Self {
            value,
            is_anomaly: false,
            score: None,
        }
    }
}

/// Point-in-time view of the engine for status reporting
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub phase: Phase,
    pub window_len: usize,
    pub capacity: usize,
    pub sensitivity: f64,
    pub threshold: Option<f64>,
    pub trainings: u64,
    pub ingested: u64,
    pub skipped: u64,
    pub anomalies: u64,
    pub scorer: String,
}

/// Buffer and model pair; only ever touched under the engine lock.
struct EngineState {
    window: SlidingWindow,
    model: OutlierModel,
    trainings: u64,
    ingested: u64,
    skipped: u64,
    anomalies: u64,
}

impl EngineState {
    fn train(&mut self, reason: &'static str) {
        let timer = metrics::TRAINING_LATENCY.start_timer();
        let snapshot = self.window.snapshot();

        match self.model.train(&snapshot) {
            Ok(()) => {
                timer.observe_duration();
                self.trainings += 1;
                metrics::TRAINING_TOTAL.inc();
                info!(
                    reason,
                    window = snapshot.len(),
                    sensitivity = self.model.sensitivity(),
                    threshold = ?self.model.threshold(),
                    trainings = self.trainings,
                    "Model trained."
                );
            }
            Err(e) => {
                timer.stop_and_discard();
                error!(reason, error = %e, "Training failed; keeping previous fit.");
            }
        }
    }

    fn retrain(&mut self, reason: &'static str) {
        if self.window.is_full() {
            self.train(reason);
        } else {
            debug!(
                reason,
                window = self.window.len(),
                capacity = self.window.capacity(),
                "Retrain skipped: window not full."
            );
        }
    }

    fn phase(&self) -> Phase {
        if self.window.is_empty() {
            Phase::Idle
        } else if self.model.is_trained() {
            Phase::Active
        } else {
            Phase::Warming
        }
    }
}

// --- The Engine ---

/// Sliding-window outlier detector shared between an ingestion context and
/// any number of control contexts.
///
/// Every operation takes `&self` and serializes on one lock around the
/// window and model, so a retrain never sees a window mutated mid-fit.
pub struct DetectionEngine {
    state: Mutex<EngineState>,
}

impl DetectionEngine {
    pub fn new(capacity: usize, sensitivity: f64) -> Result<Self, DetectorError> {
        Self::with_config(&EngineConfig::with_capacity(capacity, sensitivity))
    }

    pub fn with_config(config: &EngineConfig) -> Result<Self, DetectorError> {
        check_capacity(config.window_capacity)?;
        let model = OutlierModel::from_config(config)?;
        Ok(Self::assemble(config.window_capacity, model))
    }

    /// Engine over a caller-supplied scoring algorithm.
    pub fn with_scorer(
        capacity: usize,
        sensitivity: f64,
        scorer: Box<dyn OutlierScorer>,
    ) -> Result<Self, DetectorError> {
        check_capacity(capacity)?;
        let model = OutlierModel::new(sensitivity, scorer)?;
        Ok(Self::assemble(capacity, model))
    }

    fn assemble(capacity: usize, model: OutlierModel) -> Self {
        metrics::init();
        debug!(capacity, scorer = model.scorer_name(), "Detection engine created.");
        Self {
            state: Mutex::new(EngineState {
                window: SlidingWindow::new(capacity),
                model,
                trainings: 0,
                ingested: 0,
                skipped: 0,
                anomalies: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // State is consistent between operations, so a panicked holder leaves nothing half-done
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed one measurement. Absent or non-finite readings are dropped
    /// without a result; everything else yields exactly one result.
    pub fn ingest(&self, measurement: Option<f64>) -> Option<DetectionResult> {
        let mut state = self.lock();

        let value = match measurement {
            Some(v) if v.is_finite() => v,
            other => {
                state.skipped += 1;
                metrics::ABSENT_TOTAL.inc();
                trace!(reading = ?other, "Skipped corrupt measurement.");
                return None;
            }
        };

        state.window.push(value);
        state.ingested += 1;
        metrics::INGESTED_TOTAL.inc();

        if state.window.is_full() && !state.model.is_trained() {
            state.train("window_full");
        }

        if !state.model.is_trained() {
            return Some(DetectionResult::cold_start(value));
        }

        let (score, is_anomaly) = match state.model.evaluate(value) {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(error = %e, "Trained model refused to classify.");
                return Some(DetectionResult::cold_start(value));
            }
        };

        if is_anomaly {
            state.anomalies += 1;
            metrics::ANOMALY_TOTAL.inc();
        }

        Some(DetectionResult {
            value,
            is_anomaly,
            score: Some(score),
        })
    }

    /// Refit on the current window if it is full; otherwise a no-op.
    pub fn retrain(&self) {
        self.lock().retrain("explicit");
    }

    /// Change the expected anomaly proportion and refit. On error nothing
    /// changes and no retrain happens.
    pub fn set_sensitivity(&self, ratio: f64) -> Result<(), DetectorError> {
        let mut state = self.lock();
        state.model.configure(ratio)?;
        info!(sensitivity = ratio, "Sensitivity updated.");
        state.retrain("sensitivity_changed");
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    /// Copy of the window contents, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.lock().window.snapshot()
    }

    pub fn sensitivity(&self) -> f64 {
        self.lock().model.sensitivity()
    }

    pub fn training_count(&self) -> u64 {
        self.lock().trainings
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.lock();
        EngineStats {
            phase: state.phase(),
            window_len: state.window.len(),
            capacity: state.window.capacity(),
            sensitivity: state.model.sensitivity(),
            threshold: state.model.threshold(),
            trainings: state.trainings,
            ingested: state.ingested,
            skipped: state.skipped,
            anomalies: state.anomalies,
            scorer: state.model.scorer_name().to_string(),
        }
    }
}

fn check_capacity(capacity: usize) -> Result<(), DetectorError> {
    if capacity == 0 {
        return Err(DetectorError::InvalidParameter {
            name: "window_capacity",
            value: 0.0,
            min: 1.0,
            max: f64::INFINITY,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(capacity: usize) -> DetectionEngine {
        let config = EngineConfig {
            seed: Some(42),
            ..EngineConfig::with_capacity(capacity, 0.05)
        };
        DetectionEngine::with_config(&config).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let e = engine(10);
        assert_eq!(e.phase(), Phase::Idle);
        assert_eq!(e.training_count(), 0);
        assert!(e.snapshot().is_empty());
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(DetectionEngine::new(0, 0.05).is_err());
        assert!(DetectionEngine::new(10, 0.0).is_err());
        assert!(DetectionEngine::new(10, 0.75).is_err());
    }

    #[test]
    fn test_phase_transitions() {
        let e = engine(3);
        e.ingest(Some(1.0));
        assert_eq!(e.phase(), Phase::Warming);
        e.ingest(Some(2.0));
        assert_eq!(e.phase(), Phase::Warming);
        e.ingest(Some(3.0));
        assert_eq!(e.phase(), Phase::Active);
        assert_eq!(e.training_count(), 1);
    }

    #[test]
    fn test_absent_measurement_is_invisible() {
        let e = engine(5);
        assert_eq!(e.ingest(None), None);
        assert_eq!(e.ingest(Some(f64::NAN)), None);
        assert_eq!(e.ingest(Some(f64::INFINITY)), None);

        let stats = e.stats();
        assert_eq!(stats.window_len, 0);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.phase, Phase::Idle);
    }

    #[test]
    fn test_cold_start_results() {
        let e = engine(5);
        for v in [1.0, 1e9, -1e9, 3.0] {
            let result = e.ingest(Some(v)).unwrap();
            assert!(!result.is_anomaly);
            assert_eq!(result.score, None);
            assert_eq!(result.value, v);
        }
    }

    #[test]
    fn test_retrain_noop_while_warming() {
        let e = engine(5);
        e.ingest(Some(1.0));
        e.retrain();
        assert_eq!(e.training_count(), 0);
        assert_eq!(e.phase(), Phase::Warming);
    }

    #[test]
    fn test_set_sensitivity_while_warming_does_not_train() {
        let e = engine(5);
        e.ingest(Some(1.0));
        e.set_sensitivity(0.2).unwrap();
        assert_eq!(e.sensitivity(), 0.2);
        assert_eq!(e.training_count(), 0);
    }

    #[test]
    fn test_invalid_sensitivity_keeps_config() {
        let e = engine(3);
        for v in [1.0, 2.0, 3.0] {
            e.ingest(Some(v));
        }
        let before = e.stats();

        let err = e.set_sensitivity(0.6).unwrap_err();
        assert!(matches!(
            err,
            DetectorError::InvalidParameter {
                name: "sensitivity",
                ..
            }
        ));

        let after = e.stats();
        assert_eq!(after.sensitivity, before.sensitivity);
        assert_eq!(after.trainings, before.trainings);
        assert_eq!(after.threshold, before.threshold);
    }

    #[test]
    fn test_explicit_retrain_counts() {
        let e = engine(4);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            e.ingest(Some(v));
        }
        assert_eq!(e.training_count(), 1);

        e.retrain();
        e.set_sensitivity(0.1).unwrap();
        assert_eq!(e.training_count(), 3);
        assert_eq!(e.snapshot(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_stats_serialize() {
        let e = engine(2);
        e.ingest(Some(1.0));
        let json = serde_json::to_value(e.stats()).unwrap();
        assert_eq!(json["phase"], "warming");
        assert_eq!(json["window_len"], 1);
        assert_eq!(json["scorer"], "IsolationForest");
    }
}
