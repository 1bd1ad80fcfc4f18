use crate::algo::isolation_forest::{IsolationForest, OutlierScorer};
use crate::config::EngineConfig;
use crate::error::DetectorError;

/// Lowest accepted sensitivity (expected anomaly proportion).
pub const SENSITIVITY_MIN: f64 = 0.01;
/// Highest accepted sensitivity.
pub const SENSITIVITY_MAX: f64 = 0.5;

/// Check a sensitivity against the accepted domain without touching any model.
pub fn validate_sensitivity(ratio: f64) -> Result<f64, DetectorError> {
    if (SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&ratio) {
        Ok(ratio)
    } else {
        Err(DetectorError::InvalidParameter {
            name: "sensitivity",
            value: ratio,
            min: SENSITIVITY_MIN,
            max: SENSITIVITY_MAX,
        })
    }
}

/// Outlier model: a scorer plus the sensitivity-driven decision threshold.
///
/// `trained` starts false and only ever flips to true.
pub struct OutlierModel {
    scorer: Box<dyn OutlierScorer>,
    sensitivity: f64,
    threshold: f64,
    trained: bool,
}

impl OutlierModel {
    pub fn new(sensitivity: f64, scorer: Box<dyn OutlierScorer>) -> Result<Self, DetectorError> {
        Ok(Self {
            scorer,
            sensitivity: validate_sensitivity(sensitivity)?,
            threshold: 1.0,
            trained: false,
        })
    }

    /// Isolation-forest model built from engine settings.
    pub fn from_config(config: &EngineConfig) -> Result<Self, DetectorError> {
        let forest = IsolationForest::new(
            config.trees,
            config.subsample,
            config.hull_tolerance,
            config.seed,
        );
        Self::new(config.sensitivity, Box::new(forest))
    }

    /// Set the expected anomaly proportion. Takes effect on the next `train`.
    pub fn configure(&mut self, sensitivity: f64) -> Result<(), DetectorError> {
        self.sensitivity = validate_sensitivity(sensitivity)?;
        Ok(())
    }

    /// Full refit on `snapshot`; prior internals are discarded.
    pub fn train(&mut self, snapshot: &[f64]) -> Result<(), DetectorError> {
        if snapshot.is_empty() {
            return Err(DetectorError::InvalidParameter {
                name: "snapshot length",
                value: 0.0,
                min: 1.0,
                max: f64::INFINITY,
            });
        }

        self.scorer.fit(snapshot);

        let mut scores: Vec<f64> = snapshot.iter().map(|&v| self.scorer.score(v)).collect();
        scores.sort_unstable_by(|a, b| a.total_cmp(b));

        // Training scores above this index form the expected anomalous fraction
        let n = scores.len();
        let idx = (((1.0 - self.sensitivity) * n as f64).ceil() as usize)
            .saturating_sub(1)
            .min(n - 1);
        self.threshold = scores[idx];
        self.trained = true;
        Ok(())
    }

    /// True when `value` scores above the fitted threshold.
    pub fn classify(&self, value: f64) -> Result<bool, DetectorError> {
        self.evaluate(value).map(|(_, is_anomaly)| is_anomaly)
    }

    pub fn score(&self, value: f64) -> Result<f64, DetectorError> {
        self.evaluate(value).map(|(score, _)| score)
    }

    /// Score and classification from a single pass over the forest.
    pub fn evaluate(&self, value: f64) -> Result<(f64, bool), DetectorError> {
        if !self.trained {
            return Err(DetectorError::NotTrained);
        }
        let score = self.scorer.score(value);
        Ok((score, score > self.threshold))
    }

    pub fn sensitivity(&self) -> f64 {
        self.sensitivity
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Decision threshold from the last training, if any.
    pub fn threshold(&self) -> Option<f64> {
        self.trained.then_some(self.threshold)
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }
}
