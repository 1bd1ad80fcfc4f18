use anomaly_stream::config::EngineConfig;
use anomaly_stream::engine::{DetectionEngine, Phase};
use anomaly_stream::error::DetectorError;
use std::sync::Arc;
use std::thread;

fn seeded(capacity: usize, sensitivity: f64) -> DetectionEngine {
    let config = EngineConfig {
        seed: Some(42),
        ..EngineConfig::with_capacity(capacity, sensitivity)
    };
    DetectionEngine::with_config(&config).unwrap()
}

#[test]
fn test_constant_baseline_flags_spike_only() {
    let engine = seeded(10, 0.05);

    for _ in 0..10 {
        let result = engine.ingest(Some(5.0)).unwrap();
        assert!(!result.is_anomaly);
    }
    assert_eq!(engine.phase(), Phase::Active);
    assert_eq!(engine.training_count(), 1);

    let spike = engine.ingest(Some(500.0)).unwrap();
    assert!(spike.is_anomaly, "500.0 after constant 5.0 must be flagged");

    let near = engine.ingest(Some(5.1)).unwrap();
    assert!(!near.is_anomaly, "5.1 after constant 5.0 must pass");

    // train-once: the spike entering the window does not refit
    assert_eq!(engine.training_count(), 1);
}

#[test]
fn test_partial_window_never_flags() {
    let engine = seeded(5, 0.5);

    for v in [1.0, 1000.0, -1000.0, 1e9] {
        let result = engine.ingest(Some(v)).unwrap();
        assert!(!result.is_anomaly);
        assert_eq!(result.score, None);
    }
    assert_eq!(engine.phase(), Phase::Warming);
    assert_eq!(engine.training_count(), 0);
}

#[test]
fn test_window_keeps_most_recent_in_order() {
    let engine = seeded(4, 0.05);
    for i in 0..10 {
        engine.ingest(Some(i as f64));
    }
    assert_eq!(engine.snapshot(), vec![6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_absent_readings_leave_no_trace() {
    let engine = seeded(1000, 0.05);
    let n = 300;
    let mut results = 0;

    for i in 0..3 * n {
        let reading = if i % 3 == 2 { None } else { Some(i as f64) };
        if engine.ingest(reading).is_some() {
            results += 1;
        }
    }

    assert_eq!(results, 2 * n);
    assert_eq!(engine.snapshot().len(), 2 * n);
    let stats = engine.stats();
    assert_eq!(stats.ingested, 2 * n as u64);
    assert_eq!(stats.skipped, n as u64);
}

#[test]
fn test_non_finite_treated_as_absent() {
    let engine = seeded(3, 0.05);
    assert!(engine.ingest(Some(f64::NAN)).is_none());
    assert!(engine.ingest(Some(f64::INFINITY)).is_none());
    assert!(engine.snapshot().is_empty());
    assert_eq!(engine.phase(), Phase::Idle);
}

#[test]
fn test_automatic_training_happens_once() {
    let engine = seeded(20, 0.1);
    for i in 0..500 {
        engine.ingest(Some((i % 17) as f64));
    }
    assert_eq!(engine.training_count(), 1);
}

#[test]
fn test_sensitivity_bounds() {
    let engine = seeded(10, 0.05);
    for i in 0..10 {
        engine.ingest(Some(i as f64));
    }
    assert_eq!(engine.training_count(), 1);

    engine.set_sensitivity(0.01).unwrap();
    engine.set_sensitivity(0.5).unwrap();
    assert_eq!(engine.training_count(), 3);

    for bad in [0.0, 0.009, 0.51, 1.0, f64::NAN] {
        let err = engine.set_sensitivity(bad).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidParameter { .. }));
    }
    assert_eq!(engine.sensitivity(), 0.5);
    assert_eq!(engine.training_count(), 3);
}

#[test]
fn test_sensitivity_change_moves_decision_boundary() {
    let engine = seeded(20, 0.01);
    for i in 1..=20 {
        engine.ingest(Some(i as f64));
    }
    let strict = engine.stats().threshold.unwrap();

    // training values never score above the strict threshold
    let edges = [1.0, 20.0];
    for v in edges {
        assert!(!engine.ingest(Some(v)).unwrap().is_anomaly);
    }

    engine.set_sensitivity(0.5).unwrap();
    let loose = engine.stats().threshold.unwrap();
    assert!(loose < strict, "threshold {} should drop below {}", loose, strict);

    let flagged = edges
        .iter()
        .filter(|&&v| engine.ingest(Some(v)).unwrap().is_anomaly)
        .count();
    assert!(flagged >= 1, "an edge value should flip to anomalous at 0.5");
}

#[test]
fn test_sensitivity_before_fill_defers_training() {
    let engine = seeded(10, 0.05);
    engine.ingest(Some(1.0));
    engine.set_sensitivity(0.2).unwrap();
    assert_eq!(engine.training_count(), 0);
    assert_eq!(engine.sensitivity(), 0.2);

    for i in 0..9 {
        engine.ingest(Some(i as f64));
    }
    let stats = engine.stats();
    assert_eq!(stats.trainings, 1);
    assert_eq!(stats.sensitivity, 0.2);
}

#[test]
fn test_invalid_construction() {
    assert!(DetectionEngine::new(0, 0.05).is_err());
    assert!(DetectionEngine::new(10, 0.6).is_err());
    assert!(DetectionEngine::new(10, 0.001).is_err());
}

#[test]
fn test_concurrent_control_matches_sequential_window() {
    let engine = Arc::new(seeded(50, 0.05));
    let readings: Vec<f64> = (0..2000).map(|i| ((i * 7919) % 1000) as f64).collect();

    let ingest = {
        let engine = engine.clone();
        let readings = readings.clone();
        thread::spawn(move || {
            for v in readings {
                engine.ingest(Some(v)).unwrap();
            }
        })
    };
    let control = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..40 {
                let ratio = if i % 2 == 0 { 0.1 } else { 0.05 };
                engine.set_sensitivity(ratio).unwrap();
                engine.retrain();
            }
        })
    };

    ingest.join().unwrap();
    control.join().unwrap();

    let sequential = seeded(50, 0.05);
    for v in &readings {
        sequential.ingest(Some(*v));
    }
    assert_eq!(engine.snapshot(), sequential.snapshot());

    let stats = engine.stats();
    assert_eq!(stats.ingested, 2000);
    assert_eq!(stats.phase, Phase::Active);
    assert_eq!(stats.sensitivity, 0.05);
    assert!(stats.trainings >= 1 && stats.trainings <= 81);
}
