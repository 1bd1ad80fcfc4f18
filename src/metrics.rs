//! Process-wide Prometheus metrics.
//!
//! Registered lazily against the default registry; `init()` forces
//! registration up front so `/metrics` lists every series from the start.

use once_cell::sync::Lazy;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, TextEncoder};

fn counter(name: &str, help: &str) -> Counter {
    let c = Counter::new(name, help).expect("valid counter definition");
    prometheus::register(Box::new(c.clone())).expect("counter registered once");
    c
}

pub static INGESTED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    counter(
        "anomaly_stream_ingested_total",
        "Measurements accepted into the sliding window",
    )
});

pub static ABSENT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    counter(
        "anomaly_stream_absent_total",
        "Corrupt or missing measurements skipped",
    )
});

pub static ANOMALY_TOTAL: Lazy<Counter> =
    Lazy::new(|| counter("anomaly_stream_anomalies_total", "Measurements classified as anomalous"));

pub static TRAINING_TOTAL: Lazy<Counter> =
    Lazy::new(|| counter("anomaly_stream_trainings_total", "Full model trainings"));

pub static DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    counter(
        "anomaly_stream_dropped_results_total",
        "Detection results dropped because the consumer fell behind",
    )
});

pub static TRAINING_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "anomaly_stream_training_duration_seconds",
        "Histogram of model training latency",
    ))
    .expect("valid histogram definition");
    prometheus::register(Box::new(h.clone())).expect("histogram registered once");
    h
});

/// Touch every metric so registration happens before the first scrape.
pub fn init() {
    let _ = &*INGESTED_TOTAL;
    let _ = &*ABSENT_TOTAL;
    let _ = &*ANOMALY_TOTAL;
    let _ = &*TRAINING_TOTAL;
    let _ = &*DROPPED_TOTAL;
    let _ = &*TRAINING_LATENCY;
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
