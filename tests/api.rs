use anomaly_stream::api::{self, AppState};
use anomaly_stream::config::EngineConfig;
use anomaly_stream::controller::SensitivityController;
use anomaly_stream::engine::DetectionEngine;
use anomaly_stream::config::StreamConfig;
use anomaly_stream::history::{HistoryRecorder, shared_history};
use anomaly_stream::stream::{BoxedSource, StreamControl};
use crossbeam_channel::bounded;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn spawn_api(engine: Arc<DetectionEngine>) -> String {
    spawn_api_with_source(engine, Box::new(std::iter::empty())).await
}

async fn spawn_api_with_source(engine: Arc<DetectionEngine>, source: BoxedSource) -> String {
    let history = shared_history(16);
    let (tx, rx) = bounded(1024);
    let _recorder = HistoryRecorder::spawn(rx, history.clone());
    let config = StreamConfig {
        interval_ms: 2,
        ..StreamConfig::default()
    };
    let stream = StreamControl::new(
        engine.clone(),
        source,
        config,
        tx,
        CancellationToken::new(),
    );

    let state = AppState {
        controller: SensitivityController::new(engine),
        history,
        stream: Arc::new(stream),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api::router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn filled_engine() -> Arc<DetectionEngine> {
    let config = EngineConfig {
        seed: Some(9),
        ..EngineConfig::with_capacity(20, 0.05)
    };
    let engine = DetectionEngine::with_config(&config).unwrap();
    for i in 0..20 {
        engine.ingest(Some(i as f64));
    }
    Arc::new(engine)
}

#[tokio::test]
async fn test_health_and_status() {
    let base = spawn_api(filled_engine()).await;
    let client = Client::new();

    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["success"], true);
    assert_eq!(status["data"]["phase"], "active");
    assert_eq!(status["data"]["window_len"], 20);
    assert_eq!(status["data"]["trainings"], 1);
}

#[tokio::test]
async fn test_sensitivity_update_and_rejection() {
    let engine = filled_engine();
    let base = spawn_api(engine.clone()).await;
    let client = Client::new();

    let ok = client
        .post(format!("{}/sensitivity", base))
        .json(&json!({ "ratio": 0.2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["data"]["sensitivity"], 0.2);
    assert_eq!(body["data"]["trainings"], 2);

    let rejected = client
        .post(format!("{}/sensitivity", base))
        .json(&json!({ "ratio": 0.9 }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = rejected.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("sensitivity"));

    assert_eq!(engine.sensitivity(), 0.2);
    assert_eq!(engine.training_count(), 2);
}

#[tokio::test]
async fn test_retrain_window_and_metrics() {
    let engine = filled_engine();
    let base = spawn_api(engine.clone()).await;
    let client = Client::new();

    let retrain = client.post(format!("{}/retrain", base)).send().await.unwrap();
    assert_eq!(retrain.status(), StatusCode::OK);
    assert_eq!(engine.training_count(), 2);

    let window: Value = client
        .get(format!("{}/window", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(window["data"].as_array().unwrap().len(), 20);

    let history: Value = client
        .get(format!("{}/history?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["data"]["total_seen"], 0);

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("anomaly_stream_trainings_total"));
}

async fn ingested(client: &Client, base: &str) -> u64 {
    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    status["data"]["ingested"].as_u64().unwrap()
}

#[tokio::test]
async fn test_stream_stop_and_resume() {
    let engine = filled_engine();
    let base = spawn_api_with_source(engine.clone(), Box::new(std::iter::repeat(Some(7.0)))).await;
    let client = Client::new();

    let idle: Value = client
        .get(format!("{}/stream", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(idle["data"]["running"], false);
    assert_eq!(ingested(&client, &base).await, 20);

    let started = client.post(format!("{}/stream/start", base)).send().await.unwrap();
    assert_eq!(started.status(), StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped: Value = client
        .post(format!("{}/stream/stop", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["data"]["running"], false);
    assert_eq!(stopped["data"]["last"]["exit"], "cancelled");

    let paused_at = ingested(&client, &base).await;
    assert!(paused_at > 20);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ingested(&client, &base).await, paused_at);

    let resumed: Value = client
        .post(format!("{}/stream/start", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resumed["data"]["running"], true);
    assert_eq!(resumed["data"]["runs"], 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ingested(&client, &base).await > paused_at);

    client.post(format!("{}/stream/stop", base)).send().await.unwrap();
    // the engine kept its fit across both runs
    assert_eq!(engine.training_count(), 1);
}
