//! HTTP control surface
//!
//! Headless replacement for a dashboard: read engine status and recent
//! results, change sensitivity, force a retrain, stop and resume ingestion,
//! scrape metrics. Handlers own no detection state.

use crate::controller::SensitivityController;
use crate::engine::EngineStats;
use crate::history::{HistoryEntry, SharedHistory};
use crate::metrics;
use crate::stream::{StreamControl, StreamStatus};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use tracing::info;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: SensitivityController,
    pub history: SharedHistory,
    pub stream: Arc<StreamControl>,
}

/// Generic API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }
    }
}

/// Request to change the detector sensitivity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensitivityRequest {
    pub ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub total_seen: u64,
    pub anomalies_seen: u64,
    pub entries: Vec<HistoryEntry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/window", get(window))
        .route("/history", get(history))
        .route("/sensitivity", post(set_sensitivity))
        .route("/retrain", post(retrain))
        .route("/stream", get(stream_status))
        .route("/stream/start", post(stream_start))
        .route("/stream/stop", post(stream_stop))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Json<ApiResponse<EngineStats>> {
    Json(ApiResponse::success(state.controller.engine().stats()))
}

async fn window(State(state): State<AppState>) -> Json<ApiResponse<Vec<f64>>> {
    Json(ApiResponse::success(state.controller.engine().snapshot()))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<ApiResponse<HistoryResponse>> {
    let guard = state.history.lock().unwrap_or_else(PoisonError::into_inner);
    Json(ApiResponse::success(HistoryResponse {
        total_seen: guard.total_seen(),
        anomalies_seen: guard.anomalies_seen(),
        entries: guard.recent(query.limit),
    }))
}

async fn set_sensitivity(
    State(state): State<AppState>,
    Json(request): Json<SensitivityRequest>,
) -> (StatusCode, Json<ApiResponse<EngineStats>>) {
    let controller = state.controller.clone();
    // training is CPU-bound and holds the engine lock
    let outcome = tokio::task::spawn_blocking(move || controller.apply(request.ratio)).await;

    match outcome {
        Ok(Ok(stats)) => (StatusCode::OK, Json(ApiResponse::success(stats))),
        Ok(Err(e)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(&e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(&format!("sensitivity update aborted: {}", e))),
        ),
    }
}

async fn retrain(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<EngineStats>>) {
    let controller = state.controller.clone();
    match tokio::task::spawn_blocking(move || controller.retrain()).await {
        Ok(stats) => {
            info!(trainings = stats.trainings, "Retrain requested over HTTP.");
            (StatusCode::OK, Json(ApiResponse::success(stats)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(&format!("retrain aborted: {}", e))),
        ),
    }
}

async fn stream_status(State(state): State<AppState>) -> Json<ApiResponse<StreamStatus>> {
    Json(ApiResponse::success(state.stream.status()))
}

async fn stream_start(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<StreamStatus>>) {
    match state.stream.start() {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::success(status))),
        Err(e) => (StatusCode::CONFLICT, Json(ApiResponse::error(&e.to_string()))),
    }
}

async fn stream_stop(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<StreamStatus>>) {
    let stream = state.stream.clone();
    // joins the ingestion thread
    match tokio::task::spawn_blocking(move || stream.stop()).await {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::success(status))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(&format!("stop aborted: {}", e))),
        ),
    }
}

async fn metrics_handler() -> String {
    metrics::render()
}

/// API routes definition for documentation/integration
pub fn api_routes() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("GET", "/health", "Liveness probe"),
        ("GET", "/status", "Engine phase, window fill, sensitivity, counters"),
        ("GET", "/window", "Current sliding window contents"),
        ("GET", "/history", "Trailing detection results (?limit=N)"),
        ("POST", "/sensitivity", "Set sensitivity {\"ratio\": 0.01..0.5} and retrain"),
        ("POST", "/retrain", "Retrain on the current window"),
        ("GET", "/stream", "Ingestion loop state and last run report"),
        ("POST", "/stream/start", "Resume ingestion from where it stopped"),
        ("POST", "/stream/stop", "Pause ingestion; window and model are kept"),
        ("GET", "/metrics", "Prometheus metrics"),
    ]
}
