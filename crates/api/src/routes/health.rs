//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: StoreHealth,
    pub queues: QueueHealth,
    pub accumulator: AccumulatorHealth,
}

/// Store reachability status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub reachable: bool,
}

/// Per-queue depth and dead-letter counts.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub history_pending: usize,
    pub history_dead: usize,
    pub latest_pending: usize,
    pub latest_dead: usize,
}

/// In-memory buffer occupancy.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorHealth {
    pub history_buffer_len: usize,
    pub latest_buffer_len: usize,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check endpoint.
///
/// Returns store reachability, per-queue depth/dead-letter counts, and
/// in-memory buffer occupancy.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let report = state.coordinator.health().await;

    let response = HealthResponse {
        status: if report.is_healthy() { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: StoreHealth {
            reachable: report.store_reachable,
        },
        queues: QueueHealth {
            history_pending: report.history_queue_pending,
            history_dead: report.history_queue_dead,
            latest_pending: report.latest_queue_pending,
            latest_dead: report.latest_queue_dead,
        },
        accumulator: AccumulatorHealth {
            history_buffer_len: report.history_buffer_len,
            latest_buffer_len: report.latest_buffer_len,
        },
    };

    if report.is_healthy() {
        Ok(Json(response))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the service can accept traffic (store reachable).
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let report = state.coordinator.health().await;

    if report.is_healthy() {
        Ok(Json(StatusResponse {
            status: "ready".to_string(),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
