//! Administrative maintenance endpoints: force-flush, cleanup, and stats.

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::coordinator::StatsReport;

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub flushed: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub history_entries_removed: usize,
}

/// Force a flush of the current batches.
///
/// POST /api/v1/admin/flush
pub async fn force_flush(State(state): State<AppState>) -> Result<Json<FlushResponse>, ApiError> {
    state.coordinator.accumulator.force_flush().await?;
    info!("admin-triggered force flush completed");
    Ok(Json(FlushResponse { flushed: true }))
}

/// Run cleanup: trims the global history list to its configured retention.
///
/// POST /api/v1/admin/cleanup
pub async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let removed = state.coordinator.store.cleanup().await?;
    info!(removed, "admin-triggered cleanup completed");
    Ok(Json(CleanupResponse {
        history_entries_removed: removed,
    }))
}

/// Report stats: store, accumulator, and processor counters.
///
/// GET /api/v1/admin/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsReport>, ApiError> {
    let report = state.coordinator.stats().await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_response_serializes() {
        let response = FlushResponse { flushed: true };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"flushed\":true"));
    }

    #[test]
    fn cleanup_response_serializes() {
        let response = CleanupResponse {
            history_entries_removed: 42,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"history_entries_removed\":42"));
    }
}
