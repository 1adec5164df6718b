//! Device latest-position endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::models::Position;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct LatestResponse {
    pub position: Option<Position>,
}

#[derive(Debug, Deserialize)]
pub struct LatestManyQuery {
    /// Comma-separated device ids.
    pub device_ids: String,
}

#[derive(Debug, Serialize)]
pub struct LatestManyResponse {
    pub positions: std::collections::HashMap<String, Position>,
}

/// Fetch latest for one device.
///
/// GET /api/v1/devices/:device_id/latest
pub async fn get_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<LatestResponse>, ApiError> {
    let position = state.coordinator.store.get_latest(&device_id).await?;
    Ok(Json(LatestResponse { position }))
}

/// Fetch latest for a list of devices.
///
/// GET /api/v1/devices/latest?device_ids=a,b,c
pub async fn get_latest_many(
    State(state): State<AppState>,
    Query(query): Query<LatestManyQuery>,
) -> Result<Json<LatestManyResponse>, ApiError> {
    let device_ids: Vec<String> = query
        .device_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let positions = state.coordinator.store.get_latest_many(&device_ids).await?;
    Ok(Json(LatestManyResponse { positions }))
}
