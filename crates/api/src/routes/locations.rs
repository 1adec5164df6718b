//! Position ingestion endpoint handlers.

use axum::{extract::State, Json};
use domain::models::RawPosition;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::coordinator::SubmitOutcome;

const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Serialize)]
pub struct SubmitOneResponse {
    pub processed: bool,
    pub duplicate: bool,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub positions: Vec<RawPosition>,
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitBatchResponse {
    pub processed_count: usize,
    pub duplicate_count: usize,
    pub errors: Vec<BatchItemError>,
}

/// Submit one position.
///
/// POST /api/v1/locations
pub async fn submit_one(
    State(state): State<AppState>,
    Json(raw): Json<RawPosition>,
) -> Result<Json<SubmitOneResponse>, ApiError> {
    let outcome = state.coordinator.submit_one(raw).await?;
    let response = match outcome {
        SubmitOutcome::Accepted => SubmitOneResponse {
            processed: true,
            duplicate: false,
        },
        SubmitOutcome::Duplicate => SubmitOneResponse {
            processed: false,
            duplicate: true,
        },
    };
    Ok(Json(response))
}

/// Submit a batch of up to 100 positions.
///
/// POST /api/v1/locations/batch
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<SubmitBatchResponse>, ApiError> {
    if request.positions.len() > MAX_BATCH_SIZE {
        return Err(ApiError::Validation(format!(
            "batch exceeds the maximum of {MAX_BATCH_SIZE} positions"
        )));
    }

    let result = state.coordinator.submit_batch(request.positions).await;

    let errors: Vec<BatchItemError> = result
        .errors
        .iter()
        .map(|e| BatchItemError {
            index: e.index,
            reason: e.invalid.to_string(),
        })
        .collect();

    info!(
        processed = result.accepted.len(),
        duplicates = result.duplicates,
        errors = errors.len(),
        "batch submitted"
    );

    Ok(Json(SubmitBatchResponse {
        processed_count: result.accepted.len(),
        duplicate_count: result.duplicates,
        errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_one_response_serializes_accepted() {
        let response = SubmitOneResponse {
            processed: true,
            duplicate: false,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"processed\":true"));
        assert!(json.contains("\"duplicate\":false"));
    }

    #[test]
    fn submit_batch_response_serializes_errors() {
        let response = SubmitBatchResponse {
            processed_count: 1,
            duplicate_count: 0,
            errors: vec![BatchItemError {
                index: 2,
                reason: "lat: out of range".to_string(),
            }],
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"processed_count\":1"));
        assert!(json.contains("\"index\":2"));
    }
}
