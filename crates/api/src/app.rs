use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{admin, devices, health, locations};
use crate::services::Coordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<Config>,
}

pub fn create_app(config: Arc<Config>, coordinator: Arc<Coordinator>) -> Router {
    let state = AppState { coordinator, config };

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/live", get(health::live))
        .route("/api/health/ready", get(health::ready))
        .route("/metrics", get(metrics_handler));

    let ingestion_routes = Router::new()
        .route("/api/v1/locations", post(locations::submit_one))
        .route("/api/v1/locations/batch", post(locations::submit_batch));

    let device_routes = Router::new()
        .route("/api/v1/devices/:device_id/latest", get(devices::get_latest))
        .route("/api/v1/devices/latest", get(devices::get_latest_many));

    let admin_routes = Router::new()
        .route("/api/v1/admin/flush", post(admin::force_flush))
        .route("/api/v1/admin/cleanup", post(admin::cleanup))
        .route("/api/v1/admin/stats", get(admin::stats));

    let app = Router::new()
        .merge(public_routes)
        .merge(ingestion_routes)
        .merge(device_routes)
        .merge(admin_routes);

    let request_timeout_secs = state.config.server.request_timeout_secs;

    app.layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_secs)))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .with_state(state)
}
