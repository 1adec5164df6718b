//! HTTP-level integration tests for the ingestion adapter.
//!
//! These exercise request validation, duplicate detection, and structural
//! response shapes entirely in-process. They never call `Coordinator::start`,
//! so the accumulator's flush timer never fires and no Redis connection is
//! ever dialed — every exercised path resolves before a durable write would
//! be attempted.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use deadpool_redis::{Config as PoolConfig, Runtime};
use domain::services::{BatchAccumulator, BatchSink, EventBus, Processor, ProcessorConfig};
use gps_gateway_api::app::create_app;
use gps_gateway_api::config::{
    AccumulatorSettings, Config, LoggingConfig, ProcessorSettings, QueuesSettings, RedisConfig,
    ServerConfig, StoreSettings,
};
use gps_gateway_api::services::Coordinator;
use persistence::job_queue::JobQueue;
use persistence::store::Store;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            request_timeout_secs: 30,
            max_body_size: 1_048_576,
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6399".into(),
            pool_max_size: 4,
            connect_timeout_secs: 1,
        },
        logging: LoggingConfig {
            level: "info".into(),
            format: "json".into(),
        },
        processor: ProcessorSettings::default(),
        accumulator: AccumulatorSettings::default(),
        queues: QueuesSettings::default(),
        store: StoreSettings::default(),
    })
}

fn test_app() -> axum::Router {
    let config = test_config();
    // Pool creation is lazy: no connection is dialed until a command runs.
    let pool = PoolConfig::from_url(&config.redis.url)
        .create_pool(Some(Runtime::Tokio1))
        .expect("pool config is valid even without a reachable server");

    let events = Arc::new(EventBus::new());
    let store = Arc::new(Store::new(pool.clone(), config.store.to_store_config()));
    let job_queue = JobQueue::new(
        pool,
        store.clone(),
        events.clone(),
        config.queues.to_job_queue_config(),
    );
    let sink: Arc<dyn BatchSink> = job_queue.clone();
    let accumulator = BatchAccumulator::new(sink, events.clone(), config.accumulator.to_accumulator_config());
    let processor = Arc::new(Processor::new(ProcessorConfig::default()));
    let coordinator = Arc::new(Coordinator::new(
        processor, accumulator, job_queue, store, events,
    ));

    create_app(config, coordinator)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn liveness_probe_always_reports_alive() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn submit_one_accepts_a_well_formed_position() {
    let app = test_app();
    let payload = json!({
        "device_id": "d1",
        "lat": 1.0,
        "lng": 2.0,
        "timestamp": 1_700_000_000_000i64,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["processed"], true);
    assert_eq!(body["duplicate"], false);
}

#[tokio::test]
async fn submit_one_rejects_an_out_of_range_latitude() {
    let app = test_app();
    let payload = json!({
        "device_id": "d1",
        "lat": 999.0,
        "lng": 2.0,
        "timestamp": 1_700_000_000_000i64,
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_one_reports_a_duplicate_on_the_second_identical_fix() {
    let app = test_app();
    let payload = json!({
        "device_id": "d1",
        "lat": 1.0,
        "lng": 2.0,
        "timestamp": 1_700_000_000_000i64,
    });

    let first = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(first).await["duplicate"], false);

    let second = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(second).await["duplicate"], true);
}

#[tokio::test]
async fn submit_batch_rejects_more_than_one_hundred_positions() {
    let app = test_app();
    let positions: Vec<Value> = (0..101)
        .map(|i| {
            json!({
                "device_id": format!("d{i}"),
                "lat": 1.0,
                "lng": 2.0,
                "timestamp": 1_700_000_000_000i64,
            })
        })
        .collect();
    let payload = json!({ "positions": positions });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations/batch")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_batch_partitions_accepted_and_invalid_entries() {
    let app = test_app();
    let payload = json!({
        "positions": [
            {"device_id": "d1", "lat": 1.0, "lng": 2.0, "timestamp": 1_700_000_000_000i64},
            {"device_id": "d2", "lat": 999.0, "lng": 2.0, "timestamp": 1_700_000_000_000i64},
        ]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/locations/batch")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["processed_count"], 1);
    assert_eq!(body["duplicate_count"], 0);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    assert_eq!(body["errors"][0]["index"], 1);
}

#[tokio::test]
async fn get_latest_many_accepts_an_empty_id_list() {
    let app = test_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/devices/latest?device_ids=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["positions"].as_object().unwrap().is_empty());
}
