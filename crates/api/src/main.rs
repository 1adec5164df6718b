use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use domain::services::{BatchAccumulator, BatchSink, EventBus, Processor};
use persistence::job_queue::JobQueue;
use persistence::store::Store;

mod app;
mod config;
mod error;
mod middleware;
mod routes;
mod services;

use services::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize logging
    middleware::logging::init_logging(&config.logging);

    // Initialize Prometheus metrics
    middleware::metrics::init_metrics();
    info!("Prometheus metrics initialized");

    info!("Starting GPS ingestion gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(config);

    // Create Redis connection pool
    let pool = persistence::db::create_pool(&config.redis.to_redis_config())?;

    let events = Arc::new(EventBus::new());
    let store = Arc::new(Store::new(pool.clone(), config.store.to_store_config()));
    let job_queue = JobQueue::new(pool, store.clone(), events.clone(), config.queues.to_job_queue_config());
    let sink: Arc<dyn BatchSink> = job_queue.clone();
    let accumulator = BatchAccumulator::new(sink, events.clone(), config.accumulator.to_accumulator_config());
    let processor = Arc::new(Processor::new(config.processor.to_processor_config()));

    let coordinator = Arc::new(Coordinator::new(
        processor,
        accumulator,
        job_queue,
        store,
        events,
    ));
    coordinator.start();

    // Build application
    let app = app::create_app(config.clone(), coordinator.clone());

    // Start server
    let addr = config.socket_addr();
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Handle shutdown gracefully
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Shut the ingestion pipeline down: a final force-flush, then stop
    // accepting new queue work.
    coordinator.shutdown(Duration::from_secs(30)).await;

    info!("Server shutdown complete");
    Ok(())
}
