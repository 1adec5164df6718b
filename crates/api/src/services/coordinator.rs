//! Wires the Processor, BatchAccumulator, JobQueue and Store together and
//! owns their startup/shutdown sequence, mirroring the lifecycle the
//! teacher's job scheduler drove for the database-backed background jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domain::models::RawPosition;
use domain::services::{
    BatchAccumulator, BatchProcessResult, EventBus, Invalid, Processor,
};
use persistence::job_queue::{JobQueue, JobQueueStats};
use persistence::store::{Store, StoreStats};
use serde::Serialize;
use tracing::info;

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_reachable: bool,
    pub history_buffer_len: usize,
    pub latest_buffer_len: usize,
    pub history_queue_pending: usize,
    pub history_queue_dead: usize,
    pub latest_queue_pending: usize,
    pub latest_queue_dead: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store_reachable
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub store: StoreStatsView,
    pub queues: JobQueueStatsView,
    pub accumulator_flush_count: u64,
    pub accumulator_last_flush_ok: Option<bool>,
    pub duplicate_cache_size: usize,
    pub duplicate_cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatsView {
    pub history_len: usize,
    pub device_count: usize,
}

impl From<StoreStats> for StoreStatsView {
    fn from(stats: StoreStats) -> Self {
        StoreStatsView {
            history_len: stats.history_len,
            device_count: stats.device_count,
        }
    }
}

/// Per-queue pending/completed/dead-letter occupancy, as described by
/// `JobQueue::stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct JobQueueStatsView {
    pub history_pending: usize,
    pub history_completed: usize,
    pub history_dead: usize,
    pub latest_pending: usize,
    pub latest_completed: usize,
    pub latest_dead: usize,
}

impl From<JobQueueStats> for JobQueueStatsView {
    fn from(stats: JobQueueStats) -> Self {
        JobQueueStatsView {
            history_pending: stats.history_pending,
            history_completed: stats.history_completed,
            history_dead: stats.history_dead,
            latest_pending: stats.latest_pending,
            latest_completed: stats.latest_completed,
            latest_dead: stats.latest_dead,
        }
    }
}

/// Owns the ingestion pipeline's process lifecycle: startup, graceful
/// shutdown, and health/stats aggregation for the HTTP adapter.
pub struct Coordinator {
    pub processor: Arc<Processor>,
    pub accumulator: Arc<BatchAccumulator>,
    pub job_queue: Arc<JobQueue>,
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
}

impl Coordinator {
    pub fn new(
        processor: Arc<Processor>,
        accumulator: Arc<BatchAccumulator>,
        job_queue: Arc<JobQueue>,
        store: Arc<Store>,
        events: Arc<EventBus>,
    ) -> Self {
        Coordinator {
            processor,
            accumulator,
            job_queue,
            store,
            events,
        }
    }

    /// Starts the JobQueue worker pools and the accumulator's flush timer.
    pub fn start(&self) {
        self.job_queue.start();
        self.accumulator.start();
        info!("ingestion pipeline started");
    }

    /// Submits one raw position through the Processor and, if accepted,
    /// into the BatchAccumulator.
    pub async fn submit_one(&self, raw: RawPosition) -> Result<SubmitOutcome, Invalid> {
        let now = Utc::now();
        match self.processor.process(raw, now)? {
            domain::services::ProcessOutcome::Accepted(position) => {
                self.accumulator.submit(position).await;
                Ok(SubmitOutcome::Accepted)
            }
            domain::services::ProcessOutcome::Duplicate => Ok(SubmitOutcome::Duplicate),
        }
    }

    /// Submits a batch of raw positions; every accepted position is
    /// handed to the BatchAccumulator immediately so a caller never has
    /// to wait on a downstream flush.
    pub async fn submit_batch(&self, raws: Vec<RawPosition>) -> BatchProcessResult {
        let now = Utc::now();
        let result = self.processor.process_batch(raws, now);
        for position in &result.accepted {
            self.accumulator.submit(position.clone()).await;
        }
        result
    }

    pub async fn health(&self) -> HealthReport {
        let store_reachable = self.store.stats().await.is_ok();
        let accumulator_stats = self.accumulator.stats();
        let queue_stats = self.job_queue.stats().await.unwrap_or_default();

        HealthReport {
            store_reachable,
            history_buffer_len: accumulator_stats.history_len,
            latest_buffer_len: accumulator_stats.latest_len,
            history_queue_pending: queue_stats.history_pending,
            history_queue_dead: queue_stats.history_dead,
            latest_queue_pending: queue_stats.latest_pending,
            latest_queue_dead: queue_stats.latest_dead,
        }
    }

    pub async fn stats(&self) -> Result<StatsReport, ApiError> {
        let store_stats = self.store.stats().await?;
        let queue_stats = self.job_queue.stats().await?;
        let accumulator_stats = self.accumulator.stats();
        let processor_stats = self.processor.stats();

        Ok(StatsReport {
            store: store_stats.into(),
            queues: queue_stats.into(),
            accumulator_flush_count: accumulator_stats.flush_count,
            accumulator_last_flush_ok: accumulator_stats.last_flush_ok,
            duplicate_cache_size: processor_stats.duplicate_cache_size,
            duplicate_cache_capacity: processor_stats.duplicate_cache_capacity,
        })
    }

    /// Shuts the pipeline down leaves-first: accumulator (with a final
    /// force-flush), then the JobQueue worker pools. Store holds no
    /// process-local resources beyond its connection pool, so it needs no
    /// explicit close.
    pub async fn shutdown(&self, deadline: Duration) {
        info!("shutting down ingestion pipeline");
        let flushed = tokio::time::timeout(deadline, self.accumulator.force_flush()).await;
        match flushed {
            Ok(Ok(())) => info!("final force-flush completed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "final force-flush failed"),
            Err(_) => tracing::warn!("final force-flush did not complete before the shutdown deadline"),
        }
        self.accumulator.shutdown().await;
        self.job_queue.shutdown().await;
        info!("ingestion pipeline shut down");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    Duplicate,
}
