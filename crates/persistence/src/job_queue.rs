//! Durable work queues sitting between the accumulator and the store.
//!
//! Two independent, named queues exist: `history` and `latest`. Each has
//! its own pending/processing/dead-letter lists in Redis and its own
//! worker pool, so a backlog or outage on one queue never blocks the
//! other.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use domain::models::{HistoryBatch, LatestSet};
use domain::services::{BatchSink, EnqueueError, Event, EventBus};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::metrics::{record_queue_depth, OperationTimer};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<QueueError> for EnqueueError {
    fn from(e: QueueError) -> Self {
        EnqueueError(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_backoff: StdDuration,
    pub poll_timeout: StdDuration,
    /// How many recently succeeded jobs to retain for inspection.
    pub keep_completed: usize,
    /// How many dead-lettered jobs to retain for inspection.
    pub keep_failed: usize,
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub history: QueueConfig,
    pub latest: QueueConfig,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        JobQueueConfig {
            history: QueueConfig {
                concurrency: 5,
                max_retries: 5,
                base_backoff: StdDuration::from_millis(200),
                poll_timeout: StdDuration::from_secs(2),
                keep_completed: 100,
                keep_failed: 50,
            },
            latest: QueueConfig {
                concurrency: 3,
                max_retries: 5,
                base_backoff: StdDuration::from_millis(200),
                poll_timeout: StdDuration::from_secs(2),
                keep_completed: 50,
                keep_failed: 25,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct JobEnvelope<T> {
    job_id: String,
    attempt: u32,
    payload: T,
}

const HISTORY_PENDING: &str = "gps:queue:history:pending";
const HISTORY_PROCESSING: &str = "gps:queue:history:processing";
const HISTORY_COMPLETED: &str = "gps:queue:history:completed";
const HISTORY_DEAD: &str = "gps:queue:history:dead";
const LATEST_PENDING: &str = "gps:queue:latest:pending";
const LATEST_PROCESSING: &str = "gps:queue:latest:processing";
const LATEST_COMPLETED: &str = "gps:queue:latest:completed";
const LATEST_DEAD: &str = "gps:queue:latest:dead";

#[derive(Debug, Clone, Default)]
pub struct JobQueueStats {
    pub history_pending: usize,
    pub history_completed: usize,
    pub history_dead: usize,
    pub latest_pending: usize,
    pub latest_completed: usize,
    pub latest_dead: usize,
}

/// Pushes `encoded` onto `ring_key` and trims it to `cap` most-recent
/// entries, so completed/dead-letter lists stay bounded ring buffers
/// rather than growing without limit.
async fn push_to_ring(
    conn: &mut deadpool_redis::Connection,
    ring_key: &str,
    encoded: &str,
    cap: usize,
) -> Result<(), QueueError> {
    conn.lpush::<_, _, ()>(ring_key, encoded).await?;
    if cap == 0 {
        conn.del::<_, ()>(ring_key).await?;
    } else {
        conn.ltrim::<_, ()>(ring_key, 0, cap as isize - 1).await?;
    }
    Ok(())
}

/// Bridges the in-memory accumulator and durable Redis-backed queues,
/// then drains those queues into the shared store with bounded-concurrency
/// worker pools.
pub struct JobQueue {
    pool: Pool,
    store: Arc<Store>,
    events: Arc<EventBus>,
    config: JobQueueConfig,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(pool: Pool, store: Arc<Store>, events: Arc<EventBus>, config: JobQueueConfig) -> Arc<Self> {
        Arc::new(JobQueue {
            pool,
            store,
            events,
            config,
            workers: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Spawns the worker pools for both queues. Idempotent in the sense
    /// that calling it again just adds more workers; callers should only
    /// call it once.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for _ in 0..self.config.history.concurrency {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.run_history_worker().await }));
        }
        for _ in 0..self.config.latest.concurrency {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.run_latest_worker().await }));
        }
    }

    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    pub async fn stats(&self) -> Result<JobQueueStats, QueueError> {
        let mut conn = self.pool.get().await?;
        Ok(JobQueueStats {
            history_pending: conn.llen(HISTORY_PENDING).await?,
            history_completed: conn.llen(HISTORY_COMPLETED).await?,
            history_dead: conn.llen(HISTORY_DEAD).await?,
            latest_pending: conn.llen(LATEST_PENDING).await?,
            latest_completed: conn.llen(LATEST_COMPLETED).await?,
            latest_dead: conn.llen(LATEST_DEAD).await?,
        })
    }

    async fn run_history_worker(self: Arc<Self>) {
        loop {
            if let Err(e) = self.process_one_history().await {
                error!(error = %e, "history worker encountered an error");
            }
        }
    }

    async fn run_latest_worker(self: Arc<Self>) {
        loop {
            if let Err(e) = self.process_one_latest().await {
                error!(error = %e, "latest worker encountered an error");
            }
        }
    }

    async fn process_one_history(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn
            .brpoplpush(
                HISTORY_PENDING,
                HISTORY_PROCESSING,
                self.config.history.poll_timeout.as_secs_f64(),
            )
            .await?;
        record_queue_depth("history", conn.llen(HISTORY_PENDING).await.unwrap_or(0));

        let Some(raw) = raw else {
            return Ok(());
        };

        let envelope: JobEnvelope<HistoryBatch> = serde_json::from_str(&raw)?;
        let timer = OperationTimer::new("history_job");

        match self.store.write_history_batch(&envelope.payload).await {
            Ok(()) => {
                conn.lrem::<_, _, ()>(HISTORY_PROCESSING, 1, &raw).await?;
                push_to_ring(&mut conn, HISTORY_COMPLETED, &raw, self.config.history.keep_completed).await?;
                timer.record();
                self.events.publish(Event::QueueJobSucceeded {
                    queue: "history".to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.retry_or_dead_letter(
                    &mut conn,
                    envelope,
                    &raw,
                    e,
                    "history",
                    HISTORY_PROCESSING,
                    HISTORY_PENDING,
                    HISTORY_DEAD,
                    &self.config.history,
                )
                .await
            }
        }
    }

    async fn process_one_latest(&self) -> Result<(), QueueError> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn
            .brpoplpush(
                LATEST_PENDING,
                LATEST_PROCESSING,
                self.config.latest.poll_timeout.as_secs_f64(),
            )
            .await?;
        record_queue_depth("latest", conn.llen(LATEST_PENDING).await.unwrap_or(0));

        let Some(raw) = raw else {
            return Ok(());
        };

        let envelope: JobEnvelope<LatestSet> = serde_json::from_str(&raw)?;
        let timer = OperationTimer::new("latest_job");

        match self.store.write_latest(&envelope.payload).await {
            Ok(()) => {
                conn.lrem::<_, _, ()>(LATEST_PROCESSING, 1, &raw).await?;
                push_to_ring(&mut conn, LATEST_COMPLETED, &raw, self.config.latest.keep_completed).await?;
                timer.record();
                self.events.publish(Event::QueueJobSucceeded {
                    queue: "latest".to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.retry_or_dead_letter(
                    &mut conn,
                    envelope,
                    &raw,
                    e,
                    "latest",
                    LATEST_PROCESSING,
                    LATEST_PENDING,
                    LATEST_DEAD,
                    &self.config.latest,
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn retry_or_dead_letter<T>(
        &self,
        conn: &mut deadpool_redis::Connection,
        mut envelope: JobEnvelope<T>,
        raw: &str,
        error: StoreError,
        queue_name: &str,
        processing_key: &str,
        pending_key: &str,
        dead_key: &str,
        config: &QueueConfig,
    ) -> Result<(), QueueError>
    where
        T: Serialize + DeserializeOwned,
    {
        conn.lrem::<_, _, ()>(processing_key, 1, raw).await?;
        envelope.attempt += 1;

        if envelope.attempt > config.max_retries {
            warn!(
                job_id = %envelope.job_id,
                queue = queue_name,
                attempts = envelope.attempt,
                error = %error,
                "job exceeded max retries, moving to dead letter"
            );
            let encoded = serde_json::to_string(&envelope)?;
            push_to_ring(conn, dead_key, &encoded, config.keep_failed).await?;
            self.events.publish(Event::QueueJobFailed {
                queue: queue_name.to_string(),
                reason: error.to_string(),
            });
            return Ok(());
        }

        let backoff = backoff_for_attempt(config.base_backoff, envelope.attempt);
        warn!(
            job_id = %envelope.job_id,
            queue = queue_name,
            attempt = envelope.attempt,
            backoff_ms = backoff.as_millis(),
            error = %error,
            "job failed, retrying after backoff"
        );
        tokio::time::sleep(backoff).await;
        let encoded = serde_json::to_string(&envelope)?;
        conn.lpush::<_, _, ()>(pending_key, encoded).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchSink for JobQueue {
    async fn enqueue_history(&self, batch: HistoryBatch) -> Result<(), EnqueueError> {
        enqueue(
            &self.pool,
            HISTORY_PENDING,
            JobEnvelope {
                job_id: batch.batch_id.clone(),
                attempt: 0,
                payload: batch,
            },
        )
        .await
        .map_err(Into::into)
    }

    async fn enqueue_latest(&self, latest: LatestSet) -> Result<(), EnqueueError> {
        enqueue(
            &self.pool,
            LATEST_PENDING,
            JobEnvelope {
                job_id: latest.batch_id.clone(),
                attempt: 0,
                payload: latest,
            },
        )
        .await
        .map_err(Into::into)
    }
}

async fn enqueue<T: Serialize>(
    pool: &Pool,
    key: &str,
    envelope: JobEnvelope<T>,
) -> Result<(), QueueError> {
    let mut conn = pool.get().await?;
    let encoded = serde_json::to_string(&envelope)?;
    conn.lpush::<_, _, ()>(key, encoded).await?;
    info!(job_id = %envelope.job_id, queue = key, "enqueued job");
    Ok(())
}

/// Exponential backoff capped at 2^10 multiples of `base`, so a stuck
/// queue never sleeps for an unbounded amount of time between retries.
fn backoff_for_attempt(base: StdDuration, attempt: u32) -> StdDuration {
    base * 2u32.pow(attempt.min(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_each_attempt() {
        let base = StdDuration::from_millis(200);
        assert_eq!(backoff_for_attempt(base, 0), base);
        assert_eq!(backoff_for_attempt(base, 1), base * 2);
        assert_eq!(backoff_for_attempt(base, 2), base * 4);
    }

    #[test]
    fn backoff_is_capped_for_large_attempt_counts() {
        let base = StdDuration::from_millis(200);
        assert_eq!(backoff_for_attempt(base, 100), backoff_for_attempt(base, 10));
    }

    #[test]
    fn default_retention_matches_history_and_latest_caps() {
        let config = JobQueueConfig::default();
        assert_eq!(config.history.keep_completed, 100);
        assert_eq!(config.history.keep_failed, 50);
        assert_eq!(config.latest.keep_completed, 50);
        assert_eq!(config.latest.keep_failed, 25);
    }

    #[test]
    fn job_envelope_round_trips_through_json() {
        let envelope = JobEnvelope {
            job_id: "hist_1".to_string(),
            attempt: 2,
            payload: 42u32,
        };
        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded: JobEnvelope<u32> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.job_id, "hist_1");
        assert_eq!(decoded.attempt, 2);
        assert_eq!(decoded.payload, 42);
    }
}
