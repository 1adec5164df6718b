//! Buffers accepted positions in memory and periodically flushes them to
//! durable storage via a [`BatchSink`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use shared::ids::generate_batch_id;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::models::{HistoryBatch, LatestSet, Position};
use crate::services::event_bus::{Event, EventBus};

/// An error enqueuing a flushed batch onto durable storage.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EnqueueError(pub String);

/// The seam between the in-memory accumulator and durable storage. The
/// persistence layer's job queue implements this so the domain crate
/// never depends on it directly.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn enqueue_history(&self, batch: HistoryBatch) -> Result<(), EnqueueError>;
    async fn enqueue_latest(&self, latest: LatestSet) -> Result<(), EnqueueError>;
}

#[derive(Debug, Clone)]
pub enum FlushError {
    History(EnqueueError),
    Latest(EnqueueError),
    Both(EnqueueError, EnqueueError),
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushError::History(e) => write!(f, "history flush failed: {e}"),
            FlushError::Latest(e) => write!(f, "latest flush failed: {e}"),
            FlushError::Both(h, l) => write!(f, "both flushes failed: history: {h}, latest: {l}"),
        }
    }
}

impl std::error::Error for FlushError {}

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    pub flush_interval: StdDuration,
    pub max_history_batch_size: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        AccumulatorConfig {
            flush_interval: StdDuration::from_secs(30),
            max_history_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccumulatorStats {
    pub history_len: usize,
    pub latest_len: usize,
    pub last_flush_ok: Option<bool>,
    pub flush_count: u64,
}

/// Accumulates accepted positions into a history buffer (append-only) and
/// a latest map (one entry per device), and flushes both to a
/// [`BatchSink`] on a timer, on a size threshold, or on demand.
///
/// Both buffers are guarded by their own `std::sync::Mutex`; every
/// critical section under those locks is a plain in-memory operation, so
/// no lock is ever held across an `.await`.
pub struct BatchAccumulator {
    history: StdMutex<Vec<Position>>,
    latest: StdMutex<HashMap<String, Position>>,
    sink: Arc<dyn BatchSink>,
    events: Arc<EventBus>,
    config: AccumulatorConfig,
    flush_lock: AsyncMutex<()>,
    last_flush_ok: StdMutex<Option<bool>>,
    flush_count: AtomicU64,
    timer_handle: StdMutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl BatchAccumulator {
    pub fn new(sink: Arc<dyn BatchSink>, events: Arc<EventBus>, config: AccumulatorConfig) -> Arc<Self> {
        Arc::new(BatchAccumulator {
            history: StdMutex::new(Vec::new()),
            latest: StdMutex::new(HashMap::new()),
            sink,
            events,
            config,
            flush_lock: AsyncMutex::new(()),
            last_flush_ok: StdMutex::new(None),
            flush_count: AtomicU64::new(0),
            timer_handle: StdMutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawns the periodic flush timer. Idempotent: calling twice leaks
    /// the first timer task, so callers should only call this once.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.flush_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if this.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                this.flush_both_best_effort().await;
            }
        });
        *self.timer_handle.lock().unwrap() = Some(handle);
    }

    /// Buffers `position`, updating the latest map only if no newer fix
    /// is already recorded for that device. If the history buffer has
    /// reached its size threshold, schedules a history-only flush without
    /// blocking the caller.
    pub async fn submit(self: &Arc<Self>, position: Position) {
        let should_flush_on_size = {
            let mut history = self.history.lock().unwrap();
            history.push(position.clone());
            history.len() >= self.config.max_history_batch_size
        };

        {
            let mut latest = self.latest.lock().unwrap();
            match latest.get(&position.device_id) {
                Some(existing) if existing.timestamp >= position.timestamp => {}
                _ => {
                    latest.insert(position.device_id.clone(), position.clone());
                }
            }
        }

        self.events.publish(Event::PositionAccumulated {
            device_id: position.device_id.clone(),
        });

        if should_flush_on_size {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.flush_history_only().await;
            });
        }
    }

    /// Flushes both buffers and waits for the outcome, regardless of
    /// whether a background flush is already in progress.
    pub async fn force_flush(&self) -> Result<(), FlushError> {
        let _guard = self.flush_lock.lock().await;
        let history_result = self.do_flush_history().await;
        let latest_result = self.do_flush_latest().await;
        self.record_flush_outcome(history_result.is_ok() && latest_result.is_ok());

        match (history_result, latest_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(h), Ok(())) => Err(FlushError::History(h)),
            (Ok(()), Err(l)) => Err(FlushError::Latest(l)),
            (Err(h), Err(l)) => Err(FlushError::Both(h, l)),
        }
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            history_len: self.history.lock().unwrap().len(),
            latest_len: self.latest.lock().unwrap().len(),
            last_flush_ok: *self.last_flush_ok.lock().unwrap(),
            flush_count: self.flush_count.load(Ordering::Relaxed),
        }
    }

    /// Stops the flush timer. Does not flush; callers that want a clean
    /// shutdown should call `force_flush` first.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let handle = self.timer_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Best-effort flush triggered by the timer. Skips this cycle (rather
    /// than waiting) if a flush is already in progress, so concurrent
    /// triggers coalesce into a single cycle.
    async fn flush_both_best_effort(self: &Arc<Self>) {
        let _guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("skipping timer-triggered flush: a flush is already in progress");
                return;
            }
        };
        let history_result = self.do_flush_history().await;
        let latest_result = self.do_flush_latest().await;
        self.record_flush_outcome(history_result.is_ok() && latest_result.is_ok());
    }

    /// Best-effort flush of the history buffer only, triggered when it
    /// crosses the size threshold. Skips if a flush is already running.
    async fn flush_history_only(self: &Arc<Self>) {
        let _guard = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("skipping size-triggered flush: a flush is already in progress");
                return;
            }
        };
        let result = self.do_flush_history().await;
        self.record_flush_outcome(result.is_ok());
    }

    async fn do_flush_history(&self) -> Result<(), EnqueueError> {
        let swapped = {
            let mut history = self.history.lock().unwrap();
            std::mem::take(&mut *history)
        };
        if swapped.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let count = swapped.len();
        let batch = HistoryBatch {
            batch_id: generate_batch_id("hist", now),
            created_at: now,
            positions: swapped.clone(),
        };

        match self.sink.enqueue_history(batch).await {
            Ok(()) => {
                self.events.publish(Event::HistoryBatchFlushed { count });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "history flush failed, restoring buffered positions");
                // Prepend the swapped-out positions back: anything that
                // arrived while the flush was in flight stays after them.
                let mut history = self.history.lock().unwrap();
                let mut restored = swapped;
                restored.append(&mut history);
                *history = restored;
                Err(e)
            }
        }
    }

    async fn do_flush_latest(&self) -> Result<(), EnqueueError> {
        let swapped = {
            let mut latest = self.latest.lock().unwrap();
            std::mem::take(&mut *latest)
        };
        if swapped.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let count = swapped.len();
        let set = LatestSet {
            batch_id: generate_batch_id("latest", now),
            updated_at: now,
            positions: swapped.clone(),
        };

        match self.sink.enqueue_latest(set).await {
            Ok(()) => {
                self.events.publish(Event::LatestSetFlushed { count });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "latest flush failed, restoring newer-or-equal positions");
                let mut latest = self.latest.lock().unwrap();
                for (device_id, position) in swapped {
                    match latest.get(&device_id) {
                        Some(existing) if existing.timestamp >= position.timestamp => {}
                        _ => {
                            latest.insert(device_id, position);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn record_flush_outcome(&self, ok: bool) {
        *self.last_flush_ok.lock().unwrap() = Some(ok);
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        if !ok {
            error!("flush cycle completed with at least one failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    fn position(device_id: &str) -> Position {
        Position {
            device_id: device_id.to_string(),
            lat: 1.0,
            lng: 2.0,
            timestamp: Utc::now(),
            received_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    struct RecordingSink {
        history_calls: AtomicUsize,
        latest_calls: AtomicUsize,
        fail_next_history: TokioMutex<bool>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                history_calls: AtomicUsize::new(0),
                latest_calls: AtomicUsize::new(0),
                fail_next_history: TokioMutex::new(false),
            })
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn enqueue_history(&self, _batch: HistoryBatch) -> Result<(), EnqueueError> {
            self.history_calls.fetch_add(1, Ordering::Relaxed);
            let mut fail = self.fail_next_history.lock().await;
            if *fail {
                *fail = false;
                return Err(EnqueueError("simulated failure".into()));
            }
            Ok(())
        }

        async fn enqueue_latest(&self, _latest: LatestSet) -> Result<(), EnqueueError> {
            self.latest_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn force_flush_empties_both_buffers_on_success() {
        let sink = RecordingSink::new();
        let events = Arc::new(EventBus::new());
        let accumulator = BatchAccumulator::new(sink.clone(), events, AccumulatorConfig::default());

        accumulator.submit(position("d1")).await;
        accumulator.submit(position("d2")).await;

        accumulator.force_flush().await.unwrap();

        let stats = accumulator.stats();
        assert_eq!(stats.history_len, 0);
        assert_eq!(stats.latest_len, 0);
        assert_eq!(sink.history_calls.load(Ordering::Relaxed), 1);
        assert_eq!(sink.latest_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_history_flush_restores_buffer() {
        let sink = RecordingSink::new();
        *sink.fail_next_history.lock().await = true;
        let events = Arc::new(EventBus::new());
        let accumulator = BatchAccumulator::new(sink.clone(), events, AccumulatorConfig::default());

        accumulator.submit(position("d1")).await;
        let result = accumulator.force_flush().await;
        assert!(result.is_err());

        assert_eq!(accumulator.stats().history_len, 1);
    }

    #[tokio::test]
    async fn latest_keeps_newest_fix_per_device() {
        let sink = RecordingSink::new();
        let events = Arc::new(EventBus::new());
        let accumulator = BatchAccumulator::new(sink, events, AccumulatorConfig::default());

        let mut older = position("d1");
        older.timestamp = Utc::now() - chrono::Duration::seconds(10);
        let newer = position("d1");

        accumulator.submit(newer.clone()).await;
        accumulator.submit(older).await;

        let stats = accumulator.stats();
        assert_eq!(stats.latest_len, 1);
    }

    #[tokio::test]
    async fn size_threshold_schedules_a_flush() {
        let sink = RecordingSink::new();
        let events = Arc::new(EventBus::new());
        let mut config = AccumulatorConfig::default();
        config.max_history_batch_size = 2;
        let accumulator = BatchAccumulator::new(sink.clone(), events, config);

        accumulator.submit(position("d1")).await;
        accumulator.submit(position("d2")).await;

        // The size-triggered flush is spawned in the background; give it
        // a chance to run.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(sink.history_calls.load(Ordering::Relaxed), 1);
    }
}
