//! Redis/store metrics collection.
//!
//! Provides functions for recording store- and queue-related metrics.

use std::time::Instant;

use metrics::{gauge, histogram};

/// Record store operation duration.
///
/// Call this function after executing a store operation to record its
/// duration.
pub fn record_operation_duration(operation: &str, duration_secs: f64) {
    histogram!(
        "store_operation_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Record connection pool metrics.
///
/// Call this function periodically to track pool health.
pub fn record_pool_metrics(status: &deadpool_redis::Status) {
    gauge!("redis_pool_connections_total").set(status.size as f64);
    gauge!("redis_pool_connections_available").set(status.available as f64);
    gauge!("redis_pool_connections_waiting").set(status.waiting as f64);
}

/// Records the current depth of a named job queue.
pub fn record_queue_depth(queue: &str, depth: usize) {
    gauge!("job_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// A helper to time store operations and record metrics.
///
/// Usage:
/// ```ignore
/// let timer = OperationTimer::new("write_history_batch");
/// let result = store.write_history_batch(&batch).await;
/// timer.record();
/// result
/// ```
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    /// Create a new timer for the given operation name.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation_duration(&self.operation, duration);
    }
}
