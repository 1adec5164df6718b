//! A best-effort, synchronous publish/subscribe bus for observability
//! hooks (metrics, audit logging, cache invalidation). It is never on the
//! path that determines correctness: a panicking or missing listener
//! never affects ingestion, accumulation, or storage.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::error;

/// The topics a listener may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PositionAccumulated,
    HistoryBatchFlushed,
    LatestSetFlushed,
    QueueJobSucceeded,
    QueueJobFailed,
    StoreWritten,
    StoreCleaned,
}

/// An event published on the bus. Each variant corresponds to exactly one
/// [`Topic`].
#[derive(Debug, Clone)]
pub enum Event {
    PositionAccumulated { device_id: String },
    HistoryBatchFlushed { count: usize },
    LatestSetFlushed { count: usize },
    QueueJobSucceeded { queue: String },
    QueueJobFailed { queue: String, reason: String },
    StoreWritten { key: String },
    StoreCleaned { removed: usize },
}

impl Event {
    fn topic(&self) -> Topic {
        match self {
            Event::PositionAccumulated { .. } => Topic::PositionAccumulated,
            Event::HistoryBatchFlushed { .. } => Topic::HistoryBatchFlushed,
            Event::LatestSetFlushed { .. } => Topic::LatestSetFlushed,
            Event::QueueJobSucceeded { .. } => Topic::QueueJobSucceeded,
            Event::QueueJobFailed { .. } => Topic::QueueJobFailed,
            Event::StoreWritten { .. } => Topic::StoreWritten,
            Event::StoreCleaned { .. } => Topic::StoreCleaned,
        }
    }
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// In-process pub/sub bus. Listeners run synchronously on the publisher's
/// thread/task; slow listeners should hand off work rather than block.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<Topic, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe<F>(&self, topic: Topic, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap()
            .entry(topic)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Publishes `event` to every listener subscribed to its topic. A
    /// listener that panics is caught and logged; it does not stop
    /// remaining listeners from running and never propagates to the
    /// caller.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let listeners = {
            let guard = self.listeners.lock().unwrap();
            guard.get(&topic).cloned().unwrap_or_default()
        };
        for listener in listeners {
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            if result.is_err() {
                error!(?topic, "event listener panicked");
            }
        }
    }
}
