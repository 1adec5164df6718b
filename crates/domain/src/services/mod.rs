//! Business logic services: normalization, accumulation, and eventing.

mod accumulator;
mod event_bus;
mod processor;

pub use accumulator::{AccumulatorConfig, AccumulatorStats, BatchAccumulator, BatchSink, EnqueueError, FlushError};
pub use event_bus::{Event, EventBus, Topic};
pub use processor::{BatchError, BatchProcessResult, Invalid, ProcessOutcome, Processor, ProcessorConfig, ProcessorStats};
