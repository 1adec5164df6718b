//! Domain models for GPS positions and the batches built from them.

mod position;
mod raw;

pub use position::{HistoryBatch, LatestSet, Position};
pub use raw::{NumberOrString, RawPosition, TimestampValue};
