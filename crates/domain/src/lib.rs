//! Domain layer for the GPS ingestion gateway.
//!
//! This crate contains:
//! - Domain models (`Position`, `HistoryBatch`, `LatestSet`)
//! - The `Processor`, `BatchAccumulator` and `EventBus` services
//! - The `BatchSink` trait, implemented by the persistence layer's job queue

pub mod models;
pub mod services;
