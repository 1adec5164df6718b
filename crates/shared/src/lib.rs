//! Shared utilities for the GPS ingestion gateway.
//!
//! This crate provides common functionality used across the other crates:
//! - Field validation (device id, coordinates, timestamps)
//! - Batch/job id generation

pub mod ids;
pub mod validation;
