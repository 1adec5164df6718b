//! Process-wide service wiring.

pub mod coordinator;

pub use coordinator::{Coordinator, HealthReport, StatsReport};
