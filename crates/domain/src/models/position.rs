//! Normalized position data and the batch shapes built from it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single GPS fix that has passed validation.
///
/// `metadata` holds any extra fields the source sent (e.g. `speed`,
/// `heading`, `accuracy`) verbatim; the processor never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A flushed slice of the history buffer, ready to be handed to the
/// history queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryBatch {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub positions: Vec<Position>,
}

impl HistoryBatch {
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// A flushed snapshot of the per-device latest map, ready to be handed to
/// the latest queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestSet {
    pub batch_id: String,
    pub updated_at: DateTime<Utc>,
    pub positions: HashMap<String, Position>,
}

impl LatestSet {
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(device_id: &str) -> Position {
        Position {
            device_id: device_id.to_string(),
            lat: 1.0,
            lng: 2.0,
            timestamp: Utc::now(),
            received_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn history_batch_count_matches_positions() {
        let batch = HistoryBatch {
            batch_id: "hist_1".into(),
            created_at: Utc::now(),
            positions: vec![pos("a"), pos("b")],
        };
        assert_eq!(batch.count(), 2);
        assert!(!batch.is_empty());
    }

    #[test]
    fn latest_set_empty_when_no_positions() {
        let set = LatestSet {
            batch_id: "latest_1".into(),
            updated_at: Utc::now(),
            positions: HashMap::new(),
        };
        assert!(set.is_empty());
        assert_eq!(set.count(), 0);
    }
}
