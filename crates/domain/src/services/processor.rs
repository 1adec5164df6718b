//! Normalizes raw ingestion payloads into [`Position`]s, validates them,
//! and filters out duplicates.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use shared::validation::{
    validate_device_id, validate_latitude, validate_longitude, validate_timestamp_window,
};

use crate::models::{NumberOrString, Position, RawPosition, TimestampValue};

/// A position that failed normalization or validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalid {
    pub field: Option<String>,
    pub message: String,
}

impl std::fmt::Display for Invalid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field.as_deref().unwrap_or("position"), self.message)
    }
}

impl std::error::Error for Invalid {}

impl Invalid {
    fn new(field: impl Into<Option<&'static str>>, message: impl Into<String>) -> Self {
        Invalid {
            field: field.into().map(str::to_string),
            message: message.into(),
        }
    }
}

/// The result of processing a single raw position.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Accepted(Position),
    Duplicate,
}

/// Tunables for validation and duplicate detection.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub max_age: Duration,
    pub max_future: Duration,
    pub duplicate_detection_enabled: bool,
    pub duplicate_time_threshold: Duration,
    pub duplicate_coord_threshold: f64,
    pub duplicate_cache_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            max_age: Duration::hours(24),
            max_future: Duration::minutes(5),
            duplicate_detection_enabled: true,
            duplicate_time_threshold: Duration::seconds(5),
            duplicate_coord_threshold: 0.00001,
            duplicate_cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    lat: f64,
    lng: f64,
    timestamp: DateTime<Utc>,
}

/// Bounded map of the last-seen fix per device, evicted oldest-inserted
/// first once `capacity` is reached.
struct DuplicateCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DuplicateCache {
    fn new(capacity: usize) -> Self {
        DuplicateCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `true` if `candidate` is within both thresholds of the
    /// device's last recorded fix.
    fn is_duplicate(
        &self,
        device_id: &str,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
        time_threshold: Duration,
        coord_threshold: f64,
    ) -> bool {
        match self.entries.get(device_id) {
            Some(prev) => {
                let dt = (timestamp - prev.timestamp).abs();
                dt <= time_threshold
                    && (lat - prev.lat).abs() < coord_threshold
                    && (lng - prev.lng).abs() < coord_threshold
            }
            None => false,
        }
    }

    /// Records `candidate` as the device's last-seen fix, evicting the
    /// oldest-inserted device if the cache is at capacity.
    fn record(&mut self, device_id: &str, lat: f64, lng: f64, timestamp: DateTime<Utc>) {
        if !self.entries.contains_key(device_id) {
            if self.entries.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(device_id.to_string());
        }
        self.entries.insert(
            device_id.to_string(),
            CacheEntry { lat, lng, timestamp },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Snapshot of the processor's internal state, for health/stats reporting.
#[derive(Debug, Clone)]
pub struct ProcessorStats {
    pub duplicate_cache_size: usize,
    pub duplicate_cache_capacity: usize,
}

/// Normalizes, validates and deduplicates raw ingestion payloads.
///
/// The duplicate cache is guarded by a single mutex; every critical
/// section under that lock is O(1), so contention stays cheap even under
/// concurrent submission from many HTTP handlers.
pub struct Processor {
    config: ProcessorConfig,
    cache: Mutex<DuplicateCache>,
}

impl Processor {
    pub fn new(config: ProcessorConfig) -> Self {
        let cache = Mutex::new(DuplicateCache::new(config.duplicate_cache_capacity));
        Processor { config, cache }
    }

    /// Normalizes and validates `raw`, then checks it against the
    /// duplicate cache. On acceptance the cache is updated with the new
    /// fix; on a duplicate the cache is left untouched.
    pub fn process(&self, raw: RawPosition, now: DateTime<Utc>) -> Result<ProcessOutcome, Invalid> {
        let position = self.normalize(raw, now)?;

        if self.config.duplicate_detection_enabled {
            let mut cache = self.cache.lock().unwrap();
            if cache.is_duplicate(
                &position.device_id,
                position.lat,
                position.lng,
                position.timestamp,
                self.config.duplicate_time_threshold,
                self.config.duplicate_coord_threshold,
            ) {
                return Ok(ProcessOutcome::Duplicate);
            }
            cache.record(
                &position.device_id,
                position.lat,
                position.lng,
                position.timestamp,
            );
        }

        Ok(ProcessOutcome::Accepted(position))
    }

    /// Processes a batch of raw positions independently, partitioning the
    /// results. One invalid or duplicate item never affects its siblings.
    pub fn process_batch(
        &self,
        raws: Vec<RawPosition>,
        now: DateTime<Utc>,
    ) -> BatchProcessResult {
        let mut accepted = Vec::new();
        let mut duplicates = 0usize;
        let mut errors = Vec::new();

        for (index, raw) in raws.into_iter().enumerate() {
            match self.process(raw, now) {
                Ok(ProcessOutcome::Accepted(position)) => accepted.push(position),
                Ok(ProcessOutcome::Duplicate) => duplicates += 1,
                Err(invalid) => errors.push(BatchError { index, invalid }),
            }
        }

        BatchProcessResult {
            accepted,
            duplicates,
            errors,
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        let cache = self.cache.lock().unwrap();
        ProcessorStats {
            duplicate_cache_size: cache.len(),
            duplicate_cache_capacity: self.config.duplicate_cache_capacity,
        }
    }

    fn normalize(&self, raw: RawPosition, now: DateTime<Utc>) -> Result<Position, Invalid> {
        let device_id = raw
            .device_id
            .ok_or_else(|| Invalid::new("device_id", "device_id is required"))?;
        validate_device_id(&device_id).map_err(|e| Invalid::new("device_id", e.message))?;

        let lat = raw
            .lat
            .ok_or_else(|| Invalid::new("lat", "lat is required"))?
            .as_f64()
            .map_err(|message| Invalid::new("lat", message))?;
        validate_latitude(lat).map_err(|e| Invalid::new("lat", e.message))?;

        let lng = raw
            .lng
            .ok_or_else(|| Invalid::new("lng", "lng is required"))?
            .as_f64()
            .map_err(|message| Invalid::new("lng", message))?;
        validate_longitude(lng).map_err(|e| Invalid::new("lng", e.message))?;

        let timestamp = match raw.timestamp {
            Some(TimestampValue::EpochMillis(ms)) => {
                DateTime::<Utc>::from_timestamp_millis(ms)
                    .ok_or_else(|| Invalid::new("timestamp", "timestamp out of range"))?
            }
            Some(TimestampValue::Text(text)) => parse_timestamp_text(&text)
                .ok_or_else(|| Invalid::new("timestamp", "timestamp is not valid RFC 3339 or epoch millis"))?,
            None => now,
        };
        validate_timestamp_window(timestamp, now, self.config.max_age, self.config.max_future)
            .map_err(|e| Invalid::new("timestamp", e.message))?;

        let mut metadata = raw.extra;
        if let Some(Value::Object(nested)) = metadata.remove("metadata") {
            for (key, value) in nested {
                metadata.insert(key, value);
            }
        }

        Ok(Position {
            device_id,
            lat,
            lng,
            timestamp,
            received_at: now,
            metadata,
        })
    }
}

fn parse_timestamp_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    text.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// A validation failure tied back to its position in the submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    pub index: usize,
    pub invalid: Invalid,
}

/// Outcome of processing a batch of raw positions.
#[derive(Debug, Clone)]
pub struct BatchProcessResult {
    pub accepted: Vec<Position>,
    pub duplicates: usize,
    pub errors: Vec<BatchError>,
}
