//! The shared store: durable write targets for history and latest-position
//! data, backed by Redis.
//!
//! Key layout:
//! - `gps:history:global` — a list of JSON-encoded history records, oldest
//!   first, append-only. Each entry is `{deviceId, lat, lng, timestamp,
//!   receivedAt, batchId, metadata}` — the `batchId` of the flush that
//!   wrote it.
//! - `gps:last:<device_id>` — a string holding the JSON-encoded latest
//!   record for that device: `{deviceId, lat, lng, timestamp, receivedAt,
//!   updatedAt, metadata}`, where `metadata` is itself a JSON-encoded
//!   string rather than a nested object.
//! - `gps:metadata:batch:<batch_id>` — a write-only, optionally
//!   gzip-compressed blob of a flushed history batch, kept for audit but
//!   never read back by this service.
//! - `gps:devices` — a set of every device id ever seen, so device
//!   enumeration never requires a Redis `KEYS`/`SCAN` sweep.

use std::collections::HashMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use domain::models::{HistoryBatch, LatestSet, Position};
use flate2::write::GzEncoder;
use flate2::Compression;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use thiserror::Error;
use tracing::debug;

use crate::metrics::OperationTimer;

/// Wire shape for one `gps:history:global` element. External-interface
/// contract: camelCase keys, `batchId` stamped from the flush that wrote it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord<'a> {
    device_id: &'a str,
    lat: f64,
    lng: f64,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    batch_id: &'a str,
    metadata: &'a Map<String, serde_json::Value>,
}

/// Read-back shape used only by [`Store::device_histogram`], which needs
/// nothing but the device id out of each sampled history entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryDeviceId {
    device_id: String,
}

/// Wire shape for a `gps:last:<device_id>` record. External-interface
/// contract: camelCase keys, `updatedAt` stamped from the flush, and
/// `metadata` encoded as a JSON string rather than a nested object.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LatestRecord<'a> {
    device_id: &'a str,
    lat: f64,
    lng: f64,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestRecordOwned {
    device_id: String,
    lat: f64,
    lng: f64,
    timestamp: DateTime<Utc>,
    received_at: DateTime<Utc>,
    #[serde(default)]
    metadata: String,
}

impl LatestRecordOwned {
    fn into_position(self) -> Result<Position, StoreError> {
        let metadata = if self.metadata.is_empty() {
            Map::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };
        Ok(Position {
            device_id: self.device_id,
            lat: self.lat,
            lng: self.lng,
            timestamp: self.timestamp,
            received_at: self.received_at,
            metadata,
        })
    }
}

const HISTORY_KEY: &str = "gps:history:global";
const DEVICES_SET_KEY: &str = "gps:devices";

fn latest_key(device_id: &str) -> String {
    format!("gps:last:{device_id}")
}

fn metadata_key(batch_id: &str) -> String {
    format!("gps:metadata:batch:{batch_id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to also write a gzip-compressed copy of each flushed
    /// history batch to `gps:metadata:batch:<batch_id>`.
    pub compress_history_payloads: bool,
    /// How many of the most recent history entries to sample when
    /// building the device-frequency histogram.
    pub histogram_sample_size: isize,
    /// How many devices to report in the histogram.
    pub histogram_top_n: usize,
    /// If set, every append trims `gps:history:global` to at most this
    /// many entries. Enforced unconditionally, independent of
    /// `cleanup_enabled`.
    pub history_retention: Option<isize>,
    /// Whether per-device latest records expire on inactivity. When
    /// false, `latest_ttl` is ignored and latest keys never expire.
    pub cleanup_enabled: bool,
    /// TTL applied to `gps:last:<device_id>` keys when `cleanup_enabled`
    /// is true.
    pub latest_ttl: Option<std::time::Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            compress_history_payloads: false,
            histogram_sample_size: 5_000,
            histogram_top_n: 20,
            history_retention: Some(1_000_000),
            cleanup_enabled: true,
            latest_ttl: Some(std::time::Duration::from_secs(604_800)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub history_len: usize,
    pub device_count: usize,
}

/// Durable store for flushed history batches and latest-position
/// snapshots.
pub struct Store {
    pool: Pool,
    config: StoreConfig,
}

impl Store {
    pub fn new(pool: Pool, config: StoreConfig) -> Self {
        Store { pool, config }
    }

    /// Appends every position in `batch` to the global history list,
    /// records each device id, and (if configured) writes a
    /// write-only compressed copy of the batch for audit purposes.
    pub async fn write_history_batch(&self, batch: &HistoryBatch) -> Result<(), StoreError> {
        let timer = OperationTimer::new("write_history_batch");
        if batch.is_empty() {
            timer.record();
            return Ok(());
        }

        let mut conn = self.pool.get().await?;

        let encoded: Vec<String> = batch
            .positions
            .iter()
            .map(|position| {
                serde_json::to_string(&HistoryRecord {
                    device_id: &position.device_id,
                    lat: position.lat,
                    lng: position.lng,
                    timestamp: position.timestamp,
                    received_at: position.received_at,
                    batch_id: &batch.batch_id,
                    metadata: &position.metadata,
                })
            })
            .collect::<Result<_, _>>()?;
        conn.rpush::<_, _, ()>(HISTORY_KEY, &encoded).await?;

        let device_ids: Vec<&str> = batch
            .positions
            .iter()
            .map(|p| p.device_id.as_str())
            .collect();
        if !device_ids.is_empty() {
            conn.sadd::<_, _, ()>(DEVICES_SET_KEY, &device_ids).await?;
        }

        if let Some(retention) = self.config.history_retention {
            conn.ltrim::<_, ()>(HISTORY_KEY, -retention, -1).await?;
        }

        if self.config.compress_history_payloads {
            let payload = serde_json::to_vec(batch)?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&payload)?;
            let compressed = encoder.finish()?;
            conn.set::<_, _, ()>(metadata_key(&batch.batch_id), compressed)
                .await?;
        }

        timer.record();
        debug!(batch_id = %batch.batch_id, count = batch.count(), "wrote history batch");
        Ok(())
    }

    /// Writes the latest known position for every device in `latest`.
    pub async fn write_latest(&self, latest: &LatestSet) -> Result<(), StoreError> {
        let timer = OperationTimer::new("write_latest");
        if latest.is_empty() {
            timer.record();
            return Ok(());
        }

        let mut conn = self.pool.get().await?;

        let ttl = if self.config.cleanup_enabled {
            self.config.latest_ttl
        } else {
            None
        };

        let mut pipe = redis::pipe();
        for (device_id, position) in &latest.positions {
            let metadata = serde_json::to_string(&position.metadata)?;
            let encoded = serde_json::to_string(&LatestRecord {
                device_id,
                lat: position.lat,
                lng: position.lng,
                timestamp: position.timestamp,
                received_at: position.received_at,
                updated_at: latest.updated_at,
                metadata,
            })?;
            match ttl {
                Some(ttl) => {
                    pipe.set_ex(latest_key(device_id), encoded, ttl.as_secs());
                }
                None => {
                    pipe.set(latest_key(device_id), encoded);
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        let device_ids: Vec<&str> = latest.positions.keys().map(String::as_str).collect();
        conn.sadd::<_, _, ()>(DEVICES_SET_KEY, &device_ids).await?;

        timer.record();
        debug!(batch_id = %latest.batch_id, count = latest.count(), "wrote latest set");
        Ok(())
    }

    pub async fn get_latest(&self, device_id: &str) -> Result<Option<Position>, StoreError> {
        let timer = OperationTimer::new("get_latest");
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(latest_key(device_id)).await?;
        timer.record();
        match raw {
            Some(raw) => {
                let record: LatestRecordOwned = serde_json::from_str(&raw)?;
                Ok(Some(record.into_position()?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_latest_many(
        &self,
        device_ids: &[String],
    ) -> Result<HashMap<String, Position>, StoreError> {
        let timer = OperationTimer::new("get_latest_many");
        if device_ids.is_empty() {
            timer.record();
            return Ok(HashMap::new());
        }

        let mut conn = self.pool.get().await?;
        let keys: Vec<String> = device_ids.iter().map(|id| latest_key(id)).collect();
        let raws: Vec<Option<String>> = conn.mget(&keys).await?;
        timer.record();

        let mut result = HashMap::with_capacity(device_ids.len());
        for (device_id, raw) in device_ids.iter().zip(raws) {
            if let Some(raw) = raw {
                let record: LatestRecordOwned = serde_json::from_str(&raw)?;
                result.insert(device_id.clone(), record.into_position()?);
            }
        }
        Ok(result)
    }

    pub async fn list_devices(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;
        let devices: Vec<String> = conn.smembers(DEVICES_SET_KEY).await?;
        Ok(devices)
    }

    /// Samples the most recently written history entries and returns the
    /// top devices by frequency within that sample. This is an
    /// approximation over recent traffic, not an exact global count.
    pub async fn device_histogram(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let timer = OperationTimer::new("device_histogram");
        let mut conn = self.pool.get().await?;
        let sample: Vec<String> = conn
            .lrange(HISTORY_KEY, -self.config.histogram_sample_size, -1)
            .await?;
        timer.record();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for raw in &sample {
            if let Ok(entry) = serde_json::from_str::<HistoryDeviceId>(raw) {
                *counts.entry(entry.device_id).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.config.histogram_top_n);
        Ok(ranked)
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut conn = self.pool.get().await?;
        let history_len: usize = conn.llen(HISTORY_KEY).await?;
        let device_count: usize = conn.scard(DEVICES_SET_KEY).await?;
        Ok(StoreStats {
            history_len,
            device_count,
        })
    }

    /// Trims the global history list down to the configured retention,
    /// returning the number of entries removed. Per-device inactivity
    /// eviction is handled passively by the TTL set on `gps:last:<id>`
    /// keys in `write_latest`, not by an active scan here.
    pub async fn cleanup(&self) -> Result<usize, StoreError> {
        let Some(retention) = self.config.history_retention else {
            return Ok(0);
        };
        let mut conn = self.pool.get().await?;
        let before: usize = conn.llen(HISTORY_KEY).await?;
        conn.ltrim::<_, ()>(HISTORY_KEY, -retention, -1).await?;
        let after: usize = conn.llen(HISTORY_KEY).await?;
        Ok(before.saturating_sub(after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_key_is_namespaced_per_device() {
        assert_eq!(latest_key("d1"), "gps:last:d1");
    }

    #[test]
    fn metadata_key_is_namespaced_per_batch() {
        assert_eq!(metadata_key("hist_123_abcdef"), "gps:metadata:batch:hist_123_abcdef");
    }

    #[test]
    fn default_config_enables_retention_and_disables_compression() {
        let config = StoreConfig::default();
        assert!(!config.compress_history_payloads);
        assert!(config.history_retention.is_some());
    }

    #[test]
    fn default_config_enables_cleanup_with_a_week_ttl() {
        let config = StoreConfig::default();
        assert!(config.cleanup_enabled);
        assert_eq!(config.latest_ttl, Some(std::time::Duration::from_secs(604_800)));
    }

    #[test]
    fn history_record_serializes_to_camel_case_with_batch_id() {
        let metadata = Map::new();
        let now = Utc::now();
        let record = HistoryRecord {
            device_id: "d1",
            lat: 1.0,
            lng: 2.0,
            timestamp: now,
            received_at: now,
            batch_id: "hist_123_abcdef",
            metadata: &metadata,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"deviceId\":\"d1\""));
        assert!(json.contains("\"receivedAt\""));
        assert!(json.contains("\"batchId\":\"hist_123_abcdef\""));
        assert!(!json.contains("device_id"));
    }

    #[test]
    fn latest_record_serializes_metadata_as_a_json_string() {
        let mut metadata = Map::new();
        metadata.insert("speed".to_string(), serde_json::json!(12.5));
        let now = Utc::now();
        let record = LatestRecord {
            device_id: "d1",
            lat: 1.0,
            lng: 2.0,
            timestamp: now,
            received_at: now,
            updated_at: now,
            metadata: serde_json::to_string(&metadata).unwrap(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"updatedAt\""));
        // metadata is a JSON-encoded string, so its braces are escaped.
        assert!(json.contains("\"metadata\":\"{\\\"speed\\\":12.5}\""));
    }

    #[test]
    fn latest_record_owned_round_trips_through_into_position() {
        let now = Utc::now();
        let mut metadata = Map::new();
        metadata.insert("speed".to_string(), serde_json::json!(12.5));
        let encoded = serde_json::to_string(&LatestRecord {
            device_id: "d1",
            lat: 1.0,
            lng: 2.0,
            timestamp: now,
            received_at: now,
            updated_at: now,
            metadata: serde_json::to_string(&metadata).unwrap(),
        })
        .unwrap();

        let decoded: LatestRecordOwned = serde_json::from_str(&encoded).unwrap();
        let position = decoded.into_position().unwrap();
        assert_eq!(position.device_id, "d1");
        assert_eq!(position.metadata, metadata);
    }
}
