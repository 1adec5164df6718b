use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub processor: ProcessorSettings,
    #[serde(default)]
    pub accumulator: AccumulatorSettings,
    #[serde(default)]
    pub queues: QueuesSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: usize,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl RedisConfig {
    pub fn to_redis_config(&self) -> persistence::db::RedisConfig {
        persistence::db::RedisConfig {
            url: self.url.clone(),
            pool_max_size: self.pool_max_size,
            connect_timeout_secs: self.connect_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Settings for the [`domain::services::Processor`].
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorSettings {
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,

    #[serde(default = "default_max_future_minutes")]
    pub max_future_minutes: i64,

    #[serde(default = "default_true")]
    pub duplicate_enabled: bool,

    #[serde(default = "default_duplicate_time_threshold_ms")]
    pub duplicate_time_threshold_ms: i64,

    #[serde(default = "default_duplicate_coordinate_threshold")]
    pub duplicate_coordinate_threshold: f64,

    #[serde(default = "default_duplicate_cache_size")]
    pub duplicate_cache_size: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            max_age_hours: default_max_age_hours(),
            max_future_minutes: default_max_future_minutes(),
            duplicate_enabled: true,
            duplicate_time_threshold_ms: default_duplicate_time_threshold_ms(),
            duplicate_coordinate_threshold: default_duplicate_coordinate_threshold(),
            duplicate_cache_size: default_duplicate_cache_size(),
        }
    }
}

/// Settings for the [`domain::services::BatchAccumulator`].
#[derive(Debug, Clone, Deserialize)]
pub struct AccumulatorSettings {
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
}

impl Default for AccumulatorSettings {
    fn default() -> Self {
        AccumulatorSettings {
            batch_interval_ms: default_batch_interval_ms(),
            batch_max_size: default_batch_max_size(),
        }
    }
}

/// Settings for a single named job queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub job_max_attempts: u32,
    pub base_backoff_ms: u64,
    pub poll_timeout_secs: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueuesSettings {
    #[serde(default = "default_history_queue")]
    pub history: QueueSettings,
    #[serde(default = "default_latest_queue")]
    pub latest: QueueSettings,
}

impl Default for QueuesSettings {
    fn default() -> Self {
        QueuesSettings {
            history: default_history_queue(),
            latest: default_latest_queue(),
        }
    }
}

/// Settings for the [`persistence::store::Store`].
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: isize,

    #[serde(default)]
    pub compress_history_payloads: bool,

    #[serde(default = "default_histogram_sample_size")]
    pub histogram_sample_size: isize,

    #[serde(default = "default_histogram_top_n")]
    pub histogram_top_n: usize,

    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,

    #[serde(default = "default_latest_key_ttl_s")]
    pub latest_key_ttl_s: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            max_history_entries: default_max_history_entries(),
            compress_history_payloads: false,
            histogram_sample_size: default_histogram_sample_size(),
            histogram_top_n: default_histogram_top_n(),
            cleanup_enabled: true,
            latest_key_ttl_s: default_latest_key_ttl_s(),
        }
    }
}

impl StoreSettings {
    pub fn to_store_config(&self) -> persistence::store::StoreConfig {
        persistence::store::StoreConfig {
            compress_history_payloads: self.compress_history_payloads,
            histogram_sample_size: self.histogram_sample_size,
            histogram_top_n: self.histogram_top_n,
            history_retention: Some(self.max_history_entries),
            cleanup_enabled: self.cleanup_enabled,
            latest_ttl: Some(Duration::from_secs(self.latest_key_ttl_s)),
        }
    }
}

impl ProcessorSettings {
    pub fn to_processor_config(&self) -> domain::services::ProcessorConfig {
        domain::services::ProcessorConfig {
            max_age: chrono::Duration::hours(self.max_age_hours),
            max_future: chrono::Duration::minutes(self.max_future_minutes),
            duplicate_detection_enabled: self.duplicate_enabled,
            duplicate_time_threshold: chrono::Duration::milliseconds(self.duplicate_time_threshold_ms),
            duplicate_coord_threshold: self.duplicate_coordinate_threshold,
            duplicate_cache_capacity: self.duplicate_cache_size,
        }
    }
}

impl AccumulatorSettings {
    pub fn to_accumulator_config(&self) -> domain::services::AccumulatorConfig {
        domain::services::AccumulatorConfig {
            flush_interval: Duration::from_millis(self.batch_interval_ms),
            max_history_batch_size: self.batch_max_size,
        }
    }
}

impl QueuesSettings {
    pub fn to_job_queue_config(&self) -> persistence::job_queue::JobQueueConfig {
        persistence::job_queue::JobQueueConfig {
            history: self.history.to_queue_config(),
            latest: self.latest.to_queue_config(),
        }
    }
}

impl QueueSettings {
    fn to_queue_config(&self) -> persistence::job_queue::QueueConfig {
        persistence::job_queue::QueueConfig {
            concurrency: self.concurrency,
            max_retries: self.job_max_attempts.saturating_sub(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_pool_max_size() -> usize {
    20
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_age_hours() -> i64 {
    24
}
fn default_max_future_minutes() -> i64 {
    5
}
fn default_duplicate_time_threshold_ms() -> i64 {
    1000
}
fn default_duplicate_coordinate_threshold() -> f64 {
    0.0001
}
fn default_duplicate_cache_size() -> usize {
    1000
}
fn default_batch_interval_ms() -> u64 {
    10_000
}
fn default_batch_max_size() -> usize {
    100
}
fn default_history_queue() -> QueueSettings {
    QueueSettings {
        concurrency: 5,
        job_max_attempts: 3,
        base_backoff_ms: 2000,
        poll_timeout_secs: 2,
        keep_completed: 100,
        keep_failed: 50,
    }
}
fn default_latest_queue() -> QueueSettings {
    QueueSettings {
        concurrency: 3,
        job_max_attempts: 3,
        base_backoff_ms: 1000,
        poll_timeout_secs: 2,
        keep_completed: 50,
        keep_failed: 25,
    }
}
fn default_max_history_entries() -> isize {
    100_000
}
fn default_histogram_sample_size() -> isize {
    1_000
}
fn default_histogram_top_n() -> usize {
    20
}
fn default_latest_key_ttl_s() -> u64 {
    604_800
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with GPS__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("GPS").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides.
    ///
    /// This method creates a config entirely from defaults and overrides,
    /// without relying on config files (which may not be accessible during tests).
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 1048576

            [redis]
            url = "redis://127.0.0.1:6379"
            pool_max_size = 20
            connect_timeout_secs = 10

            [logging]
            level = "info"
            format = "json"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        Ok(cfg)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.redis.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "GPS__REDIS__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .expect("Invalid socket address")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load_with_defaults() {
        let config = Config::load_for_test(&[]).expect("Failed to load config");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.processor.duplicate_cache_size, 1000);
        assert_eq!(config.accumulator.batch_max_size, 100);
        assert_eq!(config.queues.history.concurrency, 5);
        assert_eq!(config.queues.latest.concurrency, 3);
        assert_eq!(config.store.max_history_entries, 100_000);
    }

    #[test]
    fn test_config_env_override() {
        let config = Config::load_for_test(&[
            ("server.port", "9000"),
            ("logging.level", "debug"),
        ])
        .expect("Failed to load config");

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_validation_missing_redis_url() {
        let config = Config::load_for_test(&[("redis.url", "")]).expect("Failed to load config");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("GPS__REDIS__URL"));
    }

    #[test]
    fn test_socket_addr() {
        let config = Config::load_for_test(&[
            ("server.host", "127.0.0.1"),
            ("server.port", "3000"),
        ])
        .expect("Failed to load config");

        let addr = config.socket_addr();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn queue_settings_convert_max_attempts_to_max_retries() {
        let settings = default_history_queue();
        let queue_config = settings.to_queue_config();
        assert_eq!(queue_config.max_retries, 2);
    }
}
