//! Redis connection pool management.

use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime, Timeouts};

/// Redis configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub pool_max_size: usize,
    pub connect_timeout_secs: u64,
}

/// Creates a Redis connection pool with the given configuration.
pub fn create_pool(config: &RedisConfig) -> Result<Pool, deadpool_redis::CreatePoolError> {
    let mut cfg = PoolConfig::from_url(&config.url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_max_size);
    pool_config.timeouts = Timeouts {
        wait: Some(Duration::from_secs(config.connect_timeout_secs)),
        create: Some(Duration::from_secs(config.connect_timeout_secs)),
        recycle: Some(Duration::from_secs(config.connect_timeout_secs)),
    };
    cfg.pool = Some(pool_config);
    cfg.create_pool(Some(Runtime::Tokio1))
}
