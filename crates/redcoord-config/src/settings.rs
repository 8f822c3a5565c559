use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoordConfig {
    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,
    /// Distributed lock tuning
    #[serde(default)]
    pub lock: LockSettings,
    /// Cache invalidation broadcast and subscriber tuning
    #[serde(default)]
    pub invalidation: InvalidationSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoordConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Redis validations
        if self.redis.url.trim().is_empty() {
            return Err(ConfigError::validation("redis.url must not be empty"));
        }
        if self.redis.pool_size == 0 {
            return Err(ConfigError::validation("redis.pool_size must be > 0"));
        }
        if self.redis.client_name.trim().is_empty() {
            return Err(ConfigError::validation("redis.client_name must not be empty"));
        }
        // Lock validations
        if self.lock.lease_ms == 0 || self.lock.renewal_interval_ms == 0 {
            return Err(ConfigError::validation(
                "lock.lease_ms and lock.renewal_interval_ms must be > 0",
            ));
        }
        if self.lock.renewal_interval_ms >= self.lock.lease_ms {
            return Err(ConfigError::validation(
                "lock.renewal_interval_ms must be < lock.lease_ms",
            ));
        }
        if self.lock.retry_interval_ms == 0 {
            return Err(ConfigError::validation("lock.retry_interval_ms must be > 0"));
        }
        if self.lock.default_max_hold_ms == 0 {
            return Err(ConfigError::validation("lock.default_max_hold_ms must be > 0"));
        }
        // Invalidation validations
        if self.invalidation.batch_size == 0 {
            return Err(ConfigError::validation("invalidation.batch_size must be > 0"));
        }
        if self.invalidation.retention_secs == 0 {
            return Err(ConfigError::validation(
                "invalidation.retention_secs must be > 0",
            ));
        }
        if self.invalidation.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "invalidation.poll_interval_ms must be > 0",
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        Ok(())
    }
}

/// Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix applied to the invalidation channel and history key
    #[serde(default)]
    pub key_prefix: String,

    /// Name of the cache client type; one pooled connection and one
    /// invalidation subscriber exist per name.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_client_name() -> String {
    "default".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: String::new(),
            client_name: default_client_name(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Lease and retry timings for the distributed lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// TTL written with every acquisition and renewal
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    /// How often a held lease is refreshed
    #[serde(default = "default_renewal_interval_ms")]
    pub renewal_interval_ms: u64,

    /// Pause between contended acquisition attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound of random jitter added to each retry pause
    #[serde(default)]
    pub retry_jitter_ms: u64,

    /// Hold ceiling used when the caller does not pass one
    #[serde(default = "default_max_hold_ms")]
    pub default_max_hold_ms: u64,
}

fn default_lease_ms() -> u64 {
    2000
}

fn default_renewal_interval_ms() -> u64 {
    200
}

fn default_retry_interval_ms() -> u64 {
    64
}

fn default_max_hold_ms() -> u64 {
    10_000
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ms: default_lease_ms(),
            renewal_interval_ms: default_renewal_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            retry_jitter_ms: 0,
            default_max_hold_ms: default_max_hold_ms(),
        }
    }
}

impl LockSettings {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_millis(self.renewal_interval_ms)
    }
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
    pub fn retry_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_jitter_ms)
    }
    pub fn default_max_hold(&self) -> Duration {
        Duration::from_millis(self.default_max_hold_ms)
    }
}

/// Invalidation broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationSettings {
    /// Maximum keys carried by one publish
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long invalidation history is kept for catch-up
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often subscriber agents check for a changed connection
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_batch_size() -> usize {
    30
}

fn default_retention_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for InvalidationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retention_secs: default_retention_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl InvalidationSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
