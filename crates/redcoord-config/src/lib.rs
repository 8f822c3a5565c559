//! Configuration for the redcoord coordination primitives.
//!
//! Settings are read from an optional TOML file and overridden by
//! `REDCOORD__SECTION__FIELD` environment variables:
//!
//! ```toml
//! [redis]
//! url = "redis://localhost:6379"
//! key_prefix = "app:"
//!
//! [lock]
//! lease_ms = 2000
//! renewal_interval_ms = 200
//!
//! [invalidation]
//! batch_size = 30
//! retention_secs = 60
//! ```

pub mod loader;
pub mod settings;

pub use loader::{load_config, load_config_with_default_path};
pub use settings::{
    CoordConfig, InvalidationSettings, LockSettings, LoggingConfig, RedisConfig,
};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
