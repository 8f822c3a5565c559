use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

use crate::{ConfigError, CoordConfig};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "redcoord.toml";

/// Prefix for environment overrides, e.g. `REDCOORD__REDIS__URL`.
pub const ENV_PREFIX: &str = "REDCOORD";

pub fn load_config(path: Option<&str>) -> Result<CoordConfig, ConfigError> {
    let mut builder = Config::builder();
    let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
    if pathbuf.exists() {
        builder = builder.add_source(File::from(pathbuf));
    } else {
        tracing::debug!(path = %pathbuf.display(), "config file not found, using defaults");
    }
    // Environment variable overrides, e.g., REDCOORD__LOCK__LEASE_MS=3000
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| ConfigError::parse(format!("config build error: {e}")))?;
    let merged: CoordConfig = cfg
        .try_deserialize()
        .map_err(|e| ConfigError::parse(format!("config deserialize error: {e}")))?;
    merged.validate()?;
    Ok(merged)
}

pub fn load_config_with_default_path<P: AsRef<Path>>(
    path: Option<P>,
) -> Result<CoordConfig, ConfigError> {
    let p = path
        .as_ref()
        .map(|p| p.as_ref().to_string_lossy().to_string());
    load_config(p.as_deref())
}
