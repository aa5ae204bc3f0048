//! Service configuration.
//!
//! All settings load from a single TOML file with sensible defaults,
//! so a bare `rng-sanity serve` works out of the box. The store
//! settings are deployment-fixed: changing `prefix_bytes` on a live
//! database orphans every stored fingerprint.

use crate::sanity::SanityConfig;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Configuration validation and loading errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("prefix_bytes {0} out of range (must be 1..=15)")]
    InvalidPrefixBytes(usize),
    #[error("max_entries_per_bucket {0} too small (must be at least 2)")]
    InvalidBucketCapacity(usize),
    #[error("max_check_bytes {0} too small (must cover one 16-byte window)")]
    InvalidCheckBytes(usize),
    #[error("rate limit window must be nonzero")]
    InvalidRateWindow,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// HTTP front-end settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the service binds to.
    pub bind_addr: SocketAddr,
    /// Hourly request budget per anonymous client address.
    pub anonymous_limit: u64,
    /// Hourly request budget for callers presenting an id.
    pub registered_limit: u64,
    /// Rate limit window in seconds.
    pub limit_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 8080).into(),
            // Anonymous budget covers a sysadmin restarting a rack of
            // machines behind one address a few times an hour.
            anonymous_limit: 60,
            registered_limit: 600,
            limit_window_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Validates the server parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit_window_secs == 0 {
            return Err(ConfigError::InvalidRateWindow);
        }
        Ok(())
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    /// Sanity battery settings.
    #[serde(default)]
    pub sanity: SanityConfig,
    /// Uniqueness store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// HTTP service settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl FileConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: FileConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.server.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut config = FileConfig::default();
        config.store.prefix_bytes = 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPrefixBytes(16))
        ));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [sanity]
            decimal_hex = true

            [store]
            path = "/var/lib/rng-sanity/db.redb"
            prefix_bytes = 1
            max_entries_per_bucket = 100
            max_check_bytes = 64
            "#,
        )
        .unwrap();

        assert!(config.sanity.decimal_hex);
        assert_eq!(config.store.prefix_bytes, 1);
        assert_eq!(config.server.anonymous_limit, 60);
        assert!(config.validate().is_ok());
    }
}
