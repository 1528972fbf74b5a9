//! Tunables for the store and the sync engine.
//!
//! Every window and interval is a plain number of milliseconds so the whole
//! configuration can be read from a small JSON file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key of the collection blob in the durable medium.
    pub key: String,
    /// Version tag stamped on every save.
    pub version: String,
    /// Transactions older than this may be evicted when the medium is full.
    pub eviction_window_ms: u64,
}

impl StoreConfig {
    pub fn eviction_window(&self) -> Duration {
        Duration::from_millis(self.eviction_window_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key: "bet_sync_data".to_string(),
            version: "1.0".to_string(),
            eviction_window_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of the background processor.
    pub process_interval_ms: u64,
    /// Base delay; the n-th retry waits `n` times this.
    pub retry_backoff_ms: u64,
    /// Attempts after which a failing event stays failed.
    pub max_retries: u32,
    /// Synced events older than this leave the live queue.
    pub queue_retention_ms: u64,
    /// Audit entries older than this are dropped by `prune_audit_log`.
    pub audit_retention_ms: u64,
}

impl SyncConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn queue_retention(&self) -> Duration {
        Duration::from_millis(self.queue_retention_ms)
    }

    pub fn audit_retention(&self) -> Duration {
        Duration::from_millis(self.audit_retention_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            process_interval_ms: 5_000,
            retry_backoff_ms: 1_000,
            max_retries: 3,
            queue_retention_ms: 60 * 60 * 1000,
            audit_retention_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.store.key, "bet_sync_data");
        assert_eq!(config.store.eviction_window(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.sync.process_interval(), Duration::from_secs(5));
        assert_eq!(config.sync.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.sync.queue_retention(), Duration::from_secs(3600));
        assert_eq!(config.sync.audit_retention(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "sync": { "max_retries": 5 }, "store": { "key": "k" } }"#)
            .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_backoff_ms, 1_000);
        assert_eq!(config.store.key, "k");
        assert_eq!(config.store.version, "1.0");
    }

    #[test]
    fn errors_name_the_path() {
        let err = Config::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/definitely/not/here.json"));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
