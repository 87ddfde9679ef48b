//! Runtime configuration for the worker process and submission service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Root of the filesystem object store.
    pub storage_root: PathBuf,
    /// Parent directory for per-job working directories.
    pub working_root: PathBuf,
    /// Number of competing consumer threads in this process.
    pub worker_count: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Sleep after a dequeue error before polling again.
    pub error_backoff_ms: u64,
    /// Validity window for upload/download grants.
    pub grant_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".fileforge");
        Self {
            database_path: data_dir.join("data").join("fileforge.db"),
            storage_root: data_dir.join("storage"),
            working_root: std::env::temp_dir(),
            worker_count: num_cpus::get(),
            poll_interval_ms: 1000,
            error_backoff_ms: 5000,
            grant_ttl_secs: 3600,
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file. Missing fields fall back to
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation {
                message: "workerCount must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn grant_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grant_ttl_secs as i64)
    }
}
