/// Storage configuration for the board store.
/// Reads an optional JSON file; every field falls back to the remote
/// store's documented limits.
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Total bytes the remote store accepts across all keys.
pub const QUOTA_BYTES: usize = 102_400;
/// Largest single item (key + value) the remote store accepts.
pub const QUOTA_BYTES_PER_ITEM: usize = 8_192;
pub const MAX_WRITE_OPERATIONS_PER_MINUTE: usize = 120;
pub const MAX_WRITE_OPERATIONS_PER_HOUR: usize = 1_800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: usize,
    #[serde(default = "default_quota_bytes_per_item")]
    pub quota_bytes_per_item: usize,
    #[serde(default = "default_writes_per_minute")]
    pub max_writes_per_minute: usize,
    #[serde(default = "default_writes_per_hour")]
    pub max_writes_per_hour: usize,
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Directory of the local fallback store. `None` means [`default_local_dir`].
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

fn default_storage_key() -> String {
    "newtab-board".to_string()
}

fn default_quota_bytes() -> usize {
    QUOTA_BYTES
}

fn default_quota_bytes_per_item() -> usize {
    QUOTA_BYTES_PER_ITEM
}

fn default_writes_per_minute() -> usize {
    MAX_WRITE_OPERATIONS_PER_MINUTE
}

fn default_writes_per_hour() -> usize {
    MAX_WRITE_OPERATIONS_PER_HOUR
}

fn default_read_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            quota_bytes: default_quota_bytes(),
            quota_bytes_per_item: default_quota_bytes_per_item(),
            max_writes_per_minute: default_writes_per_minute(),
            max_writes_per_hour: default_writes_per_hour(),
            read_attempts: default_read_attempts(),
            retry_base_ms: default_retry_base_ms(),
            local_dir: None,
        }
    }
}

impl StorageConfig {
    /// Linear backoff: the wait after failed attempt `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_ms.saturating_mul(u64::from(attempt)))
    }

    /// Local fallback directory, resolved against the platform default.
    pub fn resolved_local_dir(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(default_local_dir)
    }
}

/// Default local store: <data_local_dir>/tabboard/local-storage
pub fn default_local_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabboard")
        .join("local-storage")
}

/// Default config path: <config_dir>/tabboard/storage.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabboard")
        .join("storage.json")
}

/// Load config from path. Returns defaults if the file is missing or malformed.
pub fn load_config(path: &Path) -> StorageConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!(
                target: "tabboard.config",
                "Failed to parse config {}: {}",
                path.display(),
                e
            );
            StorageConfig::default()
        }),
        Err(_) => {
            log::info!(
                target: "tabboard.config",
                "No config at {}, using defaults",
                path.display()
            );
            StorageConfig::default()
        }
    }
}
