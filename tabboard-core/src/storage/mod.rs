pub mod adapter;
pub mod local;
pub mod memory;
pub mod quota;
pub mod rate;

use async_trait::async_trait;

/// A string-valued key-value backend.
/// Implementations: LocalStorage (filesystem), MemoryStorage (tests), and
/// QuotaLimited, which puts the synced area's limits on top of either.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Read a value. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. Absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Total bytes currently stored, counted the way quotas count them.
    async fn bytes_in_use(&self) -> Result<usize, StorageError>;

    /// Bytes the current copy of `key` occupies, 0 when absent.
    async fn item_bytes(&self, key: &str) -> Result<usize, StorageError> {
        Ok(self
            .get(key)
            .await?
            .map(|value| item_size(key, &value))
            .unwrap_or(0))
    }
}

/// Size of one stored item: key bytes plus value bytes.
pub fn item_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Quota exceeded on {backend}: {detail}")]
    QuotaExceeded {
        backend: &'static str,
        detail: String,
    },

    #[error("Backend {backend} unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}
