/// Quota enforcement shared by the backends that model the synced area.
///
/// A write is rejected with `StorageError::QuotaExceeded` when the item alone
/// is over the per-item cap, or when the area would be over its total quota
/// after the write. The replaced copy of the same key is not counted twice.
use async_trait::async_trait;

use super::{item_size, KeyValueBackend, StorageError};
use crate::config::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub quota_bytes: usize,
    pub quota_bytes_per_item: usize,
}

impl From<&StorageConfig> for QuotaLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            quota_bytes: config.quota_bytes,
            quota_bytes_per_item: config.quota_bytes_per_item,
        }
    }
}

impl QuotaLimits {
    /// Check a write of `size` bytes given the current usage and the bytes
    /// held by the copy it replaces.
    pub fn check(
        &self,
        backend: &'static str,
        key: &str,
        size: usize,
        in_use: usize,
        existing: usize,
    ) -> Result<(), StorageError> {
        if size > self.quota_bytes_per_item {
            return Err(StorageError::QuotaExceeded {
                backend,
                detail: format!(
                    "item {} is {} bytes (per-item cap {})",
                    key, size, self.quota_bytes_per_item
                ),
            });
        }
        let projected = in_use.saturating_sub(existing) + size;
        if projected > self.quota_bytes {
            return Err(StorageError::QuotaExceeded {
                backend,
                detail: format!(
                    "{} bytes would be in use (quota {})",
                    projected, self.quota_bytes
                ),
            });
        }
        Ok(())
    }
}

/// Any backend with the synced area's limits enforced on top.
///
/// Writes go through a single writer task, so the usage read and the write
/// that follows it are not raced by other writers.
pub struct QuotaLimited<B> {
    inner: B,
    limits: QuotaLimits,
}

impl<B: KeyValueBackend> QuotaLimited<B> {
    pub fn new(inner: B, limits: QuotaLimits) -> Self {
        Self { inner, limits }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }
}

#[async_trait]
impl<B: KeyValueBackend> KeyValueBackend for QuotaLimited<B> {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let in_use = self.inner.bytes_in_use().await?;
        let existing = self.inner.item_bytes(key).await?;
        self.limits
            .check(self.name(), key, item_size(key, value), in_use, existing)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }

    async fn bytes_in_use(&self) -> Result<usize, StorageError> {
        self.inner.bytes_in_use().await
    }

    async fn item_bytes(&self, key: &str) -> Result<usize, StorageError> {
        self.inner.item_bytes(key).await
    }
}
