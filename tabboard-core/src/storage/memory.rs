/// In-memory key-value backend.
///
/// With quota limits it behaves like the synced storage area: writes that
/// would push a single item or the whole area past its cap are rejected with
/// `StorageError::QuotaExceeded` and leave the previous value in place.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{item_size, KeyValueBackend, StorageError};
pub use super::quota::QuotaLimits;

pub struct MemoryStorage {
    name: &'static str,
    entries: Mutex<HashMap<String, String>>,
    limits: Option<QuotaLimits>,
}

impl MemoryStorage {
    /// Unbounded store.
    pub fn unlimited() -> Self {
        Self {
            name: "memory",
            entries: Mutex::new(HashMap::new()),
            limits: None,
        }
    }

    /// Store that enforces the given per-item and total caps.
    pub fn with_quota(limits: QuotaLimits) -> Self {
        Self {
            name: "sync",
            entries: Mutex::new(HashMap::new()),
            limits: Some(limits),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl KeyValueBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if let Some(limits) = self.limits {
            let in_use: usize = entries.iter().map(|(k, v)| item_size(k, v)).sum();
            let existing = entries.get(key).map(|v| item_size(key, v)).unwrap_or(0);
            limits.check(self.name, key, item_size(key, value), in_use, existing)?;
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<usize, StorageError> {
        Ok(self.lock().iter().map(|(k, v)| item_size(k, v)).sum())
    }
}
