/// Local filesystem key-value backend.
///
/// Holds the local area as is, and the synced area when wrapped in
/// `QuotaLimited`. One file per key:
/// - file name = first 12 hex chars of SHA-256(key) + ".json"
/// - atomic writes (write to .tmp, fsync, rename, fsync directory)
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{KeyValueBackend, StorageError};

const VALUE_EXTENSION: &str = "json";

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic file name for a key.
    pub fn file_name_for_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let result = hasher.finalize();
        format!("{}.{}", hex::encode(&result[..6]), VALUE_EXTENSION)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(Self::file_name_for_key(key))
    }

    /// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
    fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        if let Some(dir) = path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::atomic_write(&self.path_for(key), value)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Value bytes on disk. Keys are not stored, so they count as zero.
    async fn bytes_in_use(&self) -> Result<usize, StorageError> {
        let mut total = 0usize;
        for entry in fs::read_dir(&self.root)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXTENSION) {
                continue;
            }
            total += entry.metadata().map(|m| m.len() as usize).unwrap_or(0);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_deterministic() {
        let a = LocalStorage::file_name_for_key("newtab-board");
        let b = LocalStorage::file_name_for_key("newtab-board");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12 + 1 + VALUE_EXTENSION.len());
        assert_ne!(a, LocalStorage::file_name_for_key("other"));
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path().join("kv")).unwrap();

        assert_eq!(store.get("board").await.unwrap(), None);
        store.set("board", "{\"a\":1}").await.unwrap();
        assert_eq!(store.get("board").await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(store.bytes_in_use().await.unwrap(), 7);

        // No temp file left behind after the rename.
        let leftovers: Vec<_> = fs::read_dir(store.root())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());

        store.remove("board").await.unwrap();
        store.remove("board").await.unwrap();
        assert_eq!(store.get("board").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_large_values_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path()).unwrap();
        let big = "x".repeat(200_000);
        store.set("board", &big).await.unwrap();
        assert_eq!(store.get("board").await.unwrap().map(|v| v.len()), Some(200_000));
    }
}
