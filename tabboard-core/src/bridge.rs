/// Serialization bridge between the board document and the stored record.
///
/// Record layout under the configured key (a JSON string):
///   {"state": { ...persisted fields... }, "version": <schema version>}
///
/// Loading never fails: a missing, unreadable, or unparseable record is
/// reported as absent so startup can fall back to defaults.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::migrate::CURRENT_SCHEMA_VERSION;
use crate::storage::adapter::{StorageAdapter, StorageUsage, WriteTarget};
use crate::storage::StorageError;
use crate::types::BoardDocument;

/// A parsed record, not yet migrated.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub state: Map<String, Value>,
    pub version: u32,
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    state: &'a BoardDocument,
    version: u32,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    state: Map<String, Value>,
    #[serde(default)]
    version: u32,
}

pub struct PersistBridge {
    adapter: StorageAdapter,
    key: String,
}

impl PersistBridge {
    /// Bridge writing under the adapter's configured storage key.
    pub fn new(adapter: StorageAdapter) -> Self {
        let key = adapter.config().storage_key.clone();
        Self { adapter, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn adapter(&self) -> &StorageAdapter {
        &self.adapter
    }

    /// Read and parse the stored record.
    pub async fn load(&self) -> Option<LoadedDocument> {
        let raw = self.adapter.get(&self.key).await?;
        let loaded = decode(&raw);
        if loaded.is_none() {
            log::warn!(
                target: "tabboard.bridge",
                "Stored record under {} is unreadable ({} bytes), ignoring it",
                self.key,
                raw.len()
            );
        }
        loaded
    }

    /// Serialize the persisted subset of `doc` and write it.
    pub async fn save(&self, doc: &BoardDocument) -> Result<WriteTarget, StorageError> {
        let encoded = encode(doc)?;
        self.adapter.set(&self.key, &encoded).await
    }

    /// Delete the stored record.
    pub async fn remove(&self) {
        self.adapter.remove(&self.key).await;
    }

    pub async fn usage(&self) -> Result<StorageUsage, StorageError> {
        self.adapter.usage().await
    }
}

/// Encode `doc` at the current schema version.
pub fn encode(doc: &BoardDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string(&EnvelopeOut {
        state: doc,
        version: CURRENT_SCHEMA_VERSION,
    })
}

/// Parse a stored record. Records written before the envelope existed are a
/// bare state object and are read as version 0.
pub fn decode(raw: &str) -> Option<LoadedDocument> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let Value::Object(map) = value else {
        return None;
    };

    if map.get("state").is_some_and(Value::is_object) {
        let envelope: EnvelopeIn = serde_json::from_value(Value::Object(map)).ok()?;
        return Some(LoadedDocument {
            state: envelope.state,
            version: envelope.version,
        });
    }

    if looks_like_bare_state(&map) {
        return Some(LoadedDocument {
            state: map,
            version: 0,
        });
    }
    None
}

fn looks_like_bare_state(map: &Map<String, Value>) -> bool {
    ["tasks", "columns", "columnOrder"]
        .iter()
        .any(|field| map.contains_key(*field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::KeyValueBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn bridge() -> (PersistBridge, Arc<MemoryStorage>) {
        let primary = Arc::new(MemoryStorage::unlimited());
        let adapter = StorageAdapter::new(
            primary.clone(),
            Arc::new(MemoryStorage::unlimited()),
            StorageConfig::default(),
        );
        (PersistBridge::new(adapter), primary)
    }

    #[test]
    fn test_encode_excludes_transient_fields() {
        let mut doc = BoardDocument::default();
        doc.is_revealed = true;
        let encoded = encode(&doc).unwrap();
        assert!(!encoded.contains("isRevealed"));
        assert!(!encoded.contains("_hasHydrated"));

        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["version"], json!(CURRENT_SCHEMA_VERSION));
        assert_eq!(value["state"]["theme"], json!("dark"));
    }

    #[test]
    fn test_decode_envelope() {
        let loaded = decode(r#"{"state":{"tasks":{}},"version":1}"#).unwrap();
        assert_eq!(loaded.version, 1);
        assert!(loaded.state.contains_key("tasks"));
    }

    #[test]
    fn test_decode_bare_legacy_state() {
        let loaded = decode(r#"{"columnOrder":["todo","done"]}"#).unwrap();
        assert_eq!(loaded.version, 0);
        assert_eq!(loaded.state["columnOrder"], json!(["todo", "done"]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_none());
        assert!(decode("[1,2,3]").is_none());
        assert!(decode(r#""just a string""#).is_none());
        assert!(decode(r#"{"unrelated":true}"#).is_none());
        assert!(decode(r#"{"state":{},"version":"two"}"#).is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let (bridge, primary) = bridge();
        let doc = BoardDocument::default();
        assert_eq!(bridge.save(&doc).await.unwrap(), WriteTarget::Primary);
        assert!(primary.contains_key("newtab-board"));

        let loaded = bridge.load().await.unwrap();
        assert_eq!(loaded.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(loaded.state, doc.persisted_fields().unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_loads_as_absent() {
        let (bridge, primary) = bridge();
        primary.set("newtab-board", "{truncated").await.unwrap();
        assert!(bridge.load().await.is_none());
    }

    #[tokio::test]
    async fn test_remove_clears_record() {
        let (bridge, primary) = bridge();
        bridge.save(&BoardDocument::default()).await.unwrap();
        bridge.remove().await;
        assert!(primary.is_empty());
        assert!(bridge.load().await.is_none());
    }
}
