/// Schema migration for stored board records.
///
/// Version history:
///   0  tasks, columns, columnOrder
///   1  + theme
///   2  + bookmarks
///
/// Migration is a field-level coalesce: any persisted field that is missing
/// (or null) takes the fresh-document default; everything present, including
/// fields this build does not know, is kept as is. Records from the current
/// or a newer version pass through untouched.
use serde_json::{Map, Value};

use crate::bridge::LoadedDocument;
use crate::types::{BoardDocument, TRANSIENT_FIELDS};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Bring `raw` up to the current schema.
pub fn migrate(raw: Map<String, Value>, stored_version: u32) -> Map<String, Value> {
    if stored_version >= CURRENT_SCHEMA_VERSION {
        if stored_version > CURRENT_SCHEMA_VERSION {
            log::info!(
                target: "tabboard.migrate",
                "Record is schema v{} (newer than v{}), using it as is",
                stored_version,
                CURRENT_SCHEMA_VERSION
            );
        }
        return raw;
    }

    let mut migrated = raw;
    let mut filled = Vec::new();
    for (field, default) in default_fields() {
        let missing = migrated.get(&field).map_or(true, Value::is_null);
        if missing {
            filled.push(field.clone());
            migrated.insert(field, default);
        }
    }

    log::info!(
        target: "tabboard.migrate",
        "Migrated record from schema v{} to v{} (defaulted: {})",
        stored_version,
        CURRENT_SCHEMA_VERSION,
        if filled.is_empty() {
            "none".to_string()
        } else {
            filled.join(", ")
        }
    );
    migrated
}

/// Migrate a loaded record and convert it into a typed document.
/// Fields that only ever belong in memory are dropped on the way in.
pub fn into_document(loaded: LoadedDocument) -> Result<BoardDocument, serde_json::Error> {
    let mut normalized = migrate(loaded.state, loaded.version);
    for field in TRANSIENT_FIELDS {
        normalized.remove(*field);
    }
    serde_json::from_value(Value::Object(normalized))
}

/// Persisted fields of a fresh document, keyed by their stored names.
fn default_fields() -> Map<String, Value> {
    BoardDocument::default()
        .persisted_fields()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge;
    use crate::types::{Task, Theme};
    use chrono::Utc;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sample_document() -> BoardDocument {
        let mut doc = BoardDocument::default();
        doc.tasks.insert(
            "t1".into(),
            Task {
                id: "t1".into(),
                title: "Write report".into(),
                description: Some("Q3 numbers".into()),
                created_at: Utc::now(),
            },
        );
        doc.columns.get_mut("todo").unwrap().task_ids.push("t1".into());
        doc.theme = Theme::Light;
        doc.bookmarks.pop();
        doc.extra.insert("futureField".into(), json!({"x": 1}));
        doc
    }

    #[test]
    fn test_round_trip_at_current_version() {
        let doc = sample_document();
        let loaded = bridge::decode(&bridge::encode(&doc).unwrap()).unwrap();
        assert_eq!(loaded.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(into_document(loaded).unwrap(), doc);
    }

    #[test]
    fn test_current_version_passes_through() {
        let raw = object(json!({"tasks": {}, "somethingElse": 5}));
        assert_eq!(migrate(raw.clone(), CURRENT_SCHEMA_VERSION), raw);
    }

    #[test]
    fn test_newer_version_passes_through() {
        let raw = object(json!({"tasks": {}, "layout": "grid"}));
        assert_eq!(migrate(raw.clone(), CURRENT_SCHEMA_VERSION + 3), raw);
    }

    #[test]
    fn test_stale_schema_fills_defaults_and_keeps_data() {
        let raw = object(json!({
            "tasks": {
                "t1": {"id": "t1", "title": "Keep me", "createdAt": "2024-05-01T10:00:00Z"}
            },
            "columnOrder": ["todo", "done"]
        }));

        let migrated = migrate(raw.clone(), 1);
        assert_eq!(migrated["tasks"], raw["tasks"]);
        assert_eq!(migrated["columnOrder"], json!(["todo", "done"]));
        assert_eq!(migrated["theme"], json!("dark"));

        let doc = into_document(LoadedDocument {
            state: raw,
            version: 1,
        })
        .unwrap();
        let defaults = BoardDocument::default();
        assert_eq!(doc.columns, defaults.columns);
        assert_eq!(doc.bookmarks, defaults.bookmarks);
        assert_eq!(doc.theme, Theme::Dark);
        assert_eq!(doc.column_order, vec!["todo", "done"]);
        assert_eq!(doc.tasks["t1"].title, "Keep me");
    }

    #[test]
    fn test_present_fields_are_never_overwritten() {
        let raw = object(json!({
            "theme": "light",
            "bookmarks": [],
            "columns": null,
            "customFlag": true
        }));
        let migrated = migrate(raw, 0);
        assert_eq!(migrated["theme"], json!("light"));
        assert_eq!(migrated["bookmarks"], json!([]));
        assert!(migrated["columns"].is_object());
        assert_eq!(migrated["customFlag"], json!(true));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let raw = object(json!({"tasks": {}, "theme": "light"}));
        let once = migrate(raw, 0);
        let twice = migrate(once.clone(), 0);
        assert_eq!(once, twice);
        for field in ["tasks", "columns", "columnOrder", "theme", "bookmarks"] {
            assert!(once.contains_key(field), "missing {}", field);
        }
    }

    #[test]
    fn test_transient_fields_are_dropped() {
        let raw = object(json!({"isRevealed": true, "_hasHydrated": true}));
        let doc = into_document(LoadedDocument { state: raw, version: 1 }).unwrap();
        assert!(!doc.is_revealed);
        assert!(doc.extra.is_empty());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let raw = object(json!({"tasks": "not a map"}));
        assert!(into_document(LoadedDocument { state: raw, version: 0 }).is_err());
    }
}
