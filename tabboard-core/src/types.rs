use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The terminal column. Cannot be deleted and is always last in the order.
pub const DONE_COLUMN_ID: &str = "done";

/// Fields that live only in memory. Older builds leaked them into storage,
/// so they are stripped again on read.
pub const TRANSIENT_FIELDS: &[&str] = &["isRevealed", "_hasHydrated"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

/// The whole board as held in memory.
///
/// Serializing this type yields exactly the persisted subset: `is_revealed`
/// is skipped, and the hydration flag is owned by
/// [`HydrationGate`](crate::hydration::HydrationGate) rather than the
/// document. Fields written by other builds that this one does not know are
/// kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDocument {
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default = "default_columns")]
    pub columns: BTreeMap<String, Column>,
    #[serde(default = "default_column_order")]
    pub column_order: Vec<String>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default = "default_bookmarks")]
    pub bookmarks: Vec<Bookmark>,
    #[serde(skip)]
    pub is_revealed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for BoardDocument {
    fn default() -> Self {
        Self {
            tasks: BTreeMap::new(),
            columns: default_columns(),
            column_order: default_column_order(),
            theme: Theme::default(),
            bookmarks: default_bookmarks(),
            is_revealed: false,
            extra: Map::new(),
        }
    }
}

impl BoardDocument {
    /// The persisted subset as a JSON object.
    pub fn persisted_fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "board serialized to a non-object: {}",
                other
            ))),
        }
    }

    /// Column that currently lists `task_id`, if any.
    pub fn owning_column(&self, task_id: &str) -> Option<&Column> {
        self.columns
            .values()
            .find(|col| col.task_ids.iter().any(|id| id == task_id))
    }
}

fn default_columns() -> BTreeMap<String, Column> {
    [("todo", "To Do"), ("in-progress", "In Progress"), (DONE_COLUMN_ID, "Done")]
        .into_iter()
        .map(|(id, title)| {
            (
                id.to_string(),
                Column {
                    id: id.to_string(),
                    title: title.to_string(),
                    task_ids: Vec::new(),
                },
            )
        })
        .collect()
}

fn default_column_order() -> Vec<String> {
    vec!["todo".into(), "in-progress".into(), DONE_COLUMN_ID.into()]
}

/// Seed bookmarks. Ids are stable so two fresh documents compare equal.
fn default_bookmarks() -> Vec<Bookmark> {
    [
        ("bookmark-google", "Google", "https://www.google.com"),
        ("bookmark-github", "GitHub", "https://github.com"),
        ("bookmark-youtube", "YouTube", "https://www.youtube.com"),
    ]
    .into_iter()
    .map(|(id, title, url)| Bookmark {
        id: id.to_string(),
        title: title.to_string(),
        url: url.to_string(),
    })
    .collect()
}

/// Accepts RFC 3339 strings and the epoch-millisecond numbers older builds wrote.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    match RawTimestamp::deserialize(d)? {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}

/// Generate a fresh entity id such as `task-3f2a...`.
pub fn fresh_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_document_shape() {
        let doc = BoardDocument::default();
        assert_eq!(doc.column_order, vec!["todo", "in-progress", "done"]);
        assert_eq!(doc.columns.len(), 3);
        assert_eq!(doc.bookmarks.len(), 3);
        assert_eq!(doc.theme, Theme::Dark);
        assert!(doc.tasks.is_empty());
        assert_eq!(doc, BoardDocument::default());
    }

    #[test]
    fn test_transient_flag_not_serialized() {
        let mut doc = BoardDocument::default();
        doc.is_revealed = true;
        let fields = doc.persisted_fields().unwrap();
        for field in TRANSIENT_FIELDS {
            assert!(!fields.contains_key(*field));
        }
        let keys: Vec<_> = fields.keys().cloned().collect();
        assert_eq!(keys.len(), 5);
        assert!(fields.contains_key("columnOrder"));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let value = json!({
            "tasks": {},
            "columns": {},
            "columnOrder": [],
            "theme": "light",
            "bookmarks": [],
            "pinnedNote": "keep me"
        });
        let doc: BoardDocument = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(doc.theme, Theme::Light);
        assert_eq!(doc.extra.get("pinnedNote"), Some(&json!("keep me")));
        assert_eq!(serde_json::to_value(&doc).unwrap(), value);
    }

    #[test]
    fn test_created_at_accepts_epoch_millis() {
        let task: Task = serde_json::from_value(json!({
            "id": "t1",
            "title": "Legacy",
            "createdAt": 1_700_000_000_000i64
        }))
        .unwrap();
        assert_eq!(task.created_at.timestamp_millis(), 1_700_000_000_000);
        assert!(task.description.is_none());

        let reencoded = serde_json::to_value(&task).unwrap();
        assert!(reencoded["createdAt"].is_string());
    }

    #[test]
    fn test_fresh_ids_are_unique() {
        let a = fresh_id("task");
        let b = fresh_id("task");
        assert!(a.starts_with("task-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_theme_toggle() {
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
        assert_eq!(serde_json::to_value(Theme::Light).unwrap(), json!("light"));
    }
}
