/// Board document store.
///
/// Owns the in-memory board, the hydration gate and the write queue. Every
/// mutation is synchronous, leaves the board consistent, and hands the new
/// persisted subset to the writer. Changes made before the first hydration
/// are held until it finishes: saved if nothing was stored, replaced by the
/// stored board otherwise.
///
/// Consistency rules kept after every mutation:
/// - a task id appears in at most one column's `task_ids`, and only if the
///   task exists
/// - the `done` column, when it exists, is last in `column_order`
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;

use crate::bridge::PersistBridge;
use crate::config::{default_config_path, load_config, StorageConfig};
use crate::hydration::HydrationGate;
use crate::migrate;
use crate::storage::adapter::{StorageAdapter, StorageUsage};
use crate::storage::local::LocalStorage;
use crate::storage::quota::{QuotaLimited, QuotaLimits};
use crate::storage::{KeyValueBackend, StorageError};
use crate::types::*;
use crate::writer::{self, PersistEvent, WriteQueue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoardError {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task_id} is not at index {index} of column {column_id}")]
    TaskNotAtIndex {
        task_id: String,
        column_id: String,
        index: usize,
    },

    #[error("Index {index} out of range (0-{max})")]
    IndexOutOfRange { index: usize, max: usize },
}

/// How a load cycle ended. The gate opens in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationOutcome {
    /// A stored record was found and adopted.
    Restored { from_version: u32 },
    /// Nothing stored; the in-memory defaults stay.
    Defaulted,
    /// A record was found but could not be turned into a board.
    Failed,
}

pub struct BoardStore {
    doc: BoardDocument,
    bridge: Arc<PersistBridge>,
    gate: Arc<HydrationGate>,
    events: broadcast::Sender<PersistEvent>,
    /// Started when the gate first opens.
    writer: Option<WriteQueue>,
    /// A mutation happened while there was no writer yet.
    unsaved_before_ready: bool,
}

impl BoardStore {
    /// A store holding the default board, not yet hydrated.
    pub fn new(bridge: Arc<PersistBridge>) -> Self {
        Self {
            doc: BoardDocument::default(),
            bridge,
            gate: Arc::new(HydrationGate::new()),
            events: writer::event_channel(),
            writer: None,
            unsaved_before_ready: false,
        }
    }

    /// Convenience constructor wiring an adapter over the two backends.
    pub fn with_backends(
        primary: Arc<dyn KeyValueBackend>,
        fallback: Arc<dyn KeyValueBackend>,
        config: StorageConfig,
    ) -> Self {
        let adapter = StorageAdapter::new(primary, fallback, config);
        Self::new(Arc::new(PersistBridge::new(adapter)))
    }

    /// Standard wiring under `config.resolved_local_dir()`: `sync/` holds the
    /// quota-limited primary and `local/` the unlimited fallback. Both are on
    /// disk.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let root = config.resolved_local_dir();
        let primary = QuotaLimited::new(
            LocalStorage::new(root.join("sync"))?,
            QuotaLimits::from(&config),
        );
        let fallback = LocalStorage::new(root.join("local"))?;
        log::info!(
            target: "tabboard.store",
            "Board storage at {}",
            root.display()
        );
        Ok(Self::with_backends(
            Arc::new(primary),
            Arc::new(fallback),
            config,
        ))
    }

    /// [`open`](Self::open) with the config file at its default location.
    pub fn open_default() -> Result<Self, StorageError> {
        Self::open(load_config(&default_config_path()))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Load, migrate and adopt the stored board, then open the gate.
    pub async fn hydrate(&mut self) -> HydrationOutcome {
        let outcome = match self.bridge.load().await {
            None => HydrationOutcome::Defaulted,
            Some(loaded) => {
                let from_version = loaded.version;
                match migrate::into_document(loaded) {
                    Ok(doc) => {
                        self.adopt(doc);
                        HydrationOutcome::Restored { from_version }
                    }
                    Err(e) => {
                        log::warn!(
                            target: "tabboard.store",
                            "Stored board (schema v{}) is unusable, keeping defaults: {}",
                            from_version,
                            e
                        );
                        HydrationOutcome::Failed
                    }
                }
            }
        };

        log::info!(
            target: "tabboard.store",
            "Hydration cycle {} finished: {:?}",
            self.gate.cycle(),
            outcome
        );
        if self.writer.is_none() {
            self.writer = Some(WriteQueue::spawn(self.bridge.clone(), self.events.clone()));
        }
        if std::mem::take(&mut self.unsaved_before_ready) {
            if outcome == HydrationOutcome::Defaulted {
                log::info!(target: "tabboard.store", "Saving changes made before hydration");
                self.persist();
            } else {
                log::warn!(
                    target: "tabboard.store",
                    "Changes made before hydration were not saved ({:?})",
                    outcome
                );
            }
        }
        self.gate.mark_ready();
        outcome
    }

    /// Re-run the load path from defaults, as a fresh start would.
    pub async fn reload(&mut self) -> HydrationOutcome {
        self.flush().await;
        self.gate.begin_cycle();
        let is_revealed = self.doc.is_revealed;
        self.doc = BoardDocument {
            is_revealed,
            ..BoardDocument::default()
        };
        self.hydrate().await
    }

    /// Delete all stored data and reload, which leaves the default board.
    pub async fn reset_all(&mut self) -> HydrationOutcome {
        self.flush().await;
        self.bridge.remove().await;
        log::info!(target: "tabboard.store", "Stored board removed");
        self.reload().await
    }

    /// Wait for every queued write to finish.
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    /// Persistence outcomes, including those of writes started after this call.
    pub fn subscribe_persist_events(&self) -> broadcast::Receiver<PersistEvent> {
        self.events.subscribe()
    }

    pub async fn usage(&self) -> Result<StorageUsage, StorageError> {
        self.bridge.usage().await
    }

    pub fn gate(&self) -> Arc<HydrationGate> {
        self.gate.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    pub fn document(&self) -> &BoardDocument {
        &self.doc
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.doc.tasks.get(task_id)
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.doc.columns.get(column_id)
    }

    /// Columns in display order, skipping ids with no column behind them.
    pub fn ordered_columns(&self) -> Vec<&Column> {
        self.doc
            .column_order
            .iter()
            .filter_map(|id| self.doc.columns.get(id))
            .collect()
    }

    /// Tasks of a column in order, skipping ids with no task behind them.
    pub fn column_tasks(&self, column_id: &str) -> Vec<&Task> {
        self.doc
            .columns
            .get(column_id)
            .map(|col| {
                col.task_ids
                    .iter()
                    .filter_map(|id| self.doc.tasks.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }


    // ── Task mutations ──────────────────────────────────────────────────────

    /// Create a task at the end of `column_id`. Returns the new task id.
    pub fn add_task(
        &mut self,
        column_id: &str,
        title: &str,
        description: Option<String>,
    ) -> Result<String, BoardError> {
        let column = self
            .doc
            .columns
            .get_mut(column_id)
            .ok_or_else(|| BoardError::ColumnNotFound(column_id.to_string()))?;

        let task = Task {
            id: fresh_id("task"),
            title: title.to_string(),
            description,
            created_at: Utc::now(),
        };
        let task_id = task.id.clone();
        column.task_ids.push(task_id.clone());
        self.doc.tasks.insert(task_id.clone(), task);

        self.persist();
        Ok(task_id)
    }

    /// Replace title and description. Unknown ids are ignored (`false`).
    pub fn update_task(&mut self, task_id: &str, title: &str, description: Option<String>) -> bool {
        let Some(task) = self.doc.tasks.get_mut(task_id) else {
            return false;
        };
        task.title = title.to_string();
        task.description = description;

        self.persist();
        true
    }

    /// Delete a task and unlink it from `column_id`. If the task is not listed
    /// there, it is unlinked from whichever column does list it.
    /// Returns whether anything was removed.
    pub fn delete_task(&mut self, task_id: &str, column_id: &str) -> bool {
        let existed = self.doc.tasks.remove(task_id).is_some();

        let listed_in_column = self
            .doc
            .columns
            .get_mut(column_id)
            .map(|col| remove_id(&mut col.task_ids, task_id))
            .unwrap_or(false);
        let mut unlinked = listed_in_column;
        if !listed_in_column {
            let owner = self.doc.owning_column(task_id).map(|col| col.id.clone());
            if let Some(col) = owner.and_then(|id| self.doc.columns.get_mut(&id)) {
                log::debug!(
                    target: "tabboard.store",
                    "Task {} was not in column {}, unlinking it from {}",
                    task_id,
                    column_id,
                    col.id
                );
                unlinked = remove_id(&mut col.task_ids, task_id);
            }
        }

        if !existed && !unlinked {
            return false;
        }
        self.persist();
        true
    }

    /// Move a task from `src_index` of one column to `dst_index` of another
    /// (or the same) column.
    ///
    /// Preconditions, checked before anything changes: both columns exist,
    /// the task exists and sits at `src_index`, and `dst_index` is at most
    /// the destination length after the removal.
    pub fn move_task(
        &mut self,
        task_id: &str,
        src_column_id: &str,
        dst_column_id: &str,
        src_index: usize,
        dst_index: usize,
    ) -> Result<(), BoardError> {
        if !self.doc.tasks.contains_key(task_id) {
            return Err(BoardError::TaskNotFound(task_id.to_string()));
        }
        let src = self
            .doc
            .columns
            .get(src_column_id)
            .ok_or_else(|| BoardError::ColumnNotFound(src_column_id.to_string()))?;
        let dst = self
            .doc
            .columns
            .get(dst_column_id)
            .ok_or_else(|| BoardError::ColumnNotFound(dst_column_id.to_string()))?;

        if src.task_ids.get(src_index).map(String::as_str) != Some(task_id) {
            return Err(BoardError::TaskNotAtIndex {
                task_id: task_id.to_string(),
                column_id: src_column_id.to_string(),
                index: src_index,
            });
        }
        let dst_len = if src_column_id == dst_column_id {
            dst.task_ids.len() - 1
        } else {
            dst.task_ids.len()
        };
        if dst_index > dst_len {
            return Err(BoardError::IndexOutOfRange {
                index: dst_index,
                max: dst_len,
            });
        }

        if let Some(src) = self.doc.columns.get_mut(src_column_id) {
            src.task_ids.remove(src_index);
        }
        if let Some(dst) = self.doc.columns.get_mut(dst_column_id) {
            dst.task_ids.insert(dst_index, task_id.to_string());
        }

        self.persist();
        Ok(())
    }

    // ── Column mutations ────────────────────────────────────────────────────

    /// Create an empty column, placed last but before `done`.
    pub fn add_column(&mut self, title: &str) -> String {
        let column_id = fresh_id("column");
        self.doc.columns.insert(
            column_id.clone(),
            Column {
                id: column_id.clone(),
                title: title.to_string(),
                task_ids: Vec::new(),
            },
        );
        self.doc.column_order.push(column_id.clone());
        self.enforce_column_invariants();

        self.persist();
        column_id
    }

    /// Rename a column. Unknown ids are ignored (`false`).
    pub fn update_column_title(&mut self, column_id: &str, title: &str) -> bool {
        let Some(column) = self.doc.columns.get_mut(column_id) else {
            return false;
        };
        column.title = title.to_string();

        self.persist();
        true
    }

    /// Delete a column together with every task it holds. The `done` column
    /// and unknown ids are refused (`false`).
    pub fn delete_column(&mut self, column_id: &str) -> bool {
        if column_id == DONE_COLUMN_ID {
            log::debug!(target: "tabboard.store", "Refusing to delete the done column");
            return false;
        }
        let Some(column) = self.doc.columns.remove(column_id) else {
            return false;
        };
        for task_id in &column.task_ids {
            self.doc.tasks.remove(task_id);
        }
        self.doc.column_order.retain(|id| id != column_id);
        self.enforce_column_invariants();

        self.persist();
        true
    }

    /// Move the column at `src_index` to `dst_index`. `done` is re-pinned
    /// last afterwards, overriding the requested position if needed.
    pub fn move_column(&mut self, src_index: usize, dst_index: usize) -> Result<(), BoardError> {
        let len = self.doc.column_order.len();
        let max = len.saturating_sub(1);
        for index in [src_index, dst_index] {
            if index >= len {
                return Err(BoardError::IndexOutOfRange { index, max });
            }
        }

        let column_id = self.doc.column_order.remove(src_index);
        self.doc.column_order.insert(dst_index, column_id);
        self.enforce_column_invariants();

        self.persist();
        Ok(())
    }

    // ── Bookmarks, theme, reveal ────────────────────────────────────────────

    /// Append a bookmark. The URL is stored as given.
    pub fn add_bookmark(&mut self, title: &str, url: &str) -> String {
        let bookmark = Bookmark {
            id: fresh_id("bookmark"),
            title: title.to_string(),
            url: url.to_string(),
        };
        let id = bookmark.id.clone();
        self.doc.bookmarks.push(bookmark);

        self.persist();
        id
    }

    /// Remove a bookmark. Unknown ids are ignored (`false`).
    pub fn remove_bookmark(&mut self, bookmark_id: &str) -> bool {
        let before = self.doc.bookmarks.len();
        self.doc.bookmarks.retain(|b| b.id != bookmark_id);
        if self.doc.bookmarks.len() == before {
            return false;
        }

        self.persist();
        true
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.doc.theme = theme;
        self.persist();
    }

    pub fn toggle_theme(&mut self) -> Theme {
        let theme = self.doc.theme.toggled();
        self.set_theme(theme);
        theme
    }

    /// Show or hide the board. Kept in memory only.
    pub fn set_revealed(&mut self, revealed: bool) {
        self.doc.is_revealed = revealed;
        self.persist();
    }

    pub fn toggle_revealed(&mut self) -> bool {
        let revealed = !self.doc.is_revealed;
        self.set_revealed(revealed);
        revealed
    }

    // ── Internals ───────────────────────────────────────────────────────────

    /// Take over a hydrated document. Memory-only state survives the merge.
    fn adopt(&mut self, mut doc: BoardDocument) {
        doc.is_revealed = self.doc.is_revealed;
        self.doc = doc;
        self.enforce_column_invariants();
    }

    /// Single place for column-order rules: no duplicate ids, and `done`
    /// (when the column exists) last.
    fn enforce_column_invariants(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.doc.column_order.retain(|id| seen.insert(id.clone()));

        if self.doc.columns.contains_key(DONE_COLUMN_ID) {
            let already_last =
                self.doc.column_order.last().map(String::as_str) == Some(DONE_COLUMN_ID);
            if !already_last {
                self.doc.column_order.retain(|id| id != DONE_COLUMN_ID);
                self.doc.column_order.push(DONE_COLUMN_ID.to_string());
            }
        }
    }

    /// Queue the current document for saving. Before the first hydration
    /// there is no writer yet; `hydrate` settles what happens to the change.
    fn persist(&mut self) {
        match &mut self.writer {
            Some(writer) => {
                writer.enqueue(&self.doc);
            }
            None => {
                log::debug!(
                    target: "tabboard.store",
                    "Mutation before hydration held until the board is loaded"
                );
                self.unsaved_before_ready = true;
            }
        }
    }
}

/// Remove every occurrence of `id`. Returns whether any was removed.
fn remove_id(ids: &mut Vec<String>, id: &str) -> bool {
    let before = ids.len();
    ids.retain(|existing| existing != id);
    ids.len() != before
}
