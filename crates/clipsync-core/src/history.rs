//! Bounded, deduplicated history of recent clipboard entries.
//!
//! Invariants, after every operation:
//!
//! - entries are ordered most-recent-first;
//! - no two entries share the same `(content, kind)`;
//! - `len() <= capacity()`.
//!
//! Adding a value that is already present moves it to the front instead of
//! growing the history.  Adding past capacity evicts the oldest entry.

use std::collections::VecDeque;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clipboard::entry::ClipboardEntry;

/// History shared between the watcher and the application layer.
pub type SharedHistory = Arc<Mutex<HistoryStore>>;

/// Error type for history import/export.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to import history: {0}")]
    Import(#[source] serde_json::Error),
    #[error("failed to export history: {0}")]
    Export(#[source] serde_json::Error),
}

/// The history store.
#[derive(Debug)]
pub struct HistoryStore {
    entries: VecDeque<ClipboardEntry>,
    capacity: usize,
}

impl HistoryStore {
    /// Creates an empty store.  A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Wraps a new store for sharing across tasks.
    pub fn shared(capacity: usize) -> SharedHistory {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Inserts `entry` at the front and returns its newly assigned id.
    pub fn add(&mut self, mut entry: ClipboardEntry) -> Uuid {
        entry.id = Uuid::new_v4();
        let id = entry.id;

        if let Some(pos) = self.entries.iter().position(|e| e.same_content(&entry)) {
            self.entries.remove(pos);
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
        id
    }

    /// Snapshot of all entries, most recent first.
    pub fn get_all(&self) -> Vec<ClipboardEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<&ClipboardEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_latest(&self) -> Option<&ClipboardEntry> {
        self.entries.front()
    }

    /// Removes the entry with `id`, returning it if it existed.
    pub fn remove(&mut self, id: Uuid) -> Option<ClipboardEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(pos)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pretty-printed JSON array of all entries.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Export`] if serialization fails.
    pub fn export_json(&self) -> Result<String, HistoryError> {
        serde_json::to_string_pretty(&self.entries).map_err(HistoryError::Export)
    }

    /// Replaces the contents with a JSON array, keeping at most `capacity`
    /// entries from its front.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Import`] if the text is not a JSON array of
    /// entries.  The existing contents are left untouched in that case.
    pub fn import_json(&mut self, json: &str) -> Result<(), HistoryError> {
        let imported: Vec<ClipboardEntry> =
            serde_json::from_str(json).map_err(HistoryError::Import)?;
        self.entries = imported.into_iter().take(self.capacity).collect();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> ClipboardEntry {
        ClipboardEntry::text(content, "test-host")
    }

    #[test]
    fn test_add_inserts_at_front() {
        // Arrange
        let mut store = HistoryStore::new(10);

        // Act
        store.add(text("a"));
        store.add(text("b"));

        // Assert
        let all = store.get_all();
        assert_eq!(all[0].content, "b");
        assert_eq!(all[1].content, "a");
        assert_eq!(store.get_latest().unwrap().content, "b");
    }

    #[test]
    fn test_add_duplicate_moves_to_front_without_growing() {
        // Arrange
        let mut store = HistoryStore::new(10);
        store.add(text("a"));
        store.add(text("b"));
        store.add(text("c"));

        // Act
        store.add(text("a"));

        // Assert
        assert_eq!(store.len(), 3);
        let contents: Vec<_> = store.get_all().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_same_content_different_kind_is_not_duplicate() {
        let mut store = HistoryStore::new(10);
        store.add(text("[Image 1x1]"));
        store.add(ClipboardEntry::image_summary(1, 1, "h"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_add_past_capacity_evicts_exactly_the_oldest() {
        // Arrange
        let mut store = HistoryStore::new(3);
        for c in ["1", "2", "3"] {
            store.add(text(c));
        }

        // Act
        store.add(text("4"));

        // Assert
        assert_eq!(store.len(), 3);
        let contents: Vec<_> = store.get_all().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["4", "3", "2"]);
    }

    #[test]
    fn test_len_never_exceeds_capacity() {
        let mut store = HistoryStore::new(5);
        for i in 0..50 {
            store.add(text(&i.to_string()));
            assert!(store.len() <= store.capacity());
        }
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_add_assigns_unique_ids() {
        let mut store = HistoryStore::new(10);
        let entry = text("same");
        let id1 = store.add(entry.clone());
        let id2 = store.add(entry);
        assert_ne!(id1, id2);
        assert!(store.get_by_id(id1).is_none(), "replaced entry is gone");
        assert!(store.get_by_id(id2).is_some());
    }

    #[test]
    fn test_get_all_is_a_snapshot() {
        let mut store = HistoryStore::new(10);
        store.add(text("a"));
        let snapshot = store.get_all();
        store.clear();
        assert_eq!(snapshot.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_by_id() {
        let mut store = HistoryStore::new(10);
        let id = store.add(text("a"));
        store.add(text("b"));

        let removed = store.remove(id);

        assert_eq!(removed.unwrap().content, "a");
        assert_eq!(store.len(), 1);
        assert!(store.remove(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_get_latest_on_empty_store_is_none() {
        assert!(HistoryStore::new(10).get_latest().is_none());
    }

    #[test]
    fn test_export_then_import_keeps_order_and_truncates() {
        // Arrange
        let mut source = HistoryStore::new(10);
        for c in ["a", "b", "c", "d"] {
            source.add(text(c));
        }
        let json = source.export_json().unwrap();
        let mut target = HistoryStore::new(2);

        // Act
        target.import_json(&json).unwrap();

        // Assert
        let contents: Vec<_> = target.get_all().into_iter().map(|e| e.content).collect();
        assert_eq!(contents, vec!["d", "c"]);
    }

    #[test]
    fn test_import_invalid_json_leaves_store_untouched() {
        let mut store = HistoryStore::new(10);
        store.add(text("keep"));
        assert!(matches!(
            store.import_json("{not an array"),
            Err(HistoryError::Import(_))
        ));
        assert_eq!(store.len(), 1);
    }
}
