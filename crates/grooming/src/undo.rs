//! Bounded undo arena of sparse change records.
//!
//! Entries below the cursor can be undone, entries at or above it redone.
//! Undo and redo move a record into [`SegmentsStorage::replace`] and store
//! whatever it displaced in the same slot, so nothing is copied.

use tracing::debug;

use crate::error::GroomResult;
use crate::storage::{PartialStorage, SegmentsStorage};

#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: Vec<PartialStorage>,
    cursor: usize,
    depth: usize,
}

impl UndoStack {
    pub fn new(depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            depth: depth.max(1),
        }
    }

    /// Record a new edit. Discards the redo tail and, past the depth limit,
    /// the oldest entry.
    pub fn push(&mut self, entry: PartialStorage) {
        if entry.is_empty() {
            return;
        }
        self.entries.truncate(self.cursor);
        self.entries.push(entry);
        if self.entries.len() > self.depth {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len();
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Number of edits that can be undone.
    pub fn undo_count(&self) -> usize {
        self.cursor
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Revert the latest edit. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self, storage: &mut SegmentsStorage) -> GroomResult<bool> {
        if !self.can_undo() {
            debug!("Undo: no entries available");
            return Ok(false);
        }
        self.swap(self.cursor - 1, storage)?;
        self.cursor -= 1;
        Ok(true)
    }

    /// Re-apply the latest undone edit. Returns `false` when there is nothing
    /// to redo.
    pub fn redo(&mut self, storage: &mut SegmentsStorage) -> GroomResult<bool> {
        if !self.can_redo() {
            debug!("Redo: no entries available");
            return Ok(false);
        }
        self.swap(self.cursor, storage)?;
        self.cursor += 1;
        Ok(true)
    }

    fn swap(&mut self, slot: usize, storage: &mut SegmentsStorage) -> GroomResult<()> {
        storage.check_partial(&self.entries[slot])?;
        let entry = std::mem::take(&mut self.entries[slot]);
        debug!("Swapping {} guides through undo slot {slot}", entry.len());
        self.entries[slot] = storage.replace(entry)?;
        Ok(())
    }
}
