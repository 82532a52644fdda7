use image::RgbaImage;
use std::collections::VecDeque;

use crate::canvas::LabelSurfaceManager;
use crate::error::EngineError;

// ============================================================================
// SNAPSHOT ENTRIES
// ============================================================================

/// Which surfaces an entry restores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryTarget {
    Label(usize),
    /// Every surface, index-aligned with the label list.
    AllLabels,
}

#[derive(Clone, Debug)]
pub enum SnapshotPayload {
    Single(RgbaImage),
    All(Vec<RgbaImage>),
}

/// Full-surface pixels captured before a stroke touched anything.
#[derive(Clone, Debug)]
pub struct UndoRedoEntry {
    target: EntryTarget,
    payload: SnapshotPayload,
}

impl UndoRedoEntry {
    pub fn single(index: usize, pixels: RgbaImage) -> Self {
        Self {
            target: EntryTarget::Label(index),
            payload: SnapshotPayload::Single(pixels),
        }
    }

    pub fn all(pixels: Vec<RgbaImage>) -> Self {
        Self {
            target: EntryTarget::AllLabels,
            payload: SnapshotPayload::All(pixels),
        }
    }

    /// Capture the surface at `index`, or `None` if it does not exist.
    pub fn capture(surfaces: &LabelSurfaceManager, index: usize) -> Option<Self> {
        surfaces.surface(index).map(|s| Self::single(index, s.clone()))
    }

    /// Capture every surface.
    pub fn capture_all(surfaces: &LabelSurfaceManager) -> Self {
        Self::all(surfaces.surfaces().to_vec())
    }

    pub fn target(&self) -> EntryTarget {
        self.target
    }

    /// Label index, with `-1` standing for all labels.
    pub fn label_index(&self) -> i64 {
        match self.target {
            EntryTarget::Label(i) => i as i64,
            EntryTarget::AllLabels => -1,
        }
    }

    pub fn payload(&self) -> &SnapshotPayload {
        &self.payload
    }

    /// Number of surface snapshots held.
    pub fn len(&self) -> usize {
        match &self.payload {
            SnapshotPayload::Single(_) => 1,
            SnapshotPayload::All(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_size(&self) -> usize {
        match &self.payload {
            SnapshotPayload::Single(img) => img.as_raw().len(),
            SnapshotPayload::All(v) => v.iter().map(|img| img.as_raw().len()).sum(),
        }
    }

    /// Exchange the stored pixels with the live surfaces. Afterwards the entry
    /// holds the state it replaced, so applying it again reverts the change.
    pub fn apply(&mut self, surfaces: &mut LabelSurfaceManager) -> Result<(), EngineError> {
        match (&self.target, &mut self.payload) {
            (EntryTarget::Label(index), SnapshotPayload::Single(pixels)) => {
                surfaces.swap_surface(*index, pixels)
            }
            (_, SnapshotPayload::All(all)) => {
                if all.len() != surfaces.len() {
                    log::warn!(
                        "all-label snapshot has {} surfaces, editor has {}; restoring the overlap",
                        all.len(),
                        surfaces.len()
                    );
                }
                for (index, pixels) in all.iter_mut().enumerate().take(surfaces.len()) {
                    surfaces.swap_surface(index, pixels)?;
                }
                Ok(())
            }
            (EntryTarget::AllLabels, SnapshotPayload::Single(_)) => {
                log::error!("all-label entry holds a single snapshot, ignoring");
                Ok(())
            }
        }
    }
}

// ============================================================================
// UNDO / REDO STACK
// ============================================================================

/// Linear snapshot history. Pushing always discards the redo side.
pub struct UndoRedoStack {
    undo_stack: VecDeque<UndoRedoEntry>,
    redo_stack: VecDeque<UndoRedoEntry>,
    max_entries: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for UndoRedoStack {
    fn default() -> Self {
        Self::new(50, Some(512 * 1024 * 1024))
    }
}

impl UndoRedoStack {
    pub fn new(max_entries: usize, max_memory_bytes: Option<usize>) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_entries: max_entries.max(1),
            max_memory_bytes,
            total_memory: 0,
        }
    }

    pub fn push(&mut self, entry: UndoRedoEntry) {
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }
        self.total_memory += entry.memory_size();
        self.undo_stack.push_back(entry);
        self.prune();
    }

    /// Move the newest undo entry to the redo side and hand it back for
    /// application.
    pub fn undo(&mut self) -> Option<&mut UndoRedoEntry> {
        let entry = self.undo_stack.pop_back()?;
        self.redo_stack.push_back(entry);
        self.redo_stack.back_mut()
    }

    pub fn redo(&mut self) -> Option<&mut UndoRedoEntry> {
        let entry = self.redo_stack.pop_back()?;
        self.undo_stack.push_back(entry);
        self.undo_stack.back_mut()
    }

    /// Drop all history, e.g. when a new image is loaded.
    pub fn empty(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn peek_undo(&self) -> Option<&UndoRedoEntry> {
        self.undo_stack.back()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_entries {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }
}
