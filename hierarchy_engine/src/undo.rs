/// Hierarchy kernel: Undo
///
/// Single-level undo for moves.
///
/// Holds at most one pending inverse record. Undoing, or recording a
/// new move, discards whatever was there before.

use serde::{Deserialize, Serialize};

use crate::domain::EntityId;
use crate::moves::{batch_move, BatchReport, MoveRequest};
use crate::store::EntityStore;

/// Where an entity sat right before one applied move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: EntityId,
    pub previous_parent: Option<EntityId>,
    pub previous_index: Option<usize>,
}

impl UndoEntry {
    /// Position of `id` in `store`. `None` if `id` is unknown.
    pub fn capture(store: &EntityStore, id: &EntityId) -> Option<Self> {
        let entity = store.get(id)?;
        Some(Self {
            id: id.clone(),
            previous_parent: entity.parent_id.clone(),
            previous_index: store.index_in_parent(id),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct UndoEngine {
    pending: Option<Vec<UndoEntry>>,
}

impl UndoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entries` as the pending record, replacing any previous one.
    ///
    /// Entries are in application order, each captured against the store
    /// as it was right before that move (not before the whole commit), so
    /// replaying them newest first retraces every step exactly.
    pub fn record(&mut self, entries: Vec<UndoEntry>) {
        self.pending = (!entries.is_empty()).then_some(entries);
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn can_undo(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&[UndoEntry]> {
        self.pending.as_deref()
    }

    /// Replay the pending record as a batch move, newest entry first,
    /// and clear it. `None` when there is nothing to undo.
    pub fn undo(&mut self, store: &EntityStore) -> Option<(EntityStore, BatchReport)> {
        let entries = self.pending.take()?;
        let moves: Vec<MoveRequest> = entries
            .iter()
            .rev()
            .map(|e| MoveRequest {
                id: e.id.clone(),
                target: e.previous_parent.clone(),
                index: e.previous_index,
            })
            .collect();
        Some(batch_move(store, &moves))
    }
}
