/// Hierarchy kernel: Move Engine
///
/// Single moves, sibling reorders and batch moves.
///
/// Every function computes a new store; the input store is never
/// touched, and a rejected move never partially applies.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::EntityId;
use crate::error::{HierarchyResult, Rejection, StructuralRejection};
use crate::graph;
use crate::registry;
use crate::store::EntityStore;
use crate::undo::UndoEntry;

/// One entry of a batch move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub id: EntityId,
    #[serde(default)]
    pub target: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl MoveRequest {
    pub fn new(id: impl Into<EntityId>, target: Option<EntityId>) -> Self {
        Self {
            id: id.into(),
            target,
            index: None,
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

/// Where a dragged entity lands relative to the sibling it is dropped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPosition {
    /// Upper half of the drop target.
    Before,
    /// Lower half of the drop target.
    After,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedMove {
    pub id: EntityId,
    pub rejection: Rejection,
}

/// Outcome of a batch move. Per-entry failures do not abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub applied: Vec<EntityId>,
    pub skipped: Vec<SkippedMove>,
    /// Where each applied entry sat right before it moved, in
    /// application order.
    pub origins: Vec<UndoEntry>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.applied.is_empty() && !self.skipped.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `id` may be moved under `target` (`None` = root).
///
/// Rejects self-parenting, moves into the entity's own subtree, and
/// type combinations the registry forbids.
pub fn validate_move(
    store: &EntityStore,
    id: &EntityId,
    target: Option<&EntityId>,
) -> HierarchyResult<()> {
    let entity = store.require(id)?;

    let parent_type = match target {
        None => None,
        Some(tid) => {
            if tid == id {
                return Err(StructuralRejection::SelfParent { id: id.clone() }.into());
            }
            let target_entity = store.require(tid)?;
            if graph::is_ancestor(store, id, tid) {
                return Err(StructuralRejection::Cycle {
                    id: id.clone(),
                    target: tid.clone(),
                }
                .into());
            }
            Some(target_entity.entity_type)
        }
    };

    if !registry::can_be_child_of(entity.entity_type, parent_type) {
        return Err(StructuralRejection::IncompatibleParent {
            id: id.clone(),
            child_type: entity.entity_type,
            parent_type,
        }
        .into());
    }
    Ok(())
}

pub fn is_valid_move(store: &EntityStore, id: &EntityId, target: Option<&EntityId>) -> bool {
    validate_move(store, id, target).is_ok()
}

// ---------------------------------------------------------------------------
// Single move
// ---------------------------------------------------------------------------

/// Move `id` under `target` at `index` (appended when absent or out of
/// range). Returns the new store; the input is left as it was.
pub fn move_entity(
    store: &EntityStore,
    id: &EntityId,
    target: Option<&EntityId>,
    index: Option<usize>,
) -> HierarchyResult<EntityStore> {
    let mut next = store.clone();
    move_in_place(&mut next, id, target, index)?;
    Ok(next)
}

/// Validate, then detach + attach. Validation guarantees both steps
/// succeed, so the working store is never left half-moved.
pub(crate) fn move_in_place(
    store: &mut EntityStore,
    id: &EntityId,
    target: Option<&EntityId>,
    index: Option<usize>,
) -> HierarchyResult<()> {
    validate_move(store, id, target)?;
    store.detach(id)?;
    store.attach(id, target, index)
}

// ---------------------------------------------------------------------------
// Sibling reorder
// ---------------------------------------------------------------------------

/// Insertion index for dropping `moved` before/after `anchor` within
/// `siblings`, expressed in the list as it looks after `moved` has been
/// removed. `None` if `anchor` is not in `siblings`.
pub fn drop_index(
    siblings: &[EntityId],
    moved: &EntityId,
    anchor: &EntityId,
    position: DropPosition,
) -> Option<usize> {
    let target_index = siblings.iter().position(|s| s == anchor)?;
    let mut desired = match position {
        DropPosition::Before => target_index,
        DropPosition::After => target_index + 1,
    };
    if let Some(original) = siblings.iter().position(|s| s == moved) {
        if original < target_index {
            desired -= 1;
        }
    }
    Some(desired)
}

/// Drop `id` before/after `anchor`, adopting `anchor`'s parent.
/// Dropping an entity relative to itself is a no-op.
pub fn reorder(
    store: &EntityStore,
    id: &EntityId,
    anchor: &EntityId,
    position: DropPosition,
) -> HierarchyResult<EntityStore> {
    store.require(id)?;
    let anchor_entity = store.require(anchor)?;
    if id == anchor {
        return Ok(store.clone());
    }

    let parent = anchor_entity.parent_id.clone();
    let siblings = store.siblings(parent.as_ref())?;
    let index =
        drop_index(siblings, id, anchor, position).ok_or_else(|| Rejection::unknown(anchor))?;
    move_entity(store, id, parent.as_ref(), Some(index))
}

// ---------------------------------------------------------------------------
// Batch move
// ---------------------------------------------------------------------------

/// Apply each request against the progressively updated store.
/// Failing entries are skipped and reported; the rest still apply.
pub fn batch_move(store: &EntityStore, moves: &[MoveRequest]) -> (EntityStore, BatchReport) {
    batch_move_with(store, moves, |_, _| Ok(()))
}

/// `batch_move` with an extra per-entry `gate`, consulted against the
/// current working store before each entry is applied.
pub fn batch_move_with<G>(
    store: &EntityStore,
    moves: &[MoveRequest],
    mut gate: G,
) -> (EntityStore, BatchReport)
where
    G: FnMut(&EntityStore, &MoveRequest) -> HierarchyResult<()>,
{
    let mut next = store.clone();
    let mut report = BatchReport::default();

    for request in moves {
        let origin = UndoEntry::capture(&next, &request.id);
        let outcome = gate(&next, request).and_then(|()| {
            move_in_place(&mut next, &request.id, request.target.as_ref(), request.index)
        });
        match outcome {
            Ok(()) => {
                report.applied.push(request.id.clone());
                report.origins.extend(origin);
            }
            Err(rejection) => {
                warn!(id = %request.id, %rejection, "skipping batch move entry");
                report.skipped.push(SkippedMove {
                    id: request.id.clone(),
                    rejection,
                });
            }
        }
    }

    (next, report)
}
