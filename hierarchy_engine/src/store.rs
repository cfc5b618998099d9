/// Hierarchy kernel: Entity Store
///
/// Flat id-keyed table plus the ordered root list.
///
/// Public transitions are pure: they clone, mutate the clone, and
/// return it, or fail without producing anything. The in-place
/// `detach`/`attach` primitives are crate-private building blocks for
/// the move and grouping engines.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityId};
use crate::error::{HierarchyResult, ReferenceError, Rejection, StructuralRejection};
use crate::graph;
use crate::registry;

/// Snapshot wire shape: `{ "entities": { id: Entity }, "roots": [id] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStore {
    #[serde(default)]
    entities: BTreeMap<EntityId, Entity>,
    #[serde(default)]
    roots: Vec<EntityId>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a store from raw parts. No checks; see `invariants`.
    pub fn from_parts(entities: BTreeMap<EntityId, Entity>, roots: Vec<EntityId>) -> Self {
        Self { entities, roots }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Like `get`, but an unknown id is a `ReferenceError`.
    pub fn require(&self, id: &EntityId) -> HierarchyResult<&Entity> {
        self.entities.get(id).ok_or_else(|| Rejection::unknown(id))
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    pub fn children(&self, id: &EntityId) -> Option<&[EntityId]> {
        self.entities.get(id).map(|e| e.children.as_slice())
    }

    /// The sibling list an entity under `parent` lives in.
    pub fn siblings(&self, parent: Option<&EntityId>) -> HierarchyResult<&[EntityId]> {
        match parent {
            Some(pid) => Ok(self.require(pid)?.children.as_slice()),
            None => Ok(&self.roots),
        }
    }

    pub fn parent_of(&self, id: &EntityId) -> HierarchyResult<Option<&EntityId>> {
        Ok(self.require(id)?.parent_id.as_ref())
    }

    /// Position of `id` inside its parent's children (or the root list).
    pub fn index_in_parent(&self, id: &EntityId) -> Option<usize> {
        let entity = self.entities.get(id)?;
        self.siblings(entity.parent_id.as_ref())
            .ok()?
            .iter()
            .position(|s| s == id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    /// Depth-first, pre-order walk over every tree, in root/child order.
    pub fn walk(&self) -> Vec<&Entity> {
        let mut out = Vec::with_capacity(self.entities.len());
        let mut stack: Vec<&EntityId> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if let Some(entity) = self.entities.get(id) {
                out.push(entity);
                stack.extend(entity.children.iter().rev());
            }
        }
        out
    }

    // ── Pure transitions ───────────────────────────────────────────

    /// Insert a new, childless entity under its `parent_id`.
    ///
    /// `index` positions it among its siblings when in range; otherwise
    /// it is appended.
    pub fn with_entity_added(&self, entity: Entity, index: Option<usize>) -> HierarchyResult<Self> {
        if !EntityId::is_well_formed(entity.id.as_str()) {
            return Err(ReferenceError::InvalidId(entity.id.to_string()).into());
        }
        if self.contains(&entity.id) {
            return Err(ReferenceError::DuplicateEntity(entity.id.clone()).into());
        }
        if !entity.children.is_empty() {
            return Err(StructuralRejection::NonEmptyInsert { id: entity.id.clone() }.into());
        }
        if !entity.payload_matches_type() {
            return Err(StructuralRejection::PayloadMismatch {
                id: entity.id.clone(),
                entity_type: entity.entity_type,
            }
            .into());
        }

        let parent_type = match &entity.parent_id {
            Some(pid) => Some(self.require(pid)?.entity_type),
            None => None,
        };
        if !registry::can_be_child_of(entity.entity_type, parent_type) {
            return Err(StructuralRejection::IncompatibleParent {
                id: entity.id.clone(),
                child_type: entity.entity_type,
                parent_type,
            }
            .into());
        }

        let id = entity.id.clone();
        let parent = entity.parent_id.clone();
        let mut next = self.clone();
        next.entities.insert(id.clone(), entity);
        next.attach(&id, parent.as_ref(), index)?;
        Ok(next)
    }

    /// Recursively delete each id together with its whole subtree.
    ///
    /// All ids must exist; if any is unknown nothing is removed.
    pub fn with_entities_removed(&self, ids: &[EntityId]) -> HierarchyResult<Self> {
        for id in ids {
            self.require(id)?;
        }
        let mut next = self.clone();
        for id in ids {
            // Already gone as part of an earlier id's subtree.
            if !next.contains(id) {
                continue;
            }
            next.detach(id)?;
            next.remove_subtree(id);
        }
        Ok(next)
    }

    /// Replace an entity's record in place, keeping its structure.
    ///
    /// `id`, `parent_id` and `children` come from the existing record;
    /// the type must not change.
    pub fn with_child_replaced(&self, entity: Entity) -> HierarchyResult<Self> {
        let current = self.require(&entity.id)?;
        if current.entity_type != entity.entity_type || !entity.payload_matches_type() {
            return Err(StructuralRejection::PayloadMismatch {
                id: entity.id.clone(),
                entity_type: current.entity_type,
            }
            .into());
        }
        let mut replacement = entity;
        replacement.parent_id = current.parent_id.clone();
        replacement.children = current.children.clone();

        let mut next = self.clone();
        next.entities.insert(replacement.id.clone(), replacement);
        Ok(next)
    }

    /// Drop duplicate ids from the root list and every children list.
    /// First occurrence wins.
    pub fn sanitized(mut self) -> Self {
        dedupe(&mut self.roots);
        for entity in self.entities.values_mut() {
            dedupe(&mut entity.children);
        }
        self
    }

    // ── In-place primitives (crate-private) ────────────────────────

    pub(crate) fn entity_mut(&mut self, id: &EntityId) -> HierarchyResult<&mut Entity> {
        self.entities.get_mut(id).ok_or_else(|| Rejection::unknown(id))
    }

    fn siblings_mut(&mut self, parent: Option<&EntityId>) -> HierarchyResult<&mut Vec<EntityId>> {
        match parent {
            Some(pid) => Ok(&mut self.entity_mut(pid)?.children),
            None => Ok(&mut self.roots),
        }
    }

    /// Unlink `id` from its parent's children (or the root list).
    pub(crate) fn detach(&mut self, id: &EntityId) -> HierarchyResult<()> {
        let parent = self.require(id)?.parent_id.clone();
        self.siblings_mut(parent.as_ref())?.retain(|c| c != id);
        self.entity_mut(id)?.parent_id = None;
        Ok(())
    }

    /// Link a detached `id` under `parent` at `index` (or append).
    pub(crate) fn attach(
        &mut self,
        id: &EntityId,
        parent: Option<&EntityId>,
        index: Option<usize>,
    ) -> HierarchyResult<()> {
        self.require(id)?;
        let list = self.siblings_mut(parent)?;
        match index {
            Some(i) if i <= list.len() => list.insert(i, id.clone()),
            _ => list.push(id.clone()),
        }
        self.entity_mut(id)?.parent_id = parent.cloned();
        Ok(())
    }

    /// Remove `id` and all descendants from the table. Does not touch
    /// the parent's children list; `detach` first.
    pub(crate) fn remove_subtree(&mut self, id: &EntityId) -> Vec<EntityId> {
        let doomed = graph::subtree_ids(self, id);
        for d in &doomed {
            self.entities.remove(d);
        }
        doomed
    }
}

fn dedupe(ids: &mut Vec<EntityId>) {
    let mut seen = BTreeSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}
