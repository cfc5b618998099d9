/// Hierarchy kernel: Grouping (Box / Unbox)
///
/// Box and unbox.
///
/// `box_entities` is all-or-nothing. Unboxing is atomic too: if any
/// child cannot go to its destination, nothing moves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityId, EntityType};
use crate::error::{HierarchyResult, ReferenceError, Rejection, StructuralRejection};
use crate::graph;
use crate::moves::validate_move;
use crate::registry;
use crate::store::EntityStore;

/// Where a boxed entity lived before it was boxed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub id: EntityId,
    pub parent: Option<EntityId>,
    pub index: usize,
}

/// Record of a box operation, sufficient to put every member back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxReceipt {
    pub box_id: EntityId,
    pub origins: Vec<Origin>,
}

/// Create a Box `box_id` under `parent` and move every member into it.
pub fn box_entities(
    store: &EntityStore,
    box_id: &EntityId,
    label: &str,
    barcode: &str,
    parent: Option<&EntityId>,
    members: &[EntityId],
) -> HierarchyResult<(EntityStore, BoxReceipt)> {
    if store.contains(box_id) {
        return Err(ReferenceError::DuplicateEntity(box_id.clone()).into());
    }

    let mut unique: Vec<&EntityId> = Vec::with_capacity(members.len());
    for member in members {
        if !unique.contains(&member) {
            unique.push(member);
        }
    }

    let mut origins = Vec::with_capacity(unique.len());
    for member in &unique {
        let entity = store.require(member)?;
        if !registry::can_be_child_of(entity.entity_type, Some(EntityType::Box)) {
            return Err(StructuralRejection::IncompatibleParent {
                id: (*member).clone(),
                child_type: entity.entity_type,
                parent_type: Some(EntityType::Box),
            }
            .into());
        }
        if let Some(pid) = parent {
            if pid == *member || graph::is_ancestor(store, member, pid) {
                return Err(StructuralRejection::Cycle {
                    id: (*member).clone(),
                    target: pid.clone(),
                }
                .into());
            }
        }
        origins.push(Origin {
            id: (*member).clone(),
            parent: entity.parent_id.clone(),
            index: store.index_in_parent(member).unwrap_or(0),
        });
    }

    let mut container = Entity::new(box_id.clone(), EntityType::Box, parent.cloned());
    container.label = label.to_string();
    container.barcode = barcode.to_string();

    // Validates id format, parent existence and Box placement.
    let mut next = store.with_entity_added(container, None)?;
    for member in &unique {
        next.detach(member)?;
        next.attach(member, Some(box_id), None)?;
    }

    Ok((
        next,
        BoxReceipt {
            box_id: box_id.clone(),
            origins,
        },
    ))
}

/// Move every child of `box_id` to `destination`, in box order.
/// Optionally delete the emptied box.
pub fn unbox(
    store: &EntityStore,
    box_id: &EntityId,
    destination: Option<&EntityId>,
    delete_box: bool,
) -> HierarchyResult<EntityStore> {
    unbox_with(store, box_id, &BTreeMap::new(), destination, delete_box)
}

/// Undo a box: each member named in `receipt` goes back to its
/// recorded parent and position; anything else goes to `fallback`.
pub fn unbox_to_origins(
    store: &EntityStore,
    receipt: &BoxReceipt,
    fallback: Option<&EntityId>,
    delete_box: bool,
) -> HierarchyResult<EntityStore> {
    let plan: BTreeMap<EntityId, (Option<EntityId>, Option<usize>)> = receipt
        .origins
        .iter()
        .map(|o| (o.id.clone(), (o.parent.clone(), Some(o.index))))
        .collect();
    unbox_with(store, &receipt.box_id, &plan, fallback, delete_box)
}

fn unbox_with(
    store: &EntityStore,
    box_id: &EntityId,
    plan: &BTreeMap<EntityId, (Option<EntityId>, Option<usize>)>,
    fallback: Option<&EntityId>,
    delete_box: bool,
) -> HierarchyResult<EntityStore> {
    let container = store.require(box_id)?;
    if container.entity_type != EntityType::Box {
        return Err(StructuralRejection::NotABox {
            id: box_id.clone(),
            entity_type: container.entity_type,
        }
        .into());
    }

    let mut placements: Vec<(EntityId, Option<EntityId>, Option<usize>)> = Vec::new();
    for child in &container.children {
        let (dest, index) = match plan.get(child) {
            Some((parent, index)) => (parent.clone(), *index),
            None => (fallback.cloned(), None),
        };
        if let Some(d) = &dest {
            if d == box_id || graph::is_ancestor(store, box_id, d) {
                return Err(StructuralRejection::Cycle {
                    id: child.clone(),
                    target: d.clone(),
                }
                .into());
            }
        }
        validate_move(store, child, dest.as_ref())?;
        placements.push((child.clone(), dest, index));
    }

    // Indexed placements ascending so recorded positions line up again;
    // unindexed ones keep box order after them.
    placements.sort_by_key(|(_, _, index)| index.map_or(usize::MAX, |i| i));

    let mut next = store.clone();
    for (child, _, _) in &placements {
        next.detach(child)?;
    }
    for (child, dest, index) in &placements {
        next.attach(child, dest.as_ref(), *index)?;
    }

    if delete_box {
        next = next.with_entities_removed(std::slice::from_ref(box_id))?;
    }
    Ok(next)
}

/// True if `err` is the unknown-box case, which callers treat as a no-op.
pub fn is_missing_box(err: &Rejection, box_id: &EntityId) -> bool {
    matches!(err, Rejection::Reference(ReferenceError::UnknownEntity(id)) if id == box_id)
}
