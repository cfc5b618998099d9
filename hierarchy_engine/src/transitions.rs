/// Hierarchy kernel: Centralized Transition Logic
///
/// ALL store-mutation dispatch lives here. The input store is never
/// mutated; on rejection the returned store is an unchanged copy.

use tracing::debug;

use crate::domain::{create_entity, EntityId, EntityType};
use crate::error::{HierarchyResult, StructuralRejection};
use crate::graph;
use crate::grouping;
use crate::moves::{self, MoveRequest};
use crate::mutations::{Mutation, MutationResult};
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// Public dispatcher
// ---------------------------------------------------------------------------

/// Apply `mutation` to `store` and return `(new_store, result)`.
pub fn apply_mutation(store: &EntityStore, mutation: &Mutation) -> (EntityStore, MutationResult) {
    let op = mutation.name();

    let outcome = match mutation {
        Mutation::Create {
            entity_type,
            parent,
            index,
            label,
        } => apply_create(store, *entity_type, parent.as_ref(), *index, label.as_deref()),
        Mutation::Add { entity, index } => {
            let id = entity.id.clone();
            store.with_entity_added(entity.clone(), *index).map(|next| {
                let mut result = MutationResult::applied(op);
                result.created = Some(id);
                (next, result)
            })
        }
        Mutation::Move { id, target, index } => {
            moves::move_entity(store, id, target.as_ref(), *index)
                .map(|next| (next, MutationResult::applied(op)))
        }
        Mutation::Reorder {
            id,
            anchor,
            position,
        } => moves::reorder(store, id, anchor, *position)
            .map(|next| (next, MutationResult::applied(op))),
        Mutation::BatchMove { moves } => {
            return apply_batch_move_with(store, moves, |_, _| Ok(()));
        }
        Mutation::Delete { id } => apply_delete(store, op, std::slice::from_ref(id)),
        Mutation::DeleteMany { ids } => apply_delete(store, op, ids),
        Mutation::Box {
            box_id,
            label,
            barcode,
            parent,
            members,
        } => {
            let box_id = box_id.clone().unwrap_or_else(EntityId::generate);
            grouping::box_entities(store, &box_id, label, barcode, parent.as_ref(), members).map(
                |(next, receipt)| {
                    let mut result = MutationResult::applied(op);
                    result.created = Some(box_id.clone());
                    result.receipt = Some(receipt);
                    (next, result)
                },
            )
        }
        Mutation::Unbox {
            box_id,
            destination,
            delete_box,
        } => grouping::unbox(store, box_id, destination.as_ref(), *delete_box).map(|next| {
            let mut result = MutationResult::applied(op);
            if *delete_box {
                result.removed.push(box_id.clone());
            }
            (next, result)
        }),
        Mutation::UpdateAttributes { id, patch } => store.require(id).cloned().and_then(|mut entity| {
            patch.apply_to(&mut entity)?;
            let next = store.with_child_replaced(entity)?;
            Ok((next, MutationResult::applied(op)))
        }),
        Mutation::AssignQueue { device_ids, queue } => {
            apply_assign_queue(store, device_ids, queue.as_deref())
                .map(|next| (next, MutationResult::applied(op)))
        }
    };

    match outcome {
        Ok((next, result)) => {
            debug!(op, entities = next.len(), "mutation applied");
            (next, result)
        }
        Err(rejection) => {
            debug!(op, %rejection, "mutation rejected");
            (store.clone(), MutationResult::rejected(op, rejection))
        }
    }
}

/// Batch move with a per-entry gate. The result counts as applied when
/// at least one entry went through.
pub fn apply_batch_move_with<G>(
    store: &EntityStore,
    requests: &[MoveRequest],
    gate: G,
) -> (EntityStore, MutationResult)
where
    G: FnMut(&EntityStore, &MoveRequest) -> HierarchyResult<()>,
{
    let (next, report) = moves::batch_move_with(store, requests, gate);
    debug!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        "batch move"
    );
    let result = MutationResult {
        op: "batch_move".to_string(),
        applied: !report.applied.is_empty(),
        batch: Some(report),
        ..Default::default()
    };
    (next, result)
}

// ---------------------------------------------------------------------------
// Individual transition handlers (private)
// ---------------------------------------------------------------------------

fn apply_create(
    store: &EntityStore,
    entity_type: EntityType,
    parent: Option<&EntityId>,
    index: Option<usize>,
    label: Option<&str>,
) -> HierarchyResult<(EntityStore, MutationResult)> {
    let mut entity = create_entity(entity_type, parent.cloned());
    if let Some(label) = label {
        entity.label = label.to_string();
    }
    let id = entity.id.clone();
    let next = store.with_entity_added(entity, index)?;

    let mut result = MutationResult::applied("create");
    result.created = Some(id);
    Ok((next, result))
}

fn apply_delete(
    store: &EntityStore,
    op: &str,
    ids: &[EntityId],
) -> HierarchyResult<(EntityStore, MutationResult)> {
    let next = store.with_entities_removed(ids)?;

    let mut removed: Vec<EntityId> = Vec::new();
    for id in ids {
        for doomed in graph::subtree_ids(store, id) {
            if !removed.contains(&doomed) {
                removed.push(doomed);
            }
        }
    }

    let mut result = MutationResult::applied(op);
    result.removed = removed;
    Ok((next, result))
}

/// All-or-nothing: every id must be a device.
fn apply_assign_queue(
    store: &EntityStore,
    device_ids: &[EntityId],
    queue: Option<&str>,
) -> HierarchyResult<EntityStore> {
    for id in device_ids {
        let entity = store.require(id)?;
        if entity.entity_type != EntityType::Device {
            return Err(StructuralRejection::PayloadMismatch {
                id: id.clone(),
                entity_type: entity.entity_type,
            }
            .into());
        }
    }

    let mut next = store.clone();
    for id in device_ids {
        if let Some(attrs) = next.entity_mut(id)?.device_attributes.as_mut() {
            attrs.queue = queue.map(str::to_string);
        }
    }
    Ok(next)
}
