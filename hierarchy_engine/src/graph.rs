/// Hierarchy kernel: Graph Utilities
///
/// Pure walks over parent/child links. Every upward walk is bounded by
/// the store size so a corrupted (cyclic) snapshot cannot loop forever.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::EntityId;
use crate::store::EntityStore;

// ---------------------------------------------------------------------------
// Upward walks
// ---------------------------------------------------------------------------

/// Ancestors of `id`, closest first. Excludes `id` itself.
pub fn ancestors(store: &EntityStore, id: &EntityId) -> Vec<EntityId> {
    let mut chain = Vec::new();
    let mut current = store.get(id).and_then(|e| e.parent_id.clone());
    while let Some(pid) = current {
        if chain.len() > store.len() || pid == *id {
            break;
        }
        current = store.get(&pid).and_then(|e| e.parent_id.clone());
        chain.push(pid);
    }
    chain
}

/// True if `ancestor` appears on the parent chain of `of`.
/// O(depth) walk upward from `of`.
pub fn is_ancestor(store: &EntityStore, ancestor: &EntityId, of: &EntityId) -> bool {
    let mut current = store.get(of).and_then(|e| e.parent_id.as_ref());
    let mut steps = 0usize;
    while let Some(pid) = current {
        if pid == ancestor {
            return true;
        }
        steps += 1;
        if steps > store.len() {
            return false;
        }
        current = store.get(pid).and_then(|e| e.parent_id.as_ref());
    }
    false
}

// ---------------------------------------------------------------------------
// Downward walks
// ---------------------------------------------------------------------------

/// `id` and every descendant, pre-order. Empty if `id` is unknown.
pub fn subtree_ids(store: &EntityStore, id: &EntityId) -> Vec<EntityId> {
    let mut out = Vec::new();
    let mut seen: BTreeSet<&EntityId> = BTreeSet::new();
    let mut stack: Vec<&EntityId> = Vec::new();
    if let Some(entity) = store.get(id) {
        stack.push(&entity.id);
    }
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(entity) = store.get(current) {
            out.push(entity.id.clone());
            stack.extend(entity.children.iter().rev());
        }
    }
    out
}

/// Length of the longest root-to-leaf path, in entities.
pub fn depth(store: &EntityStore) -> usize {
    store
        .roots()
        .iter()
        .map(|root| subtree_depth(store, root, 0))
        .max()
        .unwrap_or(0)
}

fn subtree_depth(store: &EntityStore, id: &EntityId, guard: usize) -> usize {
    if guard > store.len() {
        return 0;
    }
    match store.get(id) {
        Some(entity) => {
            1 + entity
                .children
                .iter()
                .map(|c| subtree_depth(store, c, guard + 1))
                .max()
                .unwrap_or(0)
        }
        None => 0,
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Cycles in the parent-pointer graph. Each cycle is listed starting
/// from its smallest id. Sorted traversal for determinism.
pub fn detect_parent_cycles(store: &EntityStore) -> Vec<Vec<EntityId>> {
    const WHITE: u8 = 0;
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    let mut colour: BTreeMap<&EntityId, u8> = store.ids().map(|id| (id, WHITE)).collect();
    let mut cycles = Vec::new();

    let ids: Vec<&EntityId> = store.ids().collect();
    for start in ids {
        if colour.get(start).copied() != Some(WHITE) {
            continue;
        }

        // Follow parent pointers until we hit a root, a finished node,
        // or a node on the current path.
        let mut path: Vec<&EntityId> = Vec::new();
        let mut current = Some(start);
        while let Some(node) = current {
            match colour.get(node).copied() {
                Some(WHITE) => {
                    colour.insert(node, GREY);
                    path.push(node);
                    current = store.get(node).and_then(|e| e.parent_id.as_ref());
                }
                Some(GREY) => {
                    if let Some(pos) = path.iter().position(|p| *p == node) {
                        let mut cycle: Vec<EntityId> =
                            path[pos..].iter().map(|id| (*id).clone()).collect();
                        if let Some(min_pos) = cycle
                            .iter()
                            .enumerate()
                            .min_by(|a, b| a.1.cmp(b.1))
                            .map(|(i, _)| i)
                        {
                            cycle.rotate_left(min_pos);
                        }
                        cycles.push(cycle);
                    }
                    break;
                }
                // Finished, or a dangling parent reference.
                _ => break,
            }
        }

        for node in path {
            colour.insert(node, BLACK);
        }
    }

    cycles
}
