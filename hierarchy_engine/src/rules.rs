/// Hierarchy kernel: Department Rules
///
/// Department rule validation.
///
/// Advisory: nothing here blocks the move engine. `HierarchyEngine`
/// consults `preflight` / `gate_move` before committing when rule
/// enforcement is on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityId, EntityType};
use crate::error::{HierarchyResult, Rejection};
use crate::graph;
use crate::moves::MoveRequest;
use crate::mutations::Mutation;
use crate::store::EntityStore;

/// Allow/deny verdict for moving a set of devices to a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub allowed: bool,
    pub blocking_department: Option<EntityId>,
    pub violated_rules: Vec<String>,
    pub failed_device_ids: Vec<EntityId>,
}

impl RuleVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            blocking_department: None,
            violated_rules: Vec::new(),
            failed_device_ids: Vec::new(),
        }
    }
}

impl fmt::Display for RuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.blocking_department {
            Some(dept) => write!(
                f,
                "department {} rejects {} device(s): {}",
                dept,
                self.failed_device_ids.len(),
                self.violated_rules.join(", ")
            ),
            None => f.write_str("allowed"),
        }
    }
}

/// Departments governing `target`, closest first. Includes `target`
/// itself when it is a Department.
pub fn department_chain<'a>(store: &'a EntityStore, target: Option<&EntityId>) -> Vec<&'a Entity> {
    let Some(target) = target else {
        return Vec::new();
    };
    let Some(target_entity) = store.get(target) else {
        return Vec::new();
    };

    std::iter::once(target_entity)
        .chain(
            graph::ancestors(store, target)
                .iter()
                .filter_map(|id| store.get(id)),
        )
        .filter(|e| e.entity_type == EntityType::Department)
        .collect()
}

/// Evaluate `device_ids` against the rules of the departments above
/// `target`. The closest department with at least one violation blocks;
/// farther departments are not consulted past it. Ids that are unknown
/// or not devices are ignored.
pub fn validate_device_move(
    store: &EntityStore,
    device_ids: &[EntityId],
    target: Option<&EntityId>,
) -> RuleVerdict {
    let chain = department_chain(store, target);
    if chain.is_empty() {
        return RuleVerdict::allow();
    }

    let devices: Vec<&Entity> = device_ids
        .iter()
        .filter_map(|id| store.get(id))
        .filter(|e| e.entity_type == EntityType::Device)
        .collect();

    for department in chain {
        let Some(rules) = department.department_rules.as_ref() else {
            continue;
        };
        if rules.is_unrestricted() {
            continue;
        }

        let mut violated_rules: Vec<String> = Vec::new();
        let mut failed_device_ids: Vec<EntityId> = Vec::new();
        for device in &devices {
            let Some(attrs) = device.device_attributes.as_ref() else {
                continue;
            };
            let names = rules.describe_violations(attrs);
            if names.is_empty() {
                continue;
            }
            for name in names {
                if !violated_rules.iter().any(|r| r == name) {
                    violated_rules.push(name.to_string());
                }
            }
            if !failed_device_ids.contains(&device.id) {
                failed_device_ids.push(device.id.clone());
            }
        }

        if !failed_device_ids.is_empty() {
            return RuleVerdict {
                allowed: false,
                blocking_department: Some(department.id.clone()),
                violated_rules,
                failed_device_ids,
            };
        }
    }

    RuleVerdict::allow()
}

/// Every Device among `ids` or inside their subtrees, first-seen order.
pub fn collect_devices(store: &EntityStore, ids: &[EntityId]) -> Vec<EntityId> {
    let mut out: Vec<EntityId> = Vec::new();
    for id in ids {
        for member in graph::subtree_ids(store, id) {
            let is_device = store
                .get(&member)
                .is_some_and(|e| e.entity_type == EntityType::Device);
            if is_device && !out.contains(&member) {
                out.push(member);
            }
        }
    }
    out
}

fn blocking(store: &EntityStore, moved: &[EntityId], target: Option<&EntityId>) -> Option<RuleVerdict> {
    let devices = collect_devices(store, moved);
    if devices.is_empty() {
        return None;
    }
    let verdict = validate_device_move(store, &devices, target);
    (!verdict.allowed).then_some(verdict)
}

/// The blocking verdict `mutation` would run into, if any.
///
/// Covers every mutation that relocates existing devices: moves,
/// reorders, boxing into a parent, unboxing into a destination. Batch
/// moves are gated per entry through `gate_move` instead.
pub fn preflight(store: &EntityStore, mutation: &Mutation) -> Option<RuleVerdict> {
    match mutation {
        Mutation::Move { id, target, .. } => {
            blocking(store, std::slice::from_ref(id), target.as_ref())
        }
        Mutation::Reorder { id, anchor, .. } => {
            let parent = store.get(anchor).and_then(|a| a.parent_id.clone());
            blocking(store, std::slice::from_ref(id), parent.as_ref())
        }
        Mutation::Box {
            parent, members, ..
        } => blocking(store, members, parent.as_ref()),
        Mutation::Unbox {
            box_id,
            destination,
            ..
        } => {
            let contents = store.children(box_id)?.to_vec();
            blocking(store, &contents, destination.as_ref())
        }
        _ => None,
    }
}

/// Per-entry gate for batch moves: a blocked entry becomes a
/// `RuleViolation` rejection.
pub fn gate_move(store: &EntityStore, request: &MoveRequest) -> HierarchyResult<()> {
    match blocking(store, std::slice::from_ref(&request.id), request.target.as_ref()) {
        Some(verdict) => Err(Rejection::RuleViolation(verdict)),
        None => Ok(()),
    }
}
