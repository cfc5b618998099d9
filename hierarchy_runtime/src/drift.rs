//! Drift detection: determinism verification and store comparison.

use std::collections::BTreeSet;

use serde::Serialize;

use hierarchy_engine::domain::EntityId;
use hierarchy_engine::engine::HierarchyEngine;
use hierarchy_engine::hashing::canonical_hash;
use hierarchy_engine::mutations::Mutation;
use hierarchy_engine::store::EntityStore;

/// Apply `mutations` to two fresh engines and compare the resulting
/// hashes. Returns the hash when both runs agree.
pub fn verify_determinism(mutations: &[Mutation]) -> Option<String> {
    let run = || {
        let mut engine = HierarchyEngine::new();
        for m in mutations {
            engine.apply(m);
        }
        engine.state_hash()
    };
    let first = run();
    let second = run();
    (first == second).then_some(first)
}

/// What changed between two stores, by entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub hash_a: String,
    pub hash_b: String,
    /// Present only in `b`.
    pub added: Vec<EntityId>,
    /// Present only in `a`.
    pub removed: Vec<EntityId>,
    /// Present in both under a different parent.
    pub reparented: Vec<EntityId>,
    /// Present in both with different fields other than the parent.
    pub updated: Vec<EntityId>,
    /// Root list differs in content or order.
    pub roots_changed: bool,
}

impl DriftReport {
    pub fn is_identical(&self) -> bool {
        self.hash_a == self.hash_b
    }

    pub fn changed_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.reparented.len() + self.updated.len()
    }
}

/// Structured comparison of `a` (before) against `b` (after).
pub fn compare_stores(a: &EntityStore, b: &EntityStore) -> DriftReport {
    let ids_a: BTreeSet<&EntityId> = a.ids().collect();
    let ids_b: BTreeSet<&EntityId> = b.ids().collect();

    let added: Vec<EntityId> = ids_b.difference(&ids_a).map(|id| (*id).clone()).collect();
    let removed: Vec<EntityId> = ids_a.difference(&ids_b).map(|id| (*id).clone()).collect();

    let mut reparented = Vec::new();
    let mut updated = Vec::new();
    for id in ids_a.intersection(&ids_b) {
        let (Some(ea), Some(eb)) = (a.get(id), b.get(id)) else {
            continue;
        };
        if ea.parent_id != eb.parent_id {
            reparented.push((*id).clone());
        } else if ea != eb {
            updated.push((*id).clone());
        }
    }

    DriftReport {
        hash_a: canonical_hash(a),
        hash_b: canonical_hash(b),
        added,
        removed,
        reparented,
        updated,
        roots_changed: a.roots() != b.roots(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hierarchy_engine::domain::{Entity, EntityType};
    use hierarchy_engine::moves::move_entity;

    fn base() -> EntityStore {
        let s = EntityStore::new()
            .with_entity_added(Entity::new("d1".into(), EntityType::Department, None), None)
            .unwrap();
        let s = s
            .with_entity_added(Entity::new("d2".into(), EntityType::Department, None), None)
            .unwrap();
        s.with_entity_added(Entity::new("ws".into(), EntityType::Workstation, Some("d1".into())), None)
            .unwrap()
    }

    #[test]
    fn test_identical_stores() {
        let report = compare_stores(&base(), &base());
        assert!(report.is_identical());
        assert_eq!(report.changed_count(), 0);
        assert!(!report.roots_changed);
    }

    #[test]
    fn test_detects_each_kind_of_change() {
        let a = base();
        let b = move_entity(&a, &"ws".into(), Some(&"d2".into()), None).unwrap();
        let mut d1 = b.get(&"d1".into()).unwrap().clone();
        d1.label = "Receiving".to_string();
        let b = b.with_child_replaced(d1).unwrap();
        let b = b
            .with_entity_added(Entity::new("w".into(), EntityType::Warehouse, None), None)
            .unwrap();

        let report = compare_stores(&a, &b);
        assert!(!report.is_identical());
        assert_eq!(report.added, vec![EntityId::from("w")]);
        assert!(report.removed.is_empty());
        assert_eq!(report.reparented, vec![EntityId::from("ws")]);
        // d1 lost a child and got relabelled; d2 gained a child.
        assert_eq!(report.updated, vec![EntityId::from("d1"), EntityId::from("d2")]);
        assert!(report.roots_changed);

        let back = compare_stores(&b, &a);
        assert_eq!(back.removed, vec![EntityId::from("w")]);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mutations = vec![
            Mutation::Add {
                entity: Entity::new("wh".into(), EntityType::Warehouse, None),
                index: None,
            },
            Mutation::Delete { id: "missing".into() },
        ];
        let hash = verify_determinism(&mutations).unwrap();
        assert_eq!(hash.len(), 64);
    }
}
