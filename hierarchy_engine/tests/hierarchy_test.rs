//! End-to-end behaviour of the move, rule, grouping and undo engines.

use rstest::rstest;

use hierarchy_engine::domain::{DepartmentRules, Entity, EntityId, EntityType, RuleCondition};
use hierarchy_engine::error::{Rejection, StructuralRejection};
use hierarchy_engine::grouping::{box_entities, unbox_to_origins};
use hierarchy_engine::moves::{batch_move, move_entity, reorder, validate_move, DropPosition, MoveRequest};
use hierarchy_engine::rules::validate_device_move;
use hierarchy_engine::store::EntityStore;
use hierarchy_engine::{HierarchyEngine, Mutation};

fn add(store: EntityStore, id: &str, t: EntityType, parent: Option<&str>) -> EntityStore {
    store
        .with_entity_added(Entity::new(id.into(), t, parent.map(EntityId::from)), None)
        .unwrap()
}

fn ids(raw: &[&str]) -> Vec<EntityId> {
    raw.iter().map(|s| EntityId::from(*s)).collect()
}

/// dept > rack > bin > {d1, d2}, plus a second department.
fn floor() -> EntityStore {
    let s = add(EntityStore::new(), "dept", EntityType::Department, None);
    let s = add(s, "rack", EntityType::StaticRack, Some("dept"));
    let s = add(s, "bin", EntityType::Bin, Some("rack"));
    let s = add(s, "d1", EntityType::Device, Some("bin"));
    let s = add(s, "d2", EntityType::Device, Some("bin"));
    add(s, "dept2", EntityType::Department, None)
}

#[test]
fn move_into_own_subtree_is_a_cycle() {
    let s = floor();
    let err = validate_move(&s, &"dept".into(), Some(&"bin".into())).unwrap_err();
    assert!(matches!(err, Rejection::Structural(StructuralRejection::Cycle { .. })));
}

#[test]
fn move_onto_itself_is_rejected() {
    let s = floor();
    let err = move_entity(&s, &"bin".into(), Some(&"bin".into()), None).unwrap_err();
    assert!(matches!(err, Rejection::Structural(StructuralRejection::SelfParent { .. })));
}

#[rstest]
#[case("d1", Some("dept"), false)]
#[case("d1", Some("bin"), true)]
#[case("d1", None, true)]
#[case("bin", None, false)]
#[case("rack", Some("dept2"), true)]
#[case("dept2", Some("dept"), true)]
#[case("bin", Some("dept"), false)]
fn type_compatibility(#[case] id: &str, #[case] target: Option<&str>, #[case] ok: bool) {
    let s = floor();
    let target = target.map(EntityId::from);
    assert_eq!(validate_move(&s, &id.into(), target.as_ref()).is_ok(), ok);
}

#[test]
fn rejected_move_leaves_store_untouched() {
    let s = floor();
    let before = s.clone();
    assert!(move_entity(&s, &"d1".into(), Some(&"dept".into()), None).is_err());
    assert_eq!(s, before);
}

#[test]
fn unknown_ids_are_reference_errors() {
    let s = floor();
    assert!(validate_move(&s, &"ghost".into(), None).unwrap_err().is_reference());
    assert!(validate_move(&s, &"d1".into(), Some(&"ghost".into()))
        .unwrap_err()
        .is_reference());
}

#[rstest]
#[case("A", "C", DropPosition::After, &["B", "C", "A"])]
#[case("C", "A", DropPosition::Before, &["C", "A", "B"])]
#[case("A", "B", DropPosition::Before, &["A", "B", "C"])]
#[case("B", "B", DropPosition::After, &["A", "B", "C"])]
fn sibling_reorder(
    #[case] moved: &str,
    #[case] anchor: &str,
    #[case] position: DropPosition,
    #[case] expected: &[&str],
) {
    let s = add(EntityStore::new(), "A", EntityType::Warehouse, None);
    let s = add(s, "B", EntityType::Warehouse, None);
    let s = add(s, "C", EntityType::Warehouse, None);

    let next = reorder(&s, &moved.into(), &anchor.into(), position).unwrap();
    assert_eq!(next.roots(), ids(expected).as_slice());
}

#[test]
fn reorder_across_parents_adopts_anchor_parent() {
    let s = floor();
    let s = add(s, "bin2", EntityType::Bin, Some("rack"));
    let s = add(s, "d3", EntityType::Device, Some("bin2"));

    let next = reorder(&s, &"d3".into(), &"d1".into(), DropPosition::After).unwrap();
    assert_eq!(next.children(&"bin".into()).unwrap(), ids(&["d1", "d3", "d2"]).as_slice());
    assert!(next.children(&"bin2".into()).unwrap().is_empty());

    let err = reorder(&s, &"bin2".into(), &"d1".into(), DropPosition::Before).unwrap_err();
    assert!(err.is_structural());
}

#[test]
fn closest_department_takes_precedence() {
    // D1 (must be tested) contains D2 (must not be tested).
    let mut d1 = Entity::new("D1".into(), EntityType::Department, None);
    d1.department_rules = Some(DepartmentRules {
        tested: RuleCondition::MustHave,
        ..Default::default()
    });
    let mut d2 = Entity::new("D2".into(), EntityType::Department, Some("D1".into()));
    d2.department_rules = Some(DepartmentRules {
        tested: RuleCondition::MustNotHave,
        ..Default::default()
    });
    let mut tested = Entity::new("tested".into(), EntityType::Device, None);
    tested.device_attributes.as_mut().unwrap().tested = true;

    let s = EntityStore::new()
        .with_entity_added(d1, None)
        .unwrap()
        .with_entity_added(d2, None)
        .unwrap()
        .with_entity_added(tested, None)
        .unwrap();
    let s = add(s, "ws", EntityType::Workstation, Some("D2"));
    let s = add(s, "untested", EntityType::Device, None);

    let verdict = validate_device_move(&s, &ids(&["tested"]), Some(&"ws".into()));
    assert!(!verdict.allowed);
    assert_eq!(verdict.blocking_department, Some("D2".into()));
    assert_eq!(verdict.violated_rules, vec!["must not be tested".to_string()]);

    // Passes D2, so the farther D1 gets its say.
    let verdict = validate_device_move(&s, &ids(&["untested"]), Some(&"ws".into()));
    assert_eq!(verdict.blocking_department, Some("D1".into()));
    assert_eq!(verdict.violated_rules, vec!["must be tested".to_string()]);

    // Outside both departments nothing applies.
    assert!(validate_device_move(&s, &ids(&["tested", "untested"]), None).allowed);
}

#[test]
fn box_then_unbox_round_trips() {
    let mut s = floor();
    let mut d1 = s.get(&"d1".into()).unwrap().clone();
    d1.device_attributes.as_mut().unwrap().sku = "PHN-12".to_string();
    s = s.with_child_replaced(d1).unwrap();
    let s = add(s, "ws", EntityType::Workstation, Some("dept2"));
    let s = add(s, "d3", EntityType::Device, Some("ws"));

    let (boxed, receipt) = box_entities(
        &s,
        &"box1".into(),
        "Outbound",
        "BX-1",
        None,
        &ids(&["d2", "d3", "d1"]),
    )
    .unwrap();
    assert_eq!(boxed.children(&"box1".into()).unwrap(), ids(&["d2", "d3", "d1"]).as_slice());
    assert!(boxed.children(&"bin".into()).unwrap().is_empty());

    let restored = unbox_to_origins(&boxed, &receipt, None, true).unwrap();
    assert!(!restored.contains(&"box1".into()));
    for id in ["d1", "d2", "d3"] {
        let before = s.get(&id.into()).unwrap();
        let after = restored.get(&id.into()).unwrap();
        assert_eq!(after.parent_id, before.parent_id);
        assert_eq!(after.device_attributes, before.device_attributes);
    }
    assert_eq!(restored.children(&"bin".into()).unwrap(), ids(&["d1", "d2"]).as_slice());
    assert_eq!(restored, s);
}

#[test]
fn batch_applies_what_it_can() {
    let s = floor();
    let (next, report) = batch_move(
        &s,
        &[
            MoveRequest::new("d1", None),
            MoveRequest::new("d2", Some("dept".into())),
            MoveRequest::new("ghost", None),
            MoveRequest::new("rack", Some("dept2".into())),
        ],
    );
    assert_eq!(report.applied, ids(&["d1", "rack"]));
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped[0].rejection.is_structural());
    assert!(report.skipped[1].rejection.is_reference());
    assert!(next.roots().contains(&"d1".into()));
    assert_eq!(next.get(&"rack".into()).unwrap().parent_id, Some("dept2".into()));
    assert_eq!(next.get(&"d2".into()).unwrap().parent_id, Some("bin".into()));
}

#[test]
fn undo_is_single_level() {
    let mut engine = HierarchyEngine::with_store(floor()).unwrap();
    let original = engine.state().clone();

    let first = Mutation::Move {
        id: "d1".into(),
        target: None,
        index: None,
    };
    let second = Mutation::Move {
        id: "rack".into(),
        target: Some("dept2".into()),
        index: None,
    };
    assert!(engine.apply(&first).applied);
    let after_first = engine.state().clone();
    assert!(engine.apply(&second).applied);

    assert!(engine.undo().unwrap().applied);
    assert_eq!(engine.state(), &after_first);
    assert!(engine.undo().is_none());
    assert_ne!(engine.state(), &original);
}

#[test]
fn undo_of_batch_restores_every_entry() {
    let mut engine = HierarchyEngine::with_store(floor()).unwrap();
    let original = engine.state().clone();

    let result = engine.apply(&Mutation::BatchMove {
        moves: vec![
            MoveRequest::new("d2", None),
            MoveRequest::new("d1", Some("d2".into())),
            MoveRequest::new("d1", None).at(0),
        ],
    });
    assert!(result.applied);
    assert!(result.batch.as_ref().unwrap().is_partial());

    engine.undo();
    assert_eq!(engine.state(), &original);
}

#[test]
fn undo_of_batch_keeps_sibling_order() {
    let s = add(floor(), "d3", EntityType::Device, Some("bin"));
    let s = add(s, "ws", EntityType::Workstation, Some("dept2"));
    let mut engine = HierarchyEngine::with_store(s).unwrap();
    let original = engine.state().clone();

    let result = engine.apply(&Mutation::BatchMove {
        moves: vec![
            MoveRequest::new("d1", Some("ws".into())),
            MoveRequest::new("d2", Some("ws".into())),
        ],
    });
    assert!(result.batch.as_ref().unwrap().is_complete());
    assert_eq!(engine.state().children(&"bin".into()).unwrap(), &ids(&["d3"])[..]);

    assert!(engine.undo().unwrap().applied);
    assert_eq!(
        engine.state().children(&"bin".into()).unwrap(),
        &ids(&["d1", "d2", "d3"])[..]
    );
    assert_eq!(engine.state(), &original);
}

#[test]
fn self_anchored_reorder_keeps_pending_undo() {
    let mut engine = HierarchyEngine::with_store(floor()).unwrap();
    let original = engine.state().clone();

    assert!(engine
        .apply(&Mutation::Move {
            id: "d1".into(),
            target: None,
            index: None,
        })
        .applied);
    let noop = engine.apply(&Mutation::Reorder {
        id: "dept".into(),
        anchor: "dept".into(),
        position: DropPosition::After,
    });
    assert!(noop.applied);
    assert!(engine.can_undo());

    assert!(engine.undo().unwrap().applied);
    assert_eq!(engine.state(), &original);
}
