/// Hierarchy kernel: Canonical Hashing
///
/// Deterministic canonical serialization + SHA-256 hashing.
/// Produces byte-identical output across platforms.
///
/// Rules:
///   - format_version first, then roots in order, then entities by id
///   - Entity fields in fixed order; children keep their order
///   - Device tags sorted by key
///   - UTF-8 JSON, no whitespace

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::{DepartmentRules, DeviceAttributes, Entity, EntityId};
use crate::store::EntityStore;
use crate::SNAPSHOT_FORMAT_VERSION;

/// Canonical serialization of a store to UTF-8 JSON bytes.
pub fn canonical_serialize(store: &EntityStore) -> Vec<u8> {
    build_canonical_value(store).to_string().into_bytes()
}

/// SHA-256 of canonical serialization. Lowercase hex string.
pub fn canonical_hash(store: &EntityStore) -> String {
    let digest = Sha256::digest(canonical_serialize(store));
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn ids(list: &[EntityId]) -> Value {
    Value::Array(list.iter().map(|id| Value::String(id.to_string())).collect())
}

fn opt_id(id: Option<&EntityId>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.to_string()))
}

fn build_canonical_value(store: &EntityStore) -> Value {
    // BTreeMap iteration is already id-sorted.
    let entities: Vec<Value> = store.iter().map(entity_value).collect();

    let mut root = Map::new();
    root.insert(
        "format_version".to_string(),
        Value::Number(SNAPSHOT_FORMAT_VERSION.into()),
    );
    root.insert("roots".to_string(), ids(store.roots()));
    root.insert("entities".to_string(), Value::Array(entities));
    Value::Object(root)
}

fn entity_value(e: &Entity) -> Value {
    let mut map = Map::new();
    map.insert("id".to_string(), Value::String(e.id.to_string()));
    map.insert("type".to_string(), Value::String(e.entity_type.as_str().to_string()));
    map.insert("label".to_string(), Value::String(e.label.clone()));
    map.insert("description".to_string(), Value::String(e.description.clone()));
    map.insert("barcode".to_string(), Value::String(e.barcode.clone()));
    map.insert("parent_id".to_string(), opt_id(e.parent_id.as_ref()));
    map.insert("children".to_string(), ids(&e.children));
    map.insert(
        "device_attributes".to_string(),
        e.device_attributes.as_ref().map_or(Value::Null, device_value),
    );
    map.insert(
        "department_rules".to_string(),
        e.department_rules.as_ref().map_or(Value::Null, rules_value),
    );
    Value::Object(map)
}

fn device_value(d: &DeviceAttributes) -> Value {
    let mut map = Map::new();
    map.insert("sku".to_string(), Value::String(d.sku.clone()));
    map.insert("serial".to_string(), Value::String(d.serial.clone()));
    map.insert("grade".to_string(), Value::String(d.grade.clone()));
    map.insert("tested".to_string(), Value::Bool(d.tested));
    map.insert("sellable".to_string(), Value::Bool(d.sellable));
    map.insert(
        "queue".to_string(),
        d.queue.clone().map_or(Value::Null, Value::String),
    );
    let mut tags = Map::new();
    for (k, v) in &d.tags {
        tags.insert(k.clone(), Value::String(v.clone()));
    }
    map.insert("tags".to_string(), Value::Object(tags));
    Value::Object(map)
}

fn rules_value(r: &DepartmentRules) -> Value {
    let mut map = Map::new();
    map.insert("tested".to_string(), Value::String(r.tested.as_str().to_string()));
    map.insert("sellable".to_string(), Value::String(r.sellable.as_str().to_string()));
    map.insert(
        "serialized".to_string(),
        Value::String(r.serialized.as_str().to_string()),
    );
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityType, RuleCondition};

    fn sample() -> EntityStore {
        let mut dept = Entity::new("dept".into(), EntityType::Department, None);
        dept.department_rules = Some(DepartmentRules {
            tested: RuleCondition::MustHave,
            ..Default::default()
        });
        let s = EntityStore::new().with_entity_added(dept, None).unwrap();
        s.with_entity_added(Entity::new("ws".into(), EntityType::Workstation, Some("dept".into())), None)
            .unwrap()
    }

    #[test]
    fn test_hash_is_stable() {
        let a = canonical_hash(&sample());
        let b = canonical_hash(&sample());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_serialization_has_no_whitespace_and_leads_with_version() {
        let text = String::from_utf8(canonical_serialize(&sample())).unwrap();
        assert!(text.starts_with(r#"{"format_version":1,"roots":["dept"]"#));
        assert!(!text.contains(' '));
        assert!(text.contains(r#""tested":"must_have""#));
    }

    #[test]
    fn test_hash_tracks_child_order() {
        let s = sample()
            .with_entity_added(
                Entity::new("ws2".into(), EntityType::Workstation, Some("dept".into())),
                None,
            )
            .unwrap();
        let swapped = s
            .with_entities_removed(&["ws2".into()])
            .unwrap()
            .with_entity_added(
                Entity::new("ws2".into(), EntityType::Workstation, Some("dept".into())),
                Some(0),
            )
            .unwrap();
        assert_ne!(canonical_hash(&s), canonical_hash(&swapped));
    }
}
