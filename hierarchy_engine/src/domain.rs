/// Hierarchy kernel: Core Domain Types
///
/// Pure data. Structural policy lives in `registry`, structural
/// bookkeeping in `store`. Entities reference each other by id only.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReferenceError, StructuralRejection};

// ── Identity ───────────────────────────────────────────────────────

/// Globally unique, immutable entity identifier. ASCII `[A-Za-z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Validated constructor.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ReferenceError> {
        let raw = raw.into();
        if Self::is_well_formed(&raw) {
            Ok(Self(raw))
        } else {
            Err(ReferenceError::InvalidId(raw))
        }
    }

    /// Fresh UUID v4 identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn is_well_formed(raw: &str) -> bool {
        !raw.is_empty()
            && raw
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for EntityId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ── Entity types ───────────────────────────────────────────────────

/// Closed set of entity kinds. Legal parents per kind: see `registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Warehouse,
    Department,
    StorageArea,
    StaticRack,
    MobileRack,
    MobileStorageParkingSpot,
    Bin,
    Box,
    Workstation,
    Device,
}

impl EntityType {
    pub const ALL: [EntityType; 10] = [
        EntityType::Warehouse,
        EntityType::Department,
        EntityType::StorageArea,
        EntityType::StaticRack,
        EntityType::MobileRack,
        EntityType::MobileStorageParkingSpot,
        EntityType::Bin,
        EntityType::Box,
        EntityType::Workstation,
        EntityType::Device,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Warehouse => "Warehouse",
            EntityType::Department => "Department",
            EntityType::StorageArea => "StorageArea",
            EntityType::StaticRack => "StaticRack",
            EntityType::MobileRack => "MobileRack",
            EntityType::MobileStorageParkingSpot => "MobileStorageParkingSpot",
            EntityType::Bin => "Bin",
            EntityType::Box => "Box",
            EntityType::Workstation => "Workstation",
            EntityType::Device => "Device",
        }
    }

    /// Human label used for freshly created entities.
    pub fn default_label(&self) -> &'static str {
        match self {
            EntityType::Warehouse => "New Warehouse",
            EntityType::Department => "New Department",
            EntityType::StorageArea => "New Storage Area",
            EntityType::StaticRack => "New Static Rack",
            EntityType::MobileRack => "New Mobile Rack",
            EntityType::MobileStorageParkingSpot => "New Parking Spot",
            EntityType::Bin => "New Bin",
            EntityType::Box => "New Box",
            EntityType::Workstation => "New Workstation",
            EntityType::Device => "New Device",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Department rules ───────────────────────────────────────────────

/// Tri-state policy for one device attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    #[default]
    Ignore,
    MustHave,
    MustNotHave,
}

impl RuleCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCondition::Ignore => "ignore",
            RuleCondition::MustHave => "must_have",
            RuleCondition::MustNotHave => "must_not_have",
        }
    }

    /// Returns the violated rule name, if `has` breaks this condition.
    pub fn violation(
        self,
        has: bool,
        must: &'static str,
        must_not: &'static str,
    ) -> Option<&'static str> {
        match self {
            RuleCondition::Ignore => None,
            RuleCondition::MustHave if !has => Some(must),
            RuleCondition::MustNotHave if has => Some(must_not),
            _ => None,
        }
    }
}

/// Attribute rules attached to a Department.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepartmentRules {
    pub tested: RuleCondition,
    pub sellable: RuleCondition,
    pub serialized: RuleCondition,
}

impl DepartmentRules {
    pub fn is_unrestricted(&self) -> bool {
        self.tested == RuleCondition::Ignore
            && self.sellable == RuleCondition::Ignore
            && self.serialized == RuleCondition::Ignore
    }

    /// Rule names this device breaks, in tested/sellable/serialized order.
    pub fn describe_violations(&self, device: &DeviceAttributes) -> Vec<&'static str> {
        [
            self.tested
                .violation(device.tested, "must be tested", "must not be tested"),
            self.sellable
                .violation(device.sellable, "must be sellable", "must not be sellable"),
            self.serialized.violation(
                device.is_serialized(),
                "must be serialized",
                "must not be serialized",
            ),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

// ── Device attributes ──────────────────────────────────────────────

/// Inventory attributes of a Device. Rule-evaluation inputs only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceAttributes {
    pub sku: String,
    /// Serial number or IMEI.
    pub serial: String,
    pub grade: String,
    pub tested: bool,
    pub sellable: bool,
    /// Workstation queue name, if the device is queued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl DeviceAttributes {
    pub fn is_serialized(&self) -> bool {
        !self.serial.trim().is_empty()
    }
}

// ── Entity ─────────────────────────────────────────────────────────

/// A node of the containment tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub barcode: String,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    #[serde(default)]
    pub children: Vec<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_attributes: Option<DeviceAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_rules: Option<DepartmentRules>,
}

impl Entity {
    /// Childless entity with the payload defaults for its type.
    pub fn new(id: EntityId, entity_type: EntityType, parent_id: Option<EntityId>) -> Self {
        Self {
            id,
            entity_type,
            label: entity_type.default_label().to_string(),
            description: String::new(),
            barcode: String::new(),
            parent_id,
            children: Vec::new(),
            device_attributes: (entity_type == EntityType::Device)
                .then(DeviceAttributes::default),
            department_rules: (entity_type == EntityType::Department)
                .then(DepartmentRules::default),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Payload present iff the type carries one.
    pub fn payload_matches_type(&self) -> bool {
        self.device_attributes.is_some() == (self.entity_type == EntityType::Device)
            && self.department_rules.is_some() == (self.entity_type == EntityType::Department)
    }
}

/// Construct an entity with a fresh id and type-correct defaults.
pub fn create_entity(entity_type: EntityType, parent_id: Option<EntityId>) -> Entity {
    Entity::new(EntityId::generate(), entity_type, parent_id)
}

// ── Attribute patch ────────────────────────────────────────────────

/// Partial update of an entity's non-structural fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntityPatch {
    pub label: Option<String>,
    pub description: Option<String>,
    pub barcode: Option<String>,
    pub device_attributes: Option<DeviceAttributes>,
    pub department_rules: Option<DepartmentRules>,
}

impl EntityPatch {
    /// Apply onto `entity`. Payloads must match the entity's type.
    pub fn apply_to(&self, entity: &mut Entity) -> Result<(), StructuralRejection> {
        let mismatch = (self.device_attributes.is_some()
            && entity.entity_type != EntityType::Device)
            || (self.department_rules.is_some() && entity.entity_type != EntityType::Department);
        if mismatch {
            return Err(StructuralRejection::PayloadMismatch {
                id: entity.id.clone(),
                entity_type: entity.entity_type,
            });
        }

        if let Some(label) = &self.label {
            entity.label = label.clone();
        }
        if let Some(description) = &self.description {
            entity.description = description.clone();
        }
        if let Some(barcode) = &self.barcode {
            entity.barcode = barcode.clone();
        }
        if let Some(attrs) = &self.device_attributes {
            entity.device_attributes = Some(attrs.clone());
        }
        if let Some(rules) = &self.department_rules {
            entity.department_rules = Some(rules.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_parse() {
        assert!(EntityId::parse("bin_1").is_ok());
        assert!(EntityId::parse("A-B_c-3").is_ok());
        assert_eq!(
            EntityId::parse("has space"),
            Err(ReferenceError::InvalidId("has space".to_string()))
        );
        assert!(EntityId::parse("").is_err());
    }

    #[test]
    fn test_generated_ids_are_well_formed_and_unique() {
        let a = EntityId::generate();
        let b = EntityId::generate();
        assert!(EntityId::is_well_formed(a.as_str()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_entity_defaults_per_type() {
        let device = create_entity(EntityType::Device, None);
        assert!(device.device_attributes.is_some());
        assert!(device.department_rules.is_none());
        assert_eq!(device.label, "New Device");

        let dept = create_entity(EntityType::Department, None);
        assert!(dept.department_rules.is_some());
        assert!(dept.payload_matches_type());

        let bin = create_entity(EntityType::Bin, Some("rack".into()));
        assert!(bin.device_attributes.is_none() && bin.department_rules.is_none());
        assert_eq!(bin.parent_id, Some(EntityId::from("rack")));
    }

    #[test]
    fn test_rule_condition_violation() {
        let c = RuleCondition::MustHave;
        assert_eq!(c.violation(false, "must", "must not"), Some("must"));
        assert_eq!(c.violation(true, "must", "must not"), None);
        let c = RuleCondition::MustNotHave;
        assert_eq!(c.violation(true, "must", "must not"), Some("must not"));
        assert_eq!(RuleCondition::Ignore.violation(true, "must", "must not"), None);
    }

    #[test]
    fn test_serialized_is_derived_from_trimmed_serial() {
        let mut attrs = DeviceAttributes::default();
        assert!(!attrs.is_serialized());
        attrs.serial = "   ".to_string();
        assert!(!attrs.is_serialized());
        attrs.serial = "356938035643809".to_string();
        assert!(attrs.is_serialized());
    }

    #[test]
    fn test_patch_rejects_foreign_payload() {
        let mut bin = Entity::new("b1".into(), EntityType::Bin, None);
        let patch = EntityPatch {
            device_attributes: Some(DeviceAttributes::default()),
            ..Default::default()
        };
        assert!(patch.apply_to(&mut bin).is_err());

        let patch = EntityPatch {
            label: Some("Returns".to_string()),
            ..Default::default()
        };
        patch.apply_to(&mut bin).unwrap();
        assert_eq!(bin.label, "Returns");
    }

    #[test]
    fn test_entity_wire_shape() {
        let mut device = Entity::new("d1".into(), EntityType::Device, Some("bin1".into()));
        device.device_attributes.as_mut().unwrap().tested = true;
        let v = serde_json::to_value(&device).unwrap();
        assert_eq!(v["type"], "Device");
        assert_eq!(v["parentId"], "bin1");
        assert_eq!(v["deviceAttributes"]["tested"], true);
        assert!(v.get("departmentRules").is_none());

        let back: Entity = serde_json::from_value(v).unwrap();
        assert_eq!(back, device);
    }
}
