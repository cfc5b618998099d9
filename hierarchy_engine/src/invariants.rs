/// Hierarchy kernel: Invariant Checks
///
/// Run after every committed transition and on every snapshot restore.
/// Returns the first violation found; a store that passes is a forest
/// whose links, types and payloads all agree.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::{EntityId, EntityType};
use crate::graph::detect_parent_cycles;
use crate::registry;
use crate::store::EntityStore;

/// Which structural rule a store broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantCode {
    IdFormat,
    KeyMismatch,
    ParentLink,
    RootLink,
    Acyclic,
    ParentType,
    DuplicateChild,
    DuplicateRoot,
    Payload,
}

impl InvariantCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvariantCode::IdFormat => "id_format",
            InvariantCode::KeyMismatch => "key_mismatch",
            InvariantCode::ParentLink => "parent_link",
            InvariantCode::RootLink => "root_link",
            InvariantCode::Acyclic => "acyclic",
            InvariantCode::ParentType => "parent_type",
            InvariantCode::DuplicateChild => "duplicate_child",
            InvariantCode::DuplicateRoot => "duplicate_root",
            InvariantCode::Payload => "payload",
        }
    }
}

impl fmt::Display for InvariantCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("[INVARIANT:{code}] {message}")]
pub struct InvariantViolation {
    pub code: InvariantCode,
    pub message: String,
}

impl InvariantViolation {
    fn new(code: InvariantCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every check in order. `Err` carries the first failure.
pub fn validate_invariants(store: &EntityStore) -> Result<(), InvariantViolation> {
    check_id_format(store)?;
    check_no_duplicates(store)?;
    check_parent_links(store)?;
    check_root_links(store)?;
    check_acyclic(store)?;
    check_parent_types(store)?;
    check_payloads(store)?;
    Ok(())
}

pub fn is_valid(store: &EntityStore) -> bool {
    validate_invariants(store).is_ok()
}

// ---------------------------------------------------------------------------
// Individual checks (private)
// ---------------------------------------------------------------------------

fn check_id_format(store: &EntityStore) -> Result<(), InvariantViolation> {
    for (key, entity) in store.ids().zip(store.iter()) {
        if !EntityId::is_well_formed(key.as_str()) {
            return Err(InvariantViolation::new(
                InvariantCode::IdFormat,
                format!("entity id {:?} must match [A-Za-z0-9_-]+", key.as_str()),
            ));
        }
        if key != &entity.id {
            return Err(InvariantViolation::new(
                InvariantCode::KeyMismatch,
                format!("entity stored under {} carries id {}", key, entity.id),
            ));
        }
    }
    Ok(())
}

fn check_no_duplicates(store: &EntityStore) -> Result<(), InvariantViolation> {
    let mut seen = BTreeSet::new();
    for id in store.roots() {
        if !seen.insert(id) {
            return Err(InvariantViolation::new(
                InvariantCode::DuplicateRoot,
                format!("root {} listed more than once", id),
            ));
        }
    }
    for entity in store.iter() {
        let mut seen = BTreeSet::new();
        for child in &entity.children {
            if !seen.insert(child) {
                return Err(InvariantViolation::new(
                    InvariantCode::DuplicateChild,
                    format!("{} lists child {} more than once", entity.id, child),
                ));
            }
        }
    }
    Ok(())
}

/// Every child link points back at its parent, and every non-root sits
/// in exactly its parent's children.
fn check_parent_links(store: &EntityStore) -> Result<(), InvariantViolation> {
    for entity in store.iter() {
        for child in &entity.children {
            let Some(child_entity) = store.get(child) else {
                return Err(InvariantViolation::new(
                    InvariantCode::ParentLink,
                    format!("{} lists missing child {}", entity.id, child),
                ));
            };
            if child_entity.parent_id.as_ref() != Some(&entity.id) {
                return Err(InvariantViolation::new(
                    InvariantCode::ParentLink,
                    format!(
                        "{} lists child {} whose parent is {}",
                        entity.id,
                        child,
                        describe_parent(child_entity.parent_id.as_ref())
                    ),
                ));
            }
        }

        if let Some(pid) = &entity.parent_id {
            let Some(parent) = store.get(pid) else {
                return Err(InvariantViolation::new(
                    InvariantCode::ParentLink,
                    format!("{} points at missing parent {}", entity.id, pid),
                ));
            };
            if !parent.children.contains(&entity.id) {
                return Err(InvariantViolation::new(
                    InvariantCode::ParentLink,
                    format!("{} is not among the children of its parent {}", entity.id, pid),
                ));
            }
        }
    }
    Ok(())
}

/// The root list is exactly the set of parentless entities.
fn check_root_links(store: &EntityStore) -> Result<(), InvariantViolation> {
    for id in store.roots() {
        match store.get(id) {
            None => {
                return Err(InvariantViolation::new(
                    InvariantCode::RootLink,
                    format!("root list names missing entity {}", id),
                ))
            }
            Some(e) if e.parent_id.is_some() => {
                return Err(InvariantViolation::new(
                    InvariantCode::RootLink,
                    format!("root {} has a parent", id),
                ))
            }
            Some(_) => {}
        }
    }
    for entity in store.iter() {
        if entity.is_root() && !store.roots().contains(&entity.id) {
            return Err(InvariantViolation::new(
                InvariantCode::RootLink,
                format!("parentless entity {} missing from root list", entity.id),
            ));
        }
    }
    Ok(())
}

fn check_acyclic(store: &EntityStore) -> Result<(), InvariantViolation> {
    let cycles = detect_parent_cycles(store);
    if let Some(cycle) = cycles.first() {
        let path: Vec<&str> = cycle.iter().map(EntityId::as_str).collect();
        return Err(InvariantViolation::new(
            InvariantCode::Acyclic,
            format!("parent cycle detected: {}", path.join(" -> ")),
        ));
    }
    Ok(())
}

fn check_parent_types(store: &EntityStore) -> Result<(), InvariantViolation> {
    for entity in store.iter() {
        let parent_type: Option<EntityType> = entity
            .parent_id
            .as_ref()
            .and_then(|pid| store.get(pid))
            .map(|p| p.entity_type);
        if !registry::can_be_child_of(entity.entity_type, parent_type) {
            let under = parent_type.map_or("the root", |t| t.as_str());
            return Err(InvariantViolation::new(
                InvariantCode::ParentType,
                format!("{} {} cannot sit under {}", entity.entity_type, entity.id, under),
            ));
        }
    }
    Ok(())
}

fn check_payloads(store: &EntityStore) -> Result<(), InvariantViolation> {
    for entity in store.iter() {
        if !entity.payload_matches_type() {
            return Err(InvariantViolation::new(
                InvariantCode::Payload,
                format!("{} {} carries the wrong payload", entity.entity_type, entity.id),
            ));
        }
    }
    Ok(())
}

fn describe_parent(parent: Option<&EntityId>) -> String {
    parent.map_or_else(|| "unset".to_string(), EntityId::to_string)
}
