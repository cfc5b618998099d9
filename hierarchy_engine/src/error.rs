/// Hierarchy kernel: Rejections
///
/// Rejection taxonomy for hierarchy mutations.
///
/// Every failure is a value. Callers decide whether to surface,
/// retry or ignore; nothing here panics for control flow.

use serde::Serialize;
use thiserror::Error;

use crate::domain::{EntityId, EntityType};
use crate::invariants::InvariantViolation;
use crate::rules::RuleVerdict;

/// A move or insertion that would break the tree's shape.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralRejection {
    #[error("entity {id} cannot be its own parent")]
    SelfParent { id: EntityId },

    #[error("moving {id} under {target} would create a cycle")]
    Cycle { id: EntityId, target: EntityId },

    #[error("{child_type} {id} cannot be placed under {}", parent_label(.parent_type))]
    IncompatibleParent {
        id: EntityId,
        child_type: EntityType,
        parent_type: Option<EntityType>,
    },

    #[error("entity {id} is a {entity_type}, not a Box")]
    NotABox { id: EntityId, entity_type: EntityType },

    #[error("entity {id} must be inserted without children")]
    NonEmptyInsert { id: EntityId },

    #[error("payload does not match {entity_type} {id}")]
    PayloadMismatch { id: EntityId, entity_type: EntityType },
}

fn parent_label(parent: &Option<EntityType>) -> String {
    match parent {
        Some(t) => t.to_string(),
        None => "the root".to_string(),
    }
}

/// An operation named an id that is missing, taken, or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReferenceError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    #[error("invalid entity id {0:?}: must match [A-Za-z0-9_-]+")]
    InvalidId(String),
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    #[error(transparent)]
    Structural(#[from] StructuralRejection),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("{0}")]
    RuleViolation(RuleVerdict),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

impl Rejection {
    pub fn unknown(id: &EntityId) -> Self {
        Rejection::Reference(ReferenceError::UnknownEntity(id.clone()))
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Rejection::Structural(_))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Rejection::Reference(_))
    }

    pub fn is_rule_violation(&self) -> bool {
        matches!(self, Rejection::RuleViolation(_))
    }
}

pub type HierarchyResult<T> = Result<T, Rejection>;
