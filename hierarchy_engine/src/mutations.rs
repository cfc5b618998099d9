/// Hierarchy kernel: Mutation Requests
///
/// Mutations are pure data: intent and arguments only. All transition
/// logic lives in `transitions`.

use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, EntityPatch, EntityType, Entity};
use crate::error::Rejection;
use crate::grouping::BoxReceipt;
use crate::moves::{BatchReport, DropPosition, MoveRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Construct a fresh entity with type defaults and insert it.
    Create {
        entity_type: EntityType,
        #[serde(default)]
        parent: Option<EntityId>,
        #[serde(default)]
        index: Option<usize>,
        #[serde(default)]
        label: Option<String>,
    },
    /// Insert a caller-built, childless entity.
    Add {
        entity: Entity,
        #[serde(default)]
        index: Option<usize>,
    },
    Move {
        id: EntityId,
        #[serde(default)]
        target: Option<EntityId>,
        #[serde(default)]
        index: Option<usize>,
    },
    /// Drop `id` before/after the sibling `anchor`.
    Reorder {
        id: EntityId,
        anchor: EntityId,
        position: DropPosition,
    },
    BatchMove {
        moves: Vec<MoveRequest>,
    },
    Delete {
        id: EntityId,
    },
    DeleteMany {
        ids: Vec<EntityId>,
    },
    Box {
        /// Generated when absent.
        #[serde(default)]
        box_id: Option<EntityId>,
        #[serde(default)]
        label: String,
        #[serde(default)]
        barcode: String,
        #[serde(default)]
        parent: Option<EntityId>,
        members: Vec<EntityId>,
    },
    Unbox {
        box_id: EntityId,
        #[serde(default)]
        destination: Option<EntityId>,
        #[serde(default)]
        delete_box: bool,
    },
    UpdateAttributes {
        id: EntityId,
        patch: EntityPatch,
    },
    /// Set (or clear) the workstation queue of each device. Plain
    /// attribute update; never re-parents.
    AssignQueue {
        device_ids: Vec<EntityId>,
        #[serde(default)]
        queue: Option<String>,
    },
}

impl Mutation {
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Add { .. } => "add",
            Mutation::Move { .. } => "move",
            Mutation::Reorder { .. } => "reorder",
            Mutation::BatchMove { .. } => "batch_move",
            Mutation::Delete { .. } => "delete",
            Mutation::DeleteMany { .. } => "delete_many",
            Mutation::Box { .. } => "box",
            Mutation::Unbox { .. } => "unbox",
            Mutation::UpdateAttributes { .. } => "update_attributes",
            Mutation::AssignQueue { .. } => "assign_queue",
        }
    }

    /// Mutations the undo engine records.
    pub fn is_move(&self) -> bool {
        matches!(
            self,
            Mutation::Move { .. } | Mutation::Reorder { .. } | Mutation::BatchMove { .. }
        )
    }
}

/// Structured outcome of applying a mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MutationResult {
    pub op: String,
    pub applied: bool,
    pub rejection: Option<Rejection>,
    pub created: Option<EntityId>,
    pub removed: Vec<EntityId>,
    pub batch: Option<BatchReport>,
    pub receipt: Option<BoxReceipt>,
}

impl MutationResult {
    pub fn applied(op: &str) -> Self {
        Self {
            op: op.to_string(),
            applied: true,
            ..Default::default()
        }
    }

    pub fn rejected(op: &str, rejection: Rejection) -> Self {
        Self {
            op: op.to_string(),
            applied: false,
            rejection: Some(rejection),
            ..Default::default()
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_wire_format() {
        let json = r#"{"op":"move","id":"d1","target":"bin"}"#;
        let m: Mutation = serde_json::from_str(json).unwrap();
        assert_eq!(
            m,
            Mutation::Move {
                id: "d1".into(),
                target: Some("bin".into()),
                index: None,
            }
        );
        assert!(m.is_move());

        let json = r#"{"op":"unbox","box_id":"bx"}"#;
        let m: Mutation = serde_json::from_str(json).unwrap();
        assert_eq!(m.name(), "unbox");
        assert!(!m.is_move());

        let json = r#"{"op":"reorder","id":"a","anchor":"c","position":"after"}"#;
        let m: Mutation = serde_json::from_str(json).unwrap();
        assert!(matches!(m, Mutation::Reorder { position: DropPosition::After, .. }));
    }
}
