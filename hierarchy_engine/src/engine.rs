/// Hierarchy kernel: Engine
///
/// Top-level controller. Delegates mutation to transitions, gates moves
/// through department rules, validates via invariants, and keeps the
/// single-level undo record in step with each commit.

use tracing::{debug, warn};

use crate::domain::EntityId;
use crate::error::Rejection;
use crate::hashing::canonical_hash;
use crate::invariants::{validate_invariants, InvariantViolation};
use crate::mutations::{Mutation, MutationResult};
use crate::rules::{self, RuleVerdict};
use crate::store::EntityStore;
use crate::transitions::{apply_batch_move_with, apply_mutation};
use crate::undo::{UndoEngine, UndoEntry};

/// Stateful engine wrapping the pure transition layer.
#[derive(Debug, Clone)]
pub struct HierarchyEngine {
    store: EntityStore,
    undo: UndoEngine,
    enforce_rules: bool,
}

impl Default for HierarchyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchyEngine {
    /// Empty store, rule enforcement on.
    pub fn new() -> Self {
        Self {
            store: EntityStore::new(),
            undo: UndoEngine::new(),
            enforce_rules: true,
        }
    }

    /// Start from an existing store. It must pass every invariant.
    pub fn with_store(store: EntityStore) -> Result<Self, InvariantViolation> {
        validate_invariants(&store)?;
        Ok(Self {
            store,
            ..Self::new()
        })
    }

    pub fn enforce_rules(mut self, enforce: bool) -> Self {
        self.enforce_rules = enforce;
        self
    }

    pub fn set_enforce_rules(&mut self, enforce: bool) {
        self.enforce_rules = enforce;
    }

    pub fn rules_enforced(&self) -> bool {
        self.enforce_rules
    }

    pub fn state(&self) -> &EntityStore {
        &self.store
    }

    pub fn undo_engine(&self) -> &UndoEngine {
        &self.undo
    }

    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    pub fn state_hash(&self) -> String {
        canonical_hash(&self.store)
    }

    /// Apply a single mutation:
    ///   1. Rule pre-flight (when enforced)
    ///   2. Delegate to transitions
    ///   3. Validate invariants on the new store
    ///   4. Commit and update the undo record
    ///
    /// The store only changes if every step passes.
    pub fn apply(&mut self, mutation: &Mutation) -> MutationResult {
        let op = mutation.name();

        if self.enforce_rules {
            if let Some(verdict) = rules::preflight(&self.store, mutation) {
                warn!(op, %verdict, "mutation blocked by department rules");
                return MutationResult::rejected(op, Rejection::RuleViolation(verdict));
            }
        }

        let (next, result) = match mutation {
            Mutation::BatchMove { moves } if self.enforce_rules => {
                apply_batch_move_with(&self.store, moves, rules::gate_move)
            }
            _ => apply_mutation(&self.store, mutation),
        };
        if !result.applied {
            return result;
        }

        if let Err(violation) = validate_invariants(&next) {
            warn!(op, %violation, "transition broke an invariant; not committed");
            return MutationResult::rejected(op, Rejection::Invariant(violation));
        }

        match mutation {
            // A move that changed nothing keeps the previous record.
            m if m.is_move() && next == self.store => {}
            Mutation::Move { id, .. } | Mutation::Reorder { id, .. } => {
                self.undo.record(UndoEntry::capture(&self.store, id).into_iter().collect());
            }
            Mutation::BatchMove { .. } => {
                let origins = result
                    .batch
                    .as_ref()
                    .map(|b| b.origins.clone())
                    .unwrap_or_default();
                self.undo.record(origins);
            }
            Mutation::Delete { .. }
            | Mutation::DeleteMany { .. }
            | Mutation::Box { .. }
            | Mutation::Unbox { .. } => self.undo.clear(),
            _ => {}
        }

        self.commit(next);
        debug!(op, can_undo = self.undo.can_undo(), "mutation committed");
        result
    }

    fn commit(&mut self, next: EntityStore) {
        self.store = next;
    }

    /// Revert the most recent move commit. `None` when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> Option<MutationResult> {
        let (next, report) = self.undo.undo(&self.store)?;

        if let Err(violation) = validate_invariants(&next) {
            warn!(%violation, "undo broke an invariant; not committed");
            return Some(MutationResult::rejected("undo", Rejection::Invariant(violation)));
        }

        let applied = !report.applied.is_empty();
        if applied {
            self.commit(next);
        }
        debug!(restored = report.applied.len(), skipped = report.skipped.len(), "undo");
        Some(MutationResult {
            op: "undo".to_string(),
            applied,
            batch: Some(report),
            ..Default::default()
        })
    }

    /// Replace the whole store, e.g. with a snapshot from another writer.
    /// Clears the undo record.
    pub fn replace_store(&mut self, store: EntityStore) -> Result<(), InvariantViolation> {
        validate_invariants(&store)?;
        self.undo.clear();
        self.commit(store);
        Ok(())
    }

    /// Pre-flight check against the current store.
    pub fn validate_device_move(&self, device_ids: &[EntityId], target: Option<&EntityId>) -> RuleVerdict {
        rules::validate_device_move(&self.store, device_ids, target)
    }
}
