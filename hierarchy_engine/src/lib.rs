#![forbid(unsafe_code)]

/// Version stamped into canonical serializations. Changing the canonical
/// layout requires bumping it.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub mod domain;
pub mod error;
pub mod registry;
pub mod store;
pub mod graph;
pub mod moves;
pub mod rules;
pub mod grouping;
pub mod undo;
pub mod mutations;
pub mod transitions;
pub mod invariants;
pub mod hashing;
pub mod engine;

pub use domain::{create_entity, Entity, EntityId, EntityType};
pub use engine::HierarchyEngine;
pub use error::{HierarchyResult, Rejection};
pub use mutations::{Mutation, MutationResult};
pub use store::EntityStore;
