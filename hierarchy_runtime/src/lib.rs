#![forbid(unsafe_code)]

//! Hierarchy runtime: sessions around the hierarchy engine.
//!
//! Adds configuration, logging, snapshot persistence, broadcast and
//! drift reporting. No domain logic lives here; every transition and
//! invariant is delegated to `hierarchy_engine`.

pub mod config;
pub mod logging;
pub mod snapshot_codec;
pub mod snapshot;
pub mod sink;
pub mod drift;
pub mod session;

pub use config::RuntimeConfig;
pub use session::{Session, SessionError, SharedSession};
pub use snapshot::SnapshotEnvelope;
