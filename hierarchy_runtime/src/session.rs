//! Session manager: one writer's view of the hierarchy.
//!
//! Commit order for every applied change:
//!   1. engine.apply(mutation); rejected mutations stop here
//!   2. skip if the canonical hash did not change
//!   3. bump the sequence, persist, then broadcast
//!
//! Persist and broadcast failures are logged; the commit stands.
//! Concurrency: `SharedSession` serializes writers with a Mutex.
//! Multi-writer coordination is last-writer-wins on whole snapshots.

use std::sync::mpsc::Receiver;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use hierarchy_engine::domain::EntityId;
use hierarchy_engine::engine::HierarchyEngine;
use hierarchy_engine::mutations::{Mutation, MutationResult};
use hierarchy_engine::rules::RuleVerdict;
use hierarchy_engine::store::EntityStore;

use crate::config::{ConfigError, RuntimeConfig};
use crate::drift::{compare_stores, DriftReport};
use crate::logging;
use crate::sink::{
    BroadcastChannel, DirectorySink, LocalBroadcast, MemorySink, NullBroadcast, PersistenceSink,
};
use crate::snapshot::{load_latest_snapshot, SnapshotEnvelope};
use crate::snapshot_codec::{restore_snapshot, SnapshotError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A hierarchy session with its own engine, sequence and collaborators.
pub struct Session {
    config: RuntimeConfig,
    engine: HierarchyEngine,
    sink: Box<dyn PersistenceSink>,
    broadcast: Box<dyn BroadcastChannel>,
    local_broadcast: Option<LocalBroadcast>,
    current_sequence: u64,
    last_hash: String,
}

impl Session {
    /// Start with an empty store.
    pub fn new(
        config: RuntimeConfig,
        sink: Box<dyn PersistenceSink>,
        broadcast: Box<dyn BroadcastChannel>,
    ) -> Self {
        let engine = HierarchyEngine::new().enforce_rules(config.enforce_department_rules);
        let last_hash = engine.state_hash();
        Self {
            config,
            engine,
            sink,
            broadcast,
            local_broadcast: None,
            current_sequence: 0,
            last_hash,
        }
    }

    /// Start from the latest snapshot in `config.snapshot_dir`, if any.
    pub fn resume(
        config: RuntimeConfig,
        sink: Box<dyn PersistenceSink>,
        broadcast: Box<dyn BroadcastChannel>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let latest = match &config.snapshot_dir {
            Some(dir) => load_latest_snapshot(dir)?,
            None => None,
        };

        let mut session = Self::new(config, sink, broadcast);
        if let Some(envelope) = latest {
            session
                .engine
                .replace_store(envelope.snapshot)
                .map_err(SnapshotError::from)?;
            session.current_sequence = envelope.sequence;
            session.last_hash = session.engine.state_hash();
            info!(
                session = %session.config.session_id,
                sequence = envelope.sequence,
                entities = session.engine.state().len(),
                "session resumed from snapshot"
            );
        }
        Ok(session)
    }

    /// Build collaborators from the config: a `DirectorySink` when a
    /// snapshot directory is set (else in-memory), and a `LocalBroadcast`
    /// when broadcasting is on. Also installs logging with
    /// `config.log_filter` unless a subscriber is already set.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, SessionError> {
        config.validate()?;
        logging::init(&config.log_filter);

        let sink: Box<dyn PersistenceSink> = match &config.snapshot_dir {
            Some(dir) => Box::new(DirectorySink::new(
                dir,
                config.snapshot_interval,
                config.retain_snapshots,
            )),
            None => Box::new(MemorySink::new()),
        };
        let local = config.broadcast.then(LocalBroadcast::new);
        let broadcast: Box<dyn BroadcastChannel> = match &local {
            Some(channel) => Box::new(channel.clone()),
            None => Box::new(NullBroadcast),
        };

        let mut session = Self::resume(config, sink, broadcast)?;
        session.local_broadcast = local;
        Ok(session)
    }

    /// Receive every envelope this session publishes. `None` when the
    /// session was not built with a local broadcast channel.
    pub fn subscribe(&self) -> Option<Receiver<SnapshotEnvelope>> {
        self.local_broadcast.as_ref().map(LocalBroadcast::subscribe)
    }

    /// Apply a mutation and, if it changed the store, commit it.
    #[instrument(skip_all, fields(session = %self.config.session_id, op = mutation.name()))]
    pub fn apply(&mut self, mutation: &Mutation) -> MutationResult {
        let result = self.engine.apply(mutation);
        if result.applied {
            self.publish_commit();
        } else if let Some(rejection) = &result.rejection {
            debug!(%rejection, "mutation rejected");
        }
        result
    }

    /// Revert the last move commit. `None` when there is nothing to undo.
    #[instrument(skip_all, fields(session = %self.config.session_id))]
    pub fn undo(&mut self) -> Option<MutationResult> {
        let result = self.engine.undo()?;
        if result.applied {
            self.publish_commit();
        }
        Some(result)
    }

    /// Replace the current store with a snapshot from another writer.
    ///
    /// The snapshot is sanitized and validated first; on failure the
    /// current store is kept. On success the undo record is cleared and
    /// the new state is persisted but not re-broadcast.
    #[instrument(skip_all, fields(session = %self.config.session_id))]
    pub fn accept_remote(&mut self, json: &str) -> Result<DriftReport, SessionError> {
        let store = restore_snapshot(json)?;
        self.accept_store(store)
    }

    /// `accept_remote` for an envelope received over a broadcast channel.
    /// Envelopes from this session are ignored (`None`).
    #[instrument(skip_all, fields(session = %self.config.session_id, origin = %envelope.origin))]
    pub fn accept_envelope(
        &mut self,
        envelope: &SnapshotEnvelope,
    ) -> Result<Option<DriftReport>, SessionError> {
        if envelope.origin == self.config.session_id {
            return Ok(None);
        }
        let verified = envelope.clone().verified()?;
        self.accept_store(verified.snapshot).map(Some)
    }

    fn accept_store(&mut self, store: EntityStore) -> Result<DriftReport, SessionError> {
        let report = compare_stores(self.engine.state(), &store);
        self.engine
            .replace_store(store)
            .map_err(SnapshotError::from)?;
        if report.is_identical() {
            debug!("remote snapshot matches local state");
            return Ok(report);
        }
        info!(
            added = report.added.len(),
            removed = report.removed.len(),
            reparented = report.reparented.len(),
            updated = report.updated.len(),
            "remote snapshot accepted"
        );

        self.current_sequence += 1;
        self.last_hash = self.engine.state_hash();
        let envelope = self.envelope();
        self.persist(&envelope);
        Ok(report)
    }

    /// Pre-flight rule check against the current store.
    pub fn validate_device_move(&self, device_ids: &[EntityId], target: Option<&EntityId>) -> RuleVerdict {
        self.engine.validate_device_move(device_ids, target)
    }

    fn envelope(&self) -> SnapshotEnvelope {
        SnapshotEnvelope::new(
            self.current_sequence,
            self.config.session_id.clone(),
            self.engine.state().clone(),
        )
    }

    fn persist(&self, envelope: &SnapshotEnvelope) {
        if let Err(e) = self.sink.persist(envelope) {
            warn!(error = %e, sequence = envelope.sequence, "snapshot persist failed");
        }
    }

    fn publish_commit(&mut self) {
        let hash = self.engine.state_hash();
        if hash == self.last_hash {
            debug!("state unchanged; nothing to publish");
            return;
        }
        self.current_sequence += 1;
        self.last_hash = hash;

        let envelope = self.envelope();
        self.persist(&envelope);
        if let Err(e) = self.broadcast.publish(&envelope) {
            warn!(error = %e, sequence = envelope.sequence, "snapshot broadcast failed");
        }
        debug!(sequence = self.current_sequence, "commit published");
    }

    pub fn state(&self) -> &EntityStore {
        self.engine.state()
    }

    pub fn engine(&self) -> &HierarchyEngine {
        &self.engine
    }

    /// Canonical hash of the current store.
    pub fn current_hash(&self) -> String {
        self.engine.state_hash()
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn can_undo(&self) -> bool {
        self.engine.can_undo()
    }
}

/// Thread-safe session handle using Mutex.
pub struct SharedSession {
    inner: Mutex<Session>,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    pub fn apply(&self, mutation: &Mutation) -> MutationResult {
        self.with(|s| s.apply(mutation))
    }

    pub fn undo(&self) -> Option<MutationResult> {
        self.with(Session::undo)
    }

    pub fn accept_remote(&self, json: &str) -> Result<DriftReport, SessionError> {
        self.with(|s| s.accept_remote(json))
    }

    pub fn current_hash(&self) -> String {
        self.with(|s| s.current_hash())
    }

    pub fn current_sequence(&self) -> u64 {
        self.with(|s| s.current_sequence())
    }

    pub fn into_inner(self) -> Session {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
