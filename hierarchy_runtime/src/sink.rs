//! Persistence and broadcast collaborators.
//!
//! Both are fire-and-forget from the session's point of view: a failure
//! is logged by the caller and the commit stands.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::snapshot::{prune_snapshots, save_snapshot, SnapshotEnvelope};
use crate::snapshot_codec::SnapshotError;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub trait PersistenceSink: Send {
    fn persist(&self, envelope: &SnapshotEnvelope) -> Result<(), SinkError>;
}

/// Versioned snapshot files in a directory, written every `interval`
/// commits and pruned to `retain` files.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    interval: u64,
    retain: usize,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, interval: u64, retain: usize) -> Self {
        Self {
            dir: dir.into(),
            interval,
            retain,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_due(&self, sequence: u64) -> bool {
        self.interval > 0 && sequence % self.interval == 0
    }
}

impl PersistenceSink for DirectorySink {
    fn persist(&self, envelope: &SnapshotEnvelope) -> Result<(), SinkError> {
        if !self.is_due(envelope.sequence) {
            return Ok(());
        }
        save_snapshot(&self.dir, envelope)?;
        prune_snapshots(&self.dir, self.retain.max(1))?;
        Ok(())
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    persisted: Arc<Mutex<Vec<SnapshotEnvelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> Vec<SnapshotEnvelope> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn latest(&self) -> Option<SnapshotEnvelope> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl PersistenceSink for MemorySink {
    fn persist(&self, envelope: &SnapshotEnvelope) -> Result<(), SinkError> {
        self.persisted
            .lock()
            .map_err(|_| SinkError::Poisoned("memory sink"))?
            .push(envelope.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

pub trait BroadcastChannel: Send {
    fn publish(&self, envelope: &SnapshotEnvelope) -> Result<(), SinkError>;
}

/// Fan-out to in-process subscribers. Disconnected receivers are
/// dropped on the next publish.
#[derive(Debug, Clone, Default)]
pub struct LocalBroadcast {
    subscribers: Arc<Mutex<Vec<Sender<SnapshotEnvelope>>>>,
}

impl LocalBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SnapshotEnvelope> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl BroadcastChannel for LocalBroadcast {
    fn publish(&self, envelope: &SnapshotEnvelope) -> Result<(), SinkError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| SinkError::Poisoned("broadcast"))?;
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        if subscribers.len() < before {
            debug!(dropped = before - subscribers.len(), "broadcast subscribers disconnected");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcast;

impl BroadcastChannel for NullBroadcast {
    fn publish(&self, _envelope: &SnapshotEnvelope) -> Result<(), SinkError> {
        Ok(())
    }
}
