//! Snapshot layer: versioned snapshot envelopes on disk.
//!
//! One file per committed sequence: `snapshot_NNNNNN.json`. No
//! timestamps in snapshot content. Older files are pruned to the
//! configured retention.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use hierarchy_engine::hashing::canonical_hash;
use hierarchy_engine::invariants::validate_invariants;
use hierarchy_engine::store::EntityStore;
use hierarchy_engine::SNAPSHOT_FORMAT_VERSION;

use crate::snapshot_codec::SnapshotError;

/// A committed store as handed to persistence and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    /// Commit sequence within the origin session.
    pub sequence: u64,
    /// Session that produced the commit.
    pub origin: String,
    /// Canonical SHA-256 of `snapshot`.
    pub hash: String,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub snapshot: EntityStore,
}

fn default_format_version() -> u32 {
    SNAPSHOT_FORMAT_VERSION
}

impl SnapshotEnvelope {
    pub fn new(sequence: u64, origin: impl Into<String>, store: EntityStore) -> Self {
        Self {
            sequence,
            origin: origin.into(),
            hash: canonical_hash(&store),
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: store,
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(SnapshotError::Serialization)
    }

    /// Parse, then `verified`.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let envelope: SnapshotEnvelope =
            serde_json::from_str(json).map_err(SnapshotError::Deserialization)?;
        envelope.verified()
    }

    /// Check the hash against the store as sent, then sanitize the
    /// store and validate it. `hash` is recomputed for the cleaned store.
    pub fn verified(mut self) -> Result<Self, SnapshotError> {
        verify_snapshot_hash(&self)?;
        self.snapshot = self.snapshot.sanitized();
        validate_invariants(&self.snapshot)?;
        self.hash = canonical_hash(&self.snapshot);
        Ok(self)
    }
}

fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("snapshot_{:06}.json", sequence))
}

/// Save an envelope as `snapshot_NNNNNN.json` and fsync it.
pub fn save_snapshot(dir: &Path, envelope: &SnapshotEnvelope) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir)?;

    let path = snapshot_path(dir, envelope.sequence);
    let content = envelope.to_json()?;

    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    debug!(path = %path.display(), sequence = envelope.sequence, "snapshot saved");
    Ok(path)
}

/// Load the snapshot at a specific sequence number.
/// Returns None if no snapshot exists at that sequence.
pub fn load_snapshot(dir: &Path, sequence: u64) -> Result<Option<SnapshotEnvelope>, SnapshotError> {
    let path = snapshot_path(dir, sequence);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)?;
    SnapshotEnvelope::from_json(&content).map(Some)
}

/// Sequence numbers of every snapshot file in `dir`, ascending.
pub fn list_snapshots(dir: &Path) -> Result<Vec<u64>, SnapshotError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut sequences = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(seq) = name_str
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            sequences.push(seq);
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

/// Load the snapshot with the highest sequence in `dir`.
pub fn load_latest_snapshot(dir: &Path) -> Result<Option<SnapshotEnvelope>, SnapshotError> {
    match list_snapshots(dir)?.last() {
        Some(&seq) => load_snapshot(dir, seq),
        None => Ok(None),
    }
}

/// Delete all but the newest `retain` snapshots. Returns the pruned
/// sequence numbers.
pub fn prune_snapshots(dir: &Path, retain: usize) -> Result<Vec<u64>, SnapshotError> {
    let sequences = list_snapshots(dir)?;
    let excess = sequences.len().saturating_sub(retain);
    let doomed = sequences[..excess].to_vec();
    for seq in &doomed {
        fs::remove_file(snapshot_path(dir, *seq))?;
    }
    if !doomed.is_empty() {
        debug!(pruned = doomed.len(), retain, "old snapshots pruned");
    }
    Ok(doomed)
}

/// Check that an envelope's hash matches its store.
pub fn verify_snapshot_hash(envelope: &SnapshotEnvelope) -> Result<(), SnapshotError> {
    let computed = canonical_hash(&envelope.snapshot);
    if computed == envelope.hash {
        Ok(())
    } else {
        Err(SnapshotError::HashMismatch {
            expected: envelope.hash.clone(),
            computed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hierarchy_engine::domain::{Entity, EntityType};

    fn store(label: &str) -> EntityStore {
        let mut w = Entity::new("wh".into(), EntityType::Warehouse, None);
        w.label = label.to_string();
        EntityStore::new().with_entity_added(w, None).unwrap()
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        for seq in [3, 1, 12] {
            save_snapshot(dir.path(), &SnapshotEnvelope::new(seq, "a", store(&seq.to_string())))
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(list_snapshots(dir.path()).unwrap(), vec![1, 3, 12]);
        let latest = load_latest_snapshot(dir.path()).unwrap().unwrap();
        assert_eq!(latest.sequence, 12);
        assert_eq!(latest.snapshot.get(&"wh".into()).unwrap().label, "12");
        assert!(load_snapshot(dir.path(), 2).unwrap().is_none());
    }

    #[test]
    fn test_missing_dir_has_no_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_latest_snapshot(&dir.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 1..=5 {
            save_snapshot(dir.path(), &SnapshotEnvelope::new(seq, "a", store("x"))).unwrap();
        }
        assert_eq!(prune_snapshots(dir.path(), 2).unwrap(), vec![1, 2, 3]);
        assert_eq!(list_snapshots(dir.path()).unwrap(), vec![4, 5]);
        assert!(prune_snapshots(dir.path(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_roots_are_cleaned_not_rejected() {
        let clean = store("x");
        let dirty = EntityStore::from_parts(
            clean.iter().map(|e| (e.id.clone(), e.clone())).collect(),
            vec!["wh".into(), "wh".into()],
        );
        let envelope = SnapshotEnvelope::new(4, "remote", dirty);
        let json = envelope.to_json().unwrap();

        let verified = SnapshotEnvelope::from_json(&json).unwrap();
        assert_eq!(verified.snapshot, clean);
        assert_eq!(verified.hash, canonical_hash(&clean));
        assert!(verify_snapshot_hash(&verified).is_ok());
    }

    #[test]
    fn test_tampered_hash_is_rejected() {
        let mut envelope = SnapshotEnvelope::new(1, "a", store("x"));
        assert!(verify_snapshot_hash(&envelope).is_ok());

        envelope.hash = "0".repeat(64);
        let json = envelope.to_json().unwrap();
        assert!(matches!(
            SnapshotEnvelope::from_json(&json).unwrap_err(),
            SnapshotError::HashMismatch { .. }
        ));
    }
}
