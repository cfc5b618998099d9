//! Snapshot Codec: EntityStore encoder/decoder.
//!
//! Pure codec layer. No side-effects, no timestamps, no envelope.
//!
//! - `encode_snapshot`:  EntityStore → wire JSON string
//! - `decode_snapshot`:  JSON string → EntityStore (no checks)
//! - `restore_snapshot`: decode + sanitize + invariant validation
//! - `export_snapshot_to_file` / `import_snapshot_from_file`: file I/O
//! - `snapshot_hash`:    SHA-256 of the wire JSON (lowercase hex)

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

use hierarchy_engine::invariants::{validate_invariants, InvariantViolation};
use hierarchy_engine::store::EntityStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// All possible snapshot codec failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("SerializationError: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Malformed JSON or a shape that doesn't match the wire format.
    #[error("DeserializationError: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Loaded store breaks a structural invariant.
    #[error("InvariantViolation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),

    /// Stored hash does not match the stored content.
    #[error("HashMismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encode a store as wire JSON: `{"entities": {...}, "roots": [...]}`.
///
/// BTreeMap keeps entity keys sorted, so equal stores encode identically.
pub fn encode_snapshot(store: &EntityStore) -> Result<String, SnapshotError> {
    serde_json::to_string(store).map_err(SnapshotError::Serialization)
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode wire JSON into an EntityStore. Missing `entities`/`roots`
/// default to empty. No validation; use `restore_snapshot` for
/// untrusted input.
pub fn decode_snapshot(json: &str) -> Result<EntityStore, SnapshotError> {
    serde_json::from_str::<EntityStore>(json).map_err(SnapshotError::Deserialization)
}

// ---------------------------------------------------------------------------
// Restore (decode + sanitize + validate)
// ---------------------------------------------------------------------------

/// Decode, drop duplicate root/child ids, then validate invariants.
///
/// The safe entry point for snapshots from other writers or from disk.
pub fn restore_snapshot(json: &str) -> Result<EntityStore, SnapshotError> {
    let store = decode_snapshot(json)?.sanitized();
    validate_invariants(&store)?;
    Ok(store)
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Export a store to a file. Creates parent directories if needed.
pub fn export_snapshot_to_file(store: &EntityStore, path: &Path) -> Result<(), SnapshotError> {
    let json = encode_snapshot(store)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(path, json.as_bytes())?;
    Ok(())
}

/// Import a store from a JSON file, sanitizing and validating it.
pub fn import_snapshot_from_file(path: &Path) -> Result<EntityStore, SnapshotError> {
    let content = fs::read_to_string(path)?;
    restore_snapshot(&content)
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// SHA-256 of the wire JSON. Lowercase hex string.
///
/// NOTE: This hashes the serde-derived JSON, NOT the canonical hash from
/// `hierarchy_engine::hashing`. It verifies that a snapshot file has not
/// been altered.
pub fn snapshot_hash(store: &EntityStore) -> Result<String, SnapshotError> {
    let json = encode_snapshot(store)?;
    Ok(sha256_hex(json.as_bytes()))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hierarchy_engine::domain::{Entity, EntityType};
    use hierarchy_engine::invariants::InvariantCode;

    /// dept > ws > device.
    fn make_test_store() -> EntityStore {
        let s = EntityStore::new()
            .with_entity_added(Entity::new("dept".into(), EntityType::Department, None), None)
            .unwrap();
        let s = s
            .with_entity_added(
                Entity::new("ws".into(), EntityType::Workstation, Some("dept".into())),
                None,
            )
            .unwrap();
        let mut device = Entity::new("dev".into(), EntityType::Device, Some("ws".into()));
        device.device_attributes.as_mut().unwrap().serial = "IMEI-77".to_string();
        s.with_entity_added(device, None).unwrap()
    }

    // ── Roundtrip encode → decode → encode ──────────────────────────

    #[test]
    fn roundtrip_produces_identical_json() {
        let store = make_test_store();
        let json1 = encode_snapshot(&store).unwrap();
        let decoded = decode_snapshot(&json1).unwrap();
        let json2 = encode_snapshot(&decoded).unwrap();
        assert_eq!(json1, json2, "Roundtrip must produce identical JSON");
        assert_eq!(decoded, store);
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let json = encode_snapshot(&make_test_store()).unwrap();
        assert!(json.starts_with(r#"{"entities":{"#));
        assert!(json.contains(r#""parentId":"ws""#));
        assert!(json.contains(r#""type":"Device""#));
        assert!(json.contains(r#""deviceAttributes":{"#));
        assert!(json.contains(r#""departmentRules":{"#));
        assert!(json.ends_with(r#""roots":["dept"]}"#));
    }

    // ── Duplicate ids are dropped on restore ────────────────────────

    #[test]
    fn restore_sanitizes_duplicates() {
        let json = r#"{
            "entities": {
                "w": {"id": "w", "type": "Warehouse", "children": ["d", "d"]},
                "d": {"id": "d", "type": "Department", "parentId": "w", "departmentRules": {}}
            },
            "roots": ["w", "w"]
        }"#;
        let store = restore_snapshot(json).unwrap();
        assert_eq!(store.roots().len(), 1);
        assert_eq!(store.children(&"w".into()).unwrap().len(), 1);
    }

    // ── Broken structure → InvariantViolation ───────────────────────

    #[test]
    fn dangling_parent_returns_invariant_violation() {
        let json = r#"{
            "entities": {"d": {"id": "d", "type": "Device", "parentId": "ghost", "deviceAttributes": {}}},
            "roots": []
        }"#;
        match restore_snapshot(json).unwrap_err() {
            SnapshotError::Invariant(v) => assert_eq!(v.code, InvariantCode::ParentLink),
            other => panic!("Expected InvariantViolation, got: {:?}", other),
        }
    }

    #[test]
    fn missing_payload_returns_invariant_violation() {
        let json = r#"{"entities": {"d": {"id": "d", "type": "Device"}}, "roots": ["d"]}"#;
        match restore_snapshot(json).unwrap_err() {
            SnapshotError::Invariant(v) => assert_eq!(v.code, InvariantCode::Payload),
            other => panic!("Expected InvariantViolation, got: {:?}", other),
        }
    }

    // ── File roundtrip ──────────────────────────────────────────────

    #[test]
    fn file_roundtrip_matches() {
        let store = make_test_store();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        export_snapshot_to_file(&store, &path).unwrap();
        let imported = import_snapshot_from_file(&path).unwrap();
        assert_eq!(imported, store);

        let file_bytes = std::fs::read(&path).unwrap();
        assert_eq!(sha256_hex(&file_bytes), snapshot_hash(&store).unwrap());
    }

    // ── Corrupted input → DeserializationError ──────────────────────

    #[test]
    fn corrupted_file_returns_deserialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{ not valid json !!!}").unwrap();

        match import_snapshot_from_file(&path).unwrap_err() {
            SnapshotError::Deserialization(_) => {}
            other => panic!("Expected DeserializationError, got: {:?}", other),
        }
    }

    #[test]
    fn unknown_entity_type_returns_deserialization_error() {
        let json = r#"{"entities": {"x": {"id": "x", "type": "Pallet"}}, "roots": ["x"]}"#;
        assert!(matches!(
            decode_snapshot(json).unwrap_err(),
            SnapshotError::Deserialization(_)
        ));
    }

    #[test]
    fn empty_object_is_empty_store() {
        assert!(restore_snapshot("{}").unwrap().is_empty());
    }

    #[test]
    fn hash_is_deterministic() {
        let store = make_test_store();
        let h1 = snapshot_hash(&store).unwrap();
        let h2 = snapshot_hash(&store).unwrap();
        assert_eq!(h1, h2, "Same store must produce same hash");
        assert_eq!(h1.len(), 64, "SHA-256 hex string must be 64 chars");
    }
}
