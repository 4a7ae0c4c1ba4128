//! Deserialization and structural validation of snapshot documents.
//!
//! The main entry points are [`from_json`] and [`from_str`], which produce a
//! validated [`InventorySnapshot`].

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::types::InventorySnapshot;

/// Errors during snapshot deserialization and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// The document does not have the snapshot shape.
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    /// A record carries an empty remote reference.
    #[error("{kind} record '{name}' has an empty remote reference")]
    EmptyRef { kind: &'static str, name: String },
    /// Two records of one kind share a remote reference.
    #[error("duplicate {kind} reference '{remote_ref}'")]
    DuplicateRef {
        kind: &'static str,
        remote_ref: String,
    },
}

/// Deserialize a snapshot from a JSON value and validate it.
pub fn from_json(value: &serde_json::Value) -> Result<InventorySnapshot, SnapshotError> {
    let snapshot: InventorySnapshot = serde_json::from_value(value.clone())
        .map_err(|e| SnapshotError::Malformed(e.to_string()))?;
    snapshot.validate()?;
    Ok(snapshot)
}

/// Deserialize a snapshot from JSON text and validate it.
pub fn from_str(src: &str) -> Result<InventorySnapshot, SnapshotError> {
    let snapshot: InventorySnapshot =
        serde_json::from_str(src).map_err(|e| SnapshotError::Malformed(e.to_string()))?;
    snapshot.validate()?;
    Ok(snapshot)
}

fn check_refs<'a>(
    kind: &'static str,
    records: impl Iterator<Item = (String, &'a str)>,
) -> Result<(), SnapshotError> {
    let mut seen = HashSet::new();
    for (remote_ref, name) in records {
        if remote_ref.trim().is_empty() {
            return Err(SnapshotError::EmptyRef {
                kind,
                name: name.to_string(),
            });
        }
        if !seen.insert(remote_ref.clone()) {
            return Err(SnapshotError::DuplicateRef { kind, remote_ref });
        }
    }
    Ok(())
}

impl InventorySnapshot {
    /// Check that remote references are non-empty and unique per kind.
    ///
    /// Dangling references between records are not checked here; the
    /// refresh engine reports them as relationship gaps.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        check_refs(
            "inventory_group",
            self.inventory_groups
                .iter()
                .map(|r| (r.remote_ref.clone(), r.name.as_str())),
        )?;
        check_refs(
            "configured_system",
            self.configured_systems
                .iter()
                .map(|r| (r.remote_ref.clone(), r.hostname.as_str())),
        )?;
        check_refs(
            "credential",
            self.credentials
                .iter()
                .map(|r| (r.remote_ref.clone(), r.name.as_str())),
        )?;
        check_refs(
            "script_source",
            self.script_sources
                .iter()
                .map(|r| (r.remote_ref.clone(), r.name.as_str())),
        )?;
        for payload in &self.script_payloads {
            if payload.source_ref.trim().is_empty() || payload.name.trim().is_empty() {
                return Err(SnapshotError::EmptyRef {
                    kind: "script_payload",
                    name: payload.name.clone(),
                });
            }
        }
        check_refs(
            "script_payload",
            self.script_payloads
                .iter()
                .map(|r| (r.remote_ref(), r.name.as_str())),
        )?;
        check_refs(
            "configuration_script",
            self.configuration_scripts
                .iter()
                .map(|r| (r.remote_ref.clone(), r.name.as_str())),
        )?;
        Ok(())
    }

    /// SHA-256 of the compact JSON form, hex encoded.
    ///
    /// `serde_json::Map` is backed by a `BTreeMap`, so equal snapshots
    /// digest equally regardless of the key order they were parsed from.
    pub fn digest(&self) -> Result<String, SnapshotError> {
        let canonical =
            serde_json::to_vec(self).map_err(|e| SnapshotError::Malformed(e.to_string()))?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}
