use crate::record::{EntityKind, LocalId};

/// All errors that can be returned by an InventoryStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No target registered under this id.
    #[error("target not found: {target_id}")]
    TargetNotFound { target_id: String },

    /// A target with this id is already registered.
    #[error("target already registered: {target_id}")]
    TargetAlreadyRegistered { target_id: String },

    /// No record with this local identity.
    #[error("record not found: {local_id}")]
    RecordNotFound { local_id: LocalId },

    /// The record exists but is of another kind than the operation expects.
    #[error("record {local_id} is a {found}, expected a {expected}")]
    KindMismatch {
        local_id: LocalId,
        expected: EntityKind,
        found: EntityKind,
    },

    /// Another transaction committed to the same target since this one began.
    #[error("concurrent commit detected on target {target_id}: transaction began at generation {base_generation}, target is at {current_generation}")]
    ConcurrentConflict {
        target_id: String,
        base_generation: u64,
        current_generation: u64,
    },

    /// A backend-specific storage error (I/O, serialization, poisoned lock, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
