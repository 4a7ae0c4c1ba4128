use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    CounterpartRef, EntityAttributes, EntityKind, EntityRecord, LocalId, PayloadDraft,
    RefreshStatusUpdate, RetireMode, TargetRecord, UpsertOutcome,
};

/// The storage trait for the persisted inventory graph.
///
/// An `InventoryStorage` implementation keeps targets and the entities each
/// target owns, keyed by (target, kind, remote reference).
///
/// ## Transaction Semantics
///
/// All mutating entity operations take `&mut Self::Transaction`. The
/// lifecycle is:
///
/// 1. `begin_transaction()`: start a transaction
/// 2. Call mutating methods with `&mut tx`
/// 3. `commit_transaction(tx)`: commit and consume the transaction
///    OR `abort_transaction(tx)`: roll back and consume the transaction
///
/// If a `Transaction` is dropped without committing, its writes MUST be
/// discarded.
///
/// Isolation is per target. A commit may fail with `ConcurrentConflict` only
/// when a target the transaction used was changed by another commit since
/// the transaction began. Commits for other targets never conflict.
///
/// ## Identity
///
/// `upsert_entity` is create-or-update by natural key. A record keeps its
/// `LocalId` across renames, soft retirement and reactivation. Ids are never
/// handed out twice, including ids of hard-deleted records and ids allocated
/// in aborted transactions.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a refresher can be
/// shared across async tasks.
#[async_trait]
pub trait InventoryStorage: Send + Sync + 'static {
    /// The transaction type used by this storage backend.
    type Transaction: Send;

    // ── Transaction lifecycle ────────────────────────────────────────────────

    /// Begin a new transaction.
    async fn begin_transaction(&self) -> Result<Self::Transaction, StorageError>;

    /// Commit a transaction, making all mutations durable.
    async fn commit_transaction(&self, tx: Self::Transaction) -> Result<(), StorageError>;

    /// Abort (roll back) a transaction, discarding all mutations.
    async fn abort_transaction(&self, tx: Self::Transaction) -> Result<(), StorageError>;

    // ── Targets ──────────────────────────────────────────────────────────────

    /// Register a new target.
    ///
    /// Returns `Err(StorageError::TargetAlreadyRegistered)` if the id is taken.
    async fn register_target(&self, target: TargetRecord) -> Result<(), StorageError>;

    /// Read a target.
    ///
    /// Returns `Err(StorageError::TargetNotFound)` if it does not exist.
    async fn get_target(&self, target_id: &str) -> Result<TargetRecord, StorageError>;

    /// List all registered targets, ordered by id.
    async fn list_targets(&self) -> Result<Vec<TargetRecord>, StorageError>;

    /// Write the end-of-pass refresh status on a target.
    async fn write_refresh_status(
        &self,
        tx: &mut Self::Transaction,
        target_id: &str,
        update: RefreshStatusUpdate,
    ) -> Result<(), StorageError>;

    // ── Entities (within transaction) ────────────────────────────────────────

    /// Find a record by natural key, retired records included.
    async fn find_entity(
        &self,
        tx: &mut Self::Transaction,
        target_id: &str,
        kind: EntityKind,
        remote_ref: &str,
    ) -> Result<Option<EntityRecord>, StorageError>;

    /// Create or update the record with this natural key.
    ///
    /// The kind is taken from `attributes`. Attributes are replaced
    /// wholesale. A soft-retired record is reactivated.
    async fn upsert_entity(
        &self,
        tx: &mut Self::Transaction,
        target_id: &str,
        remote_ref: &str,
        attributes: EntityAttributes,
    ) -> Result<UpsertOutcome, StorageError>;

    /// Retire every record of `kind` owned by `target_id` whose remote
    /// reference is not in `keep`. Returns the retired ids.
    ///
    /// `Soft` flags active records (already retired ones are skipped);
    /// `Hard` deletes matching records whether or not they were flagged.
    ///
    /// Records owned by other targets are never touched.
    async fn retire_entities_except(
        &self,
        tx: &mut Self::Transaction,
        target_id: &str,
        kind: EntityKind,
        keep: &BTreeSet<String>,
        mode: RetireMode,
    ) -> Result<Vec<LocalId>, StorageError>;

    /// Make `payloads` the complete payload set of `source`: payloads not in
    /// the set are hard-deleted, the rest are inserted or overwritten. A
    /// payload whose remote reference was already stored under this source
    /// keeps its id. Returns the ids in input order.
    ///
    /// Returns `Err(StorageError::RecordNotFound)` if the source does not
    /// exist and `Err(StorageError::KindMismatch)` if it is not a source.
    async fn replace_payloads(
        &self,
        tx: &mut Self::Transaction,
        target_id: &str,
        source: LocalId,
        payloads: Vec<PayloadDraft>,
    ) -> Result<Vec<LocalId>, StorageError>;

    // ── Queries (outside transaction) ────────────────────────────────────────

    /// List the records of one kind owned by a target, ordered by local id.
    async fn list_entities(
        &self,
        target_id: &str,
        kind: EntityKind,
        include_retired: bool,
    ) -> Result<Vec<EntityRecord>, StorageError>;
}

/// Read-only lookup into a store of records this engine does not own.
#[async_trait]
pub trait CounterpartLookup: Send + Sync {
    /// Find the record carrying this externally assigned instance identifier.
    async fn find_by_instance_ref(
        &self,
        instance_ref: &str,
    ) -> Result<Option<CounterpartRef>, StorageError>;
}
