//! In-memory `InventoryStorage` backend.
//!
//! Transactions work on a private copy of the state. Each target carries its
//! own generation counter. A transaction remembers the targets it used, and
//! on commit only those targets are checked and merged back: if one of them
//! moved since the transaction began, the commit fails with
//! `ConcurrentConflict` and nothing is applied. Commits for other targets
//! are untouched.
//!
//! The whole state can be saved to and loaded from a JSON file so that the
//! graph survives between CLI invocations. Processes sharing a state file
//! serialize their open-modify-save cycle with [`MemoryStorage::lock_file`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::record::{
    EntityAttributes, EntityKind, EntityRecord, LocalId, PayloadDraft, RefreshStatusUpdate,
    RetireMode, ScriptPayloadAttrs, TargetRecord, UpsertAction, UpsertOutcome,
};
use crate::traits::InventoryStorage;

type NaturalKey = (String, EntityKind, String);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    generations: BTreeMap<String, u64>,
    targets: BTreeMap<String, TargetRecord>,
    entities: BTreeMap<LocalId, EntityRecord>,
    index: BTreeMap<NaturalKey, LocalId>,
}

impl MemoryState {
    fn key(target_id: &str, kind: EntityKind, remote_ref: &str) -> NaturalKey {
        (target_id.to_string(), kind, remote_ref.to_string())
    }

    fn lookup(&self, target_id: &str, kind: EntityKind, remote_ref: &str) -> Option<LocalId> {
        self.index
            .get(&Self::key(target_id, kind, remote_ref))
            .copied()
    }

    fn insert(&mut self, record: EntityRecord) {
        self.index.insert(
            Self::key(&record.target_id, record.kind(), &record.remote_ref),
            record.local_id,
        );
        self.entities.insert(record.local_id, record);
    }

    fn remove(&mut self, local_id: LocalId) -> Option<EntityRecord> {
        let record = self.entities.remove(&local_id)?;
        self.index.remove(&Self::key(
            &record.target_id,
            record.kind(),
            &record.remote_ref,
        ));
        Some(record)
    }

    fn generation(&self, target_id: &str) -> u64 {
        self.generations.get(target_id).copied().unwrap_or(0)
    }

    fn bump(&mut self, target_id: &str) -> u64 {
        let generation = self.generations.entry(target_id.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Replace everything this state holds for `target_id` with the rows
    /// `other` holds for it.
    fn adopt_target(&mut self, other: &MemoryState, target_id: &str) {
        let stale: Vec<LocalId> = self
            .entities
            .values()
            .filter(|r| r.target_id == target_id)
            .map(|r| r.local_id)
            .collect();
        for local_id in stale {
            self.remove(local_id);
        }
        for record in other.entities.values().filter(|r| r.target_id == target_id) {
            self.insert(record.clone());
        }
        if let Some(target) = other.targets.get(target_id) {
            self.targets.insert(target_id.to_string(), target.clone());
        }
    }

    fn require_target(&self, target_id: &str) -> Result<(), StorageError> {
        if self.targets.contains_key(target_id) {
            Ok(())
        } else {
            Err(StorageError::TargetNotFound {
                target_id: target_id.to_string(),
            })
        }
    }
}

/// On-disk layout of a saved store.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    next_id: u64,
    #[serde(default)]
    generations: BTreeMap<String, u64>,
    targets: Vec<TargetRecord>,
    entities: Vec<EntityRecord>,
}

/// In-memory storage, cheap to clone (clones share state).
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    next_id: Arc<AtomicU64>,
}

/// A transaction on a [`MemoryStorage`].
#[derive(Debug)]
pub struct MemoryTransaction {
    base: BTreeMap<String, u64>,
    touched: BTreeSet<String>,
    working: MemoryState,
}

impl MemoryTransaction {
    fn touch(&mut self, target_id: &str) {
        if !self.touched.contains(target_id) {
            self.touched.insert(target_id.to_string());
        }
    }
}

/// Exclusive advisory lock on a state file, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Load a store saved with [`MemoryStorage::save`]. A missing file yields
    /// an empty store.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Backend(format!("read '{}': {}", path.display(), e)))?;
        let file: StateFile = serde_json::from_str(&content)
            .map_err(|e| StorageError::Backend(format!("parse '{}': {}", path.display(), e)))?;

        let mut state = MemoryState {
            generations: file.generations,
            ..MemoryState::default()
        };
        for target in file.targets {
            state.targets.insert(target.id.clone(), target);
        }
        let mut max_id = 0;
        for record in file.entities {
            max_id = max_id.max(record.local_id.0);
            state.insert(record);
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            next_id: Arc::new(AtomicU64::new(file.next_id.max(max_id + 1))),
        })
    }

    /// Write the committed state to `path` as JSON.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let file = {
            let state = self.lock()?;
            StateFile {
                next_id: self.next_id.load(Ordering::SeqCst),
                generations: state.generations.clone(),
                targets: state.targets.values().cloned().collect(),
                entities: state.entities.values().cloned().collect(),
            }
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| StorageError::Backend(format!("serialize store: {}", e)))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| StorageError::Backend(format!("write '{}': {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| StorageError::Backend(format!("rename to '{}': {}", path.display(), e)))
    }

    /// Block until this process holds the lock for the state file at `path`.
    /// Hold it from [`MemoryStorage::open`] through [`MemoryStorage::save`] so
    /// that another process cannot overwrite the commits in between.
    pub fn lock_file(path: &Path) -> Result<StoreLock, StorageError> {
        let lock_path = path.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::Backend(format!("open '{}': {}", lock_path.display(), e)))?;
        file.lock_exclusive()
            .map_err(|e| StorageError::Backend(format!("lock '{}': {}", lock_path.display(), e)))?;
        Ok(StoreLock { _file: file })
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }

    fn allocate_id(&self) -> LocalId {
        LocalId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl InventoryStorage for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> Result<MemoryTransaction, StorageError> {
        let state = self.lock()?;
        Ok(MemoryTransaction {
            base: state.generations.clone(),
            touched: BTreeSet::new(),
            working: state.clone(),
        })
    }

    async fn commit_transaction(&self, tx: MemoryTransaction) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        for target_id in &tx.touched {
            let base_generation = tx.base.get(target_id).copied().unwrap_or(0);
            let current_generation = state.generation(target_id);
            if base_generation != current_generation {
                return Err(StorageError::ConcurrentConflict {
                    target_id: target_id.clone(),
                    base_generation,
                    current_generation,
                });
            }
        }
        for target_id in &tx.touched {
            state.adopt_target(&tx.working, target_id);
            let generation = state.bump(target_id);
            debug!(target_id = %target_id, generation, "memory store commit");
        }
        Ok(())
    }

    async fn abort_transaction(&self, tx: MemoryTransaction) -> Result<(), StorageError> {
        debug!(targets = tx.touched.len(), "memory store abort");
        drop(tx);
        Ok(())
    }

    async fn register_target(&self, target: TargetRecord) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.targets.contains_key(&target.id) {
            return Err(StorageError::TargetAlreadyRegistered {
                target_id: target.id,
            });
        }
        state.bump(&target.id);
        state.targets.insert(target.id.clone(), target);
        Ok(())
    }

    async fn get_target(&self, target_id: &str) -> Result<TargetRecord, StorageError> {
        let state = self.lock()?;
        state
            .targets
            .get(target_id)
            .cloned()
            .ok_or_else(|| StorageError::TargetNotFound {
                target_id: target_id.to_string(),
            })
    }

    async fn list_targets(&self) -> Result<Vec<TargetRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state.targets.values().cloned().collect())
    }

    async fn write_refresh_status(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        update: RefreshStatusUpdate,
    ) -> Result<(), StorageError> {
        tx.touch(target_id);
        let target = tx.working.targets.get_mut(target_id).ok_or_else(|| {
            StorageError::TargetNotFound {
                target_id: target_id.to_string(),
            }
        })?;
        target.last_refresh_error = update.error;
        target.last_refresh_at = Some(update.refreshed_at);
        if let Some(version) = update.api_version {
            target.api_version = Some(version);
        }
        if let Some(digest) = update.snapshot_digest {
            target.last_snapshot_digest = Some(digest);
        }
        Ok(())
    }

    async fn find_entity(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        kind: EntityKind,
        remote_ref: &str,
    ) -> Result<Option<EntityRecord>, StorageError> {
        tx.touch(target_id);
        Ok(tx
            .working
            .lookup(target_id, kind, remote_ref)
            .and_then(|id| tx.working.entities.get(&id))
            .cloned())
    }

    async fn upsert_entity(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        remote_ref: &str,
        attributes: EntityAttributes,
    ) -> Result<UpsertOutcome, StorageError> {
        tx.touch(target_id);
        tx.working.require_target(target_id)?;
        let kind = attributes.kind();

        if let Some(local_id) = tx.working.lookup(target_id, kind, remote_ref) {
            let record = tx
                .working
                .entities
                .get_mut(&local_id)
                .ok_or(StorageError::RecordNotFound { local_id })?;
            let action = if record.retired {
                UpsertAction::Reactivated
            } else if record.attributes == attributes {
                UpsertAction::Unchanged
            } else {
                UpsertAction::Updated
            };
            record.retired = false;
            record.attributes = attributes;
            return Ok(UpsertOutcome { local_id, action });
        }

        let local_id = self.allocate_id();
        tx.working.insert(EntityRecord {
            local_id,
            target_id: target_id.to_string(),
            remote_ref: remote_ref.to_string(),
            retired: false,
            attributes,
        });
        Ok(UpsertOutcome {
            local_id,
            action: UpsertAction::Created,
        })
    }

    async fn retire_entities_except(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        kind: EntityKind,
        keep: &BTreeSet<String>,
        mode: RetireMode,
    ) -> Result<Vec<LocalId>, StorageError> {
        tx.touch(target_id);
        let doomed: Vec<LocalId> = tx
            .working
            .entities
            .values()
            .filter(|r| r.target_id == target_id && r.kind() == kind)
            .filter(|r| !keep.contains(&r.remote_ref))
            .filter(|r| mode == RetireMode::Hard || !r.retired)
            .map(|r| r.local_id)
            .collect();

        for local_id in &doomed {
            match mode {
                RetireMode::Soft => {
                    if let Some(record) = tx.working.entities.get_mut(local_id) {
                        record.retired = true;
                    }
                }
                RetireMode::Hard => {
                    tx.working.remove(*local_id);
                }
            }
        }
        Ok(doomed)
    }

    async fn replace_payloads(
        &self,
        tx: &mut MemoryTransaction,
        target_id: &str,
        source: LocalId,
        payloads: Vec<PayloadDraft>,
    ) -> Result<Vec<LocalId>, StorageError> {
        tx.touch(target_id);
        let owner = tx
            .working
            .entities
            .get(&source)
            .filter(|r| r.target_id == target_id)
            .ok_or(StorageError::RecordNotFound { local_id: source })?;
        if owner.kind() != EntityKind::ScriptSource {
            return Err(StorageError::KindMismatch {
                local_id: source,
                expected: EntityKind::ScriptSource,
                found: owner.kind(),
            });
        }

        let mut wanted = BTreeSet::new();
        for draft in &payloads {
            if !wanted.insert(draft.remote_ref.as_str()) {
                return Err(StorageError::Backend(format!(
                    "duplicate payload reference '{}' for source {}",
                    draft.remote_ref, source
                )));
            }
        }

        let stale: Vec<LocalId> = tx
            .working
            .entities
            .values()
            .filter(|r| r.as_script_payload().is_some_and(|p| p.source == source))
            .filter(|r| !wanted.contains(r.remote_ref.as_str()))
            .map(|r| r.local_id)
            .collect();
        for local_id in stale {
            tx.working.remove(local_id);
        }

        let mut ids = Vec::with_capacity(payloads.len());
        for draft in payloads {
            let attributes = EntityAttributes::ScriptPayload(ScriptPayloadAttrs {
                name: draft.name,
                kind: draft.kind,
                source,
            });
            if let Some(local_id) =
                tx.working
                    .lookup(target_id, EntityKind::ScriptPayload, &draft.remote_ref)
            {
                let record = tx
                    .working
                    .entities
                    .get_mut(&local_id)
                    .ok_or(StorageError::RecordNotFound { local_id })?;
                if record.as_script_payload().map(|p| p.source) != Some(source) {
                    return Err(StorageError::Backend(format!(
                        "payload reference '{}' already belongs to another source",
                        draft.remote_ref
                    )));
                }
                record.retired = false;
                record.attributes = attributes;
                ids.push(local_id);
                continue;
            }
            let local_id = self.allocate_id();
            tx.working.insert(EntityRecord {
                local_id,
                target_id: target_id.to_string(),
                remote_ref: draft.remote_ref,
                retired: false,
                attributes,
            });
            ids.push(local_id);
        }
        Ok(ids)
    }

    async fn list_entities(
        &self,
        target_id: &str,
        kind: EntityKind,
        include_retired: bool,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .entities
            .values()
            .filter(|r| r.target_id == target_id && r.kind() == kind)
            .filter(|r| include_retired || !r.retired)
            .cloned()
            .collect())
    }
}
