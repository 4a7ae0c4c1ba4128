//! Identity resolution for one pass.
//!
//! Every record written in a pass is remembered here by (kind, remote ref).
//! Relationship building only ever resolves against this index, so an edge
//! can never point at a record that was not seen in the same pass.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use invsync_storage::{
    EntityAttributes, EntityKind, InventoryStorage, LocalId, StorageError, UpsertAction,
    UpsertOutcome,
};

use crate::report::KindStats;

#[derive(Debug, Default)]
pub struct Resolver {
    resolved: BTreeMap<EntityKind, BTreeMap<String, LocalId>>,
    stats: BTreeMap<EntityKind, KindStats>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a record and remember it as seen.
    ///
    /// Counting is left to the caller, since some records are written more
    /// than once per pass.
    pub async fn upsert<S: InventoryStorage>(
        &mut self,
        storage: &S,
        tx: &mut S::Transaction,
        target_id: &str,
        remote_ref: &str,
        attributes: EntityAttributes,
    ) -> Result<UpsertOutcome, StorageError> {
        let kind = attributes.kind();
        let outcome = storage
            .upsert_entity(tx, target_id, remote_ref, attributes)
            .await?;
        debug!(
            kind = %kind,
            remote_ref,
            local_id = %outcome.local_id,
            action = ?outcome.action,
            "resolved"
        );
        self.remember(kind, remote_ref, outcome.local_id);
        Ok(outcome)
    }

    pub fn remember(&mut self, kind: EntityKind, remote_ref: &str, local_id: LocalId) {
        self.resolved
            .entry(kind)
            .or_default()
            .insert(remote_ref.to_string(), local_id);
    }

    pub fn get(&self, kind: EntityKind, remote_ref: &str) -> Option<LocalId> {
        self.resolved.get(&kind)?.get(remote_ref).copied()
    }

    /// Remote refs of `kind` seen so far in this pass.
    pub fn seen(&self, kind: EntityKind) -> BTreeSet<String> {
        self.resolved
            .get(&kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&mut self, kind: EntityKind, action: UpsertAction) {
        self.stats.entry(kind).or_default().record(action);
    }

    pub fn stats_mut(&mut self, kind: EntityKind) -> &mut KindStats {
        self.stats.entry(kind).or_default()
    }

    pub fn into_stats(self) -> BTreeMap<EntityKind, KindStats> {
        self.stats
    }
}

/// Net effect of two writes to the same record within one pass.
pub fn combine(first: UpsertAction, second: UpsertAction) -> UpsertAction {
    match (first, second) {
        (UpsertAction::Created, _) => UpsertAction::Created,
        (UpsertAction::Reactivated, _) => UpsertAction::Reactivated,
        (UpsertAction::Updated, _) | (_, UpsertAction::Updated) => UpsertAction::Updated,
        _ => UpsertAction::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_storage::{InventoryGroupAttrs, MemoryStorage, TargetRecord};

    fn group(name: &str) -> EntityAttributes {
        EntityAttributes::InventoryGroup(InventoryGroupAttrs { name: name.into() })
    }

    #[tokio::test]
    async fn remembers_resolved_refs_per_kind() {
        let storage = MemoryStorage::new();
        storage
            .register_target(TargetRecord::new("t1", "http://tower"))
            .await
            .unwrap();
        let mut resolver = Resolver::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        let out = resolver
            .upsert(&storage, &mut tx, "t1", "24", group("hello_inventory"))
            .await
            .unwrap();
        storage.commit_transaction(tx).await.unwrap();

        assert_eq!(resolver.get(EntityKind::InventoryGroup, "24"), Some(out.local_id));
        assert_eq!(resolver.get(EntityKind::ConfiguredSystem, "24"), None);
        assert_eq!(
            resolver.seen(EntityKind::InventoryGroup).into_iter().collect::<Vec<_>>(),
            vec!["24".to_string()]
        );
        assert!(resolver.seen(EntityKind::Credential).is_empty());
    }

    #[test]
    fn combine_keeps_the_stronger_action() {
        use UpsertAction::*;
        assert_eq!(combine(Created, Updated), Created);
        assert_eq!(combine(Reactivated, Unchanged), Reactivated);
        assert_eq!(combine(Unchanged, Updated), Updated);
        assert_eq!(combine(Updated, Unchanged), Updated);
        assert_eq!(combine(Unchanged, Unchanged), Unchanged);
    }
}
