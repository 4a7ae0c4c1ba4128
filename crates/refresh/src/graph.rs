//! Read model over one target's active entities.

use std::collections::BTreeMap;

use serde::Serialize;

use invsync_storage::{
    EntityKind, EntityRecord, InventoryStorage, LocalId, ParentLink, StorageError, TargetRecord,
};

/// Snapshot of a target's persisted graph, loaded once and queried in
/// memory. Retired records are not included.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryGraph {
    pub target: TargetRecord,
    records: BTreeMap<LocalId, EntityRecord>,
}

impl InventoryGraph {
    pub async fn load<S: InventoryStorage>(
        storage: &S,
        target_id: &str,
    ) -> Result<Self, StorageError> {
        let target = storage.get_target(target_id).await?;
        let mut records = BTreeMap::new();
        for kind in EntityKind::ALL {
            for record in storage.list_entities(target_id, kind, false).await? {
                records.insert(record.local_id, record);
            }
        }
        Ok(Self { target, records })
    }

    pub fn get(&self, id: LocalId) -> Option<&EntityRecord> {
        self.records.get(&id)
    }

    /// Active records of `kind`, ordered by local id.
    pub fn records(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
        self.records.values().filter(move |r| r.kind() == kind)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.records(kind).count()
    }

    pub fn counts(&self) -> BTreeMap<EntityKind, usize> {
        EntityKind::ALL
            .iter()
            .map(|kind| (*kind, self.count(*kind)))
            .collect()
    }

    /// First record of `kind` with this name (hostname for systems).
    pub fn find(&self, kind: EntityKind, name: &str) -> Option<&EntityRecord> {
        self.records(kind).find(|r| r.attributes.name() == name)
    }

    pub fn by_remote_ref(&self, kind: EntityKind, remote_ref: &str) -> Option<&EntityRecord> {
        self.records(kind).find(|r| r.remote_ref == remote_ref)
    }

    /// The parent record of a configuration script: another script or the
    /// payload it runs.
    pub fn parent_of(&self, script: &EntityRecord) -> Option<&EntityRecord> {
        let parent = script.as_configuration_script()?.parent?;
        match parent {
            ParentLink::Script(id) | ParentLink::Payload(id) => self.get(id),
        }
    }

    /// Scripts whose parent is `script`.
    pub fn children_of(&self, script: &EntityRecord) -> Vec<&EntityRecord> {
        self.records(EntityKind::ConfigurationScript)
            .filter(|r| {
                r.as_configuration_script()
                    .and_then(|a| a.parent)
                    .is_some_and(|p| p == ParentLink::Script(script.local_id))
            })
            .collect()
    }

    /// Inventory group of a configured system or a configuration script.
    pub fn inventory_group_of(&self, record: &EntityRecord) -> Option<&EntityRecord> {
        let id = match (record.as_configured_system(), record.as_configuration_script()) {
            (Some(system), _) => system.inventory_group?,
            (_, Some(script)) => script.inventory_group?,
            _ => return None,
        };
        self.get(id)
    }

    pub fn systems_in_group(&self, group: &EntityRecord) -> Vec<&EntityRecord> {
        self.records(EntityKind::ConfiguredSystem)
            .filter(|r| {
                r.as_configured_system()
                    .is_some_and(|s| s.inventory_group == Some(group.local_id))
            })
            .collect()
    }

    /// Credentials attached to a script (in attachment order) or a source.
    pub fn credentials_of(&self, record: &EntityRecord) -> Vec<&EntityRecord> {
        let ids: Vec<LocalId> = if let Some(script) = record.as_configuration_script() {
            script.credentials.clone()
        } else if let Some(source) = record.as_script_source() {
            source.credential.into_iter().collect()
        } else {
            Vec::new()
        };
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn payloads_of(&self, source: &EntityRecord) -> Vec<&EntityRecord> {
        self.records(EntityKind::ScriptPayload)
            .filter(|r| {
                r.as_script_payload()
                    .is_some_and(|p| p.source == source.local_id)
            })
            .collect()
    }

    pub fn source_of(&self, payload: &EntityRecord) -> Option<&EntityRecord> {
        self.get(payload.as_script_payload()?.source)
    }
}
