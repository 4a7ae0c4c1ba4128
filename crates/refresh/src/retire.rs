//! Retirement of records that disappeared from the remote.

use std::collections::BTreeMap;

use tracing::info;

use invsync_storage::{EntityKind, InventoryStorage, RetireMode, StorageError};

use crate::resolve::Resolver;

/// Retirement mode per kind. Kinds without an override use
/// [`EntityKind::default_retire_mode`].
///
/// Payloads are always hard-deleted: a source's payload set is replaced
/// whole on every pass, so there is no retired payload to keep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetirementPolicy {
    overrides: BTreeMap<EntityKind, RetireMode>,
}

impl RetirementPolicy {
    pub fn with(mut self, kind: EntityKind, mode: RetireMode) -> Self {
        self.overrides.insert(kind, mode);
        self
    }

    pub fn mode_for(&self, kind: EntityKind) -> RetireMode {
        if kind == EntityKind::ScriptPayload {
            return RetireMode::Hard;
        }
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_retire_mode())
    }
}

/// Dependents before the records they point at.
const RETIREMENT_ORDER: [EntityKind; 6] = [
    EntityKind::ConfigurationScript,
    EntityKind::ConfiguredSystem,
    EntityKind::ScriptSource,
    EntityKind::ScriptPayload,
    EntityKind::Credential,
    EntityKind::InventoryGroup,
];

/// Retire every record of the target that was not seen in this pass.
///
/// A retired source loses its payloads, whatever the payload mode.
pub async fn retire_unseen<S: InventoryStorage>(
    storage: &S,
    tx: &mut S::Transaction,
    target_id: &str,
    policy: &RetirementPolicy,
    resolver: &mut Resolver,
) -> Result<(), StorageError> {
    for kind in RETIREMENT_ORDER {
        let keep = resolver.seen(kind);
        let mode = policy.mode_for(kind);

        let retired = if kind == EntityKind::ScriptSource {
            // Flag first so the payloads can still be found under the source,
            // then delete if the mode asks for it.
            let flagged = storage
                .retire_entities_except(tx, target_id, kind, &keep, RetireMode::Soft)
                .await?;
            for source in &flagged {
                storage
                    .replace_payloads(tx, target_id, *source, Vec::new())
                    .await?;
            }
            match mode {
                RetireMode::Soft => flagged,
                RetireMode::Hard => {
                    storage
                        .retire_entities_except(tx, target_id, kind, &keep, RetireMode::Hard)
                        .await?
                }
            }
        } else {
            storage
                .retire_entities_except(tx, target_id, kind, &keep, mode)
                .await?
        };

        if !retired.is_empty() {
            info!(kind = %kind, count = retired.len(), mode = ?mode, "retired");
        }
        resolver.stats_mut(kind).retired += retired.len();
    }
    Ok(())
}
