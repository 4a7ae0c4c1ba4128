//! The reconciler: one full refresh pass of one target.
//!
//! A pass fetches a snapshot and then runs the stages below in order, each in
//! its own storage transaction:
//!
//! 1. inventory groups
//! 2. credentials
//! 3. script sources, each followed by a full replace of its payloads
//! 4. configured systems
//! 5. configuration scripts, attributes first, then script-to-script parents
//! 6. retirement of everything not seen
//!
//! Finally the refresh status is written on the target. A fetch failure
//! writes nothing but that status. A storage failure aborts the current
//! stage, keeps the earlier ones, skips the rest and records the failure.

use std::fmt;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use invsync_snapshot::{InventorySnapshot, RawParentRef};
use invsync_storage::{
    ConfigurationScriptAttrs, ConfiguredSystemAttrs, CounterpartLookup, EntityAttributes,
    EntityKind, EntityRecord, InventoryGroupAttrs, InventoryStorage, LocalId, ParentLink,
    PayloadDraft, RefreshStatusUpdate, ScriptSourceAttrs, StorageError, TargetRecord,
    UpsertAction,
};

use crate::classify::{classify_credential, classify_payload};
use crate::error::RefreshError;
use crate::fetch::SnapshotFetcher;
use crate::relationships::{
    gap, resolve_counterpart, resolve_credentials, resolve_one, resolve_payload_parent,
    resolve_script_parents,
};
use crate::report::{RefreshOutcome, RefreshReport, RefreshWarning};
use crate::resolve::{combine, Resolver};
use crate::retire::{retire_unseen, RetirementPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Groups,
    Credentials,
    Sources,
    Systems,
    Scripts,
    Retirement,
}

impl Stage {
    const ALL: [Stage; 6] = [
        Stage::Groups,
        Stage::Credentials,
        Stage::Sources,
        Stage::Systems,
        Stage::Scripts,
        Stage::Retirement,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Groups => "inventory groups",
            Stage::Credentials => "credentials",
            Stage::Sources => "script sources",
            Stage::Systems => "configured systems",
            Stage::Scripts => "configuration scripts",
            Stage::Retirement => "retirement",
        })
    }
}

/// Mutable state of one pass.
struct Pass<'a> {
    target_id: &'a str,
    snapshot: &'a InventorySnapshot,
    resolver: Resolver,
    warnings: Vec<RefreshWarning>,
}

/// Drives refresh passes against one store.
pub struct Refresher<S, F, C> {
    storage: S,
    fetcher: F,
    counterparts: C,
    retirement: RetirementPolicy,
}

impl<S, F, C> Refresher<S, F, C>
where
    S: InventoryStorage,
    F: SnapshotFetcher,
    C: CounterpartLookup,
{
    pub fn new(storage: S, fetcher: F, counterparts: C) -> Self {
        Self {
            storage,
            fetcher,
            counterparts,
            retirement: RetirementPolicy::default(),
        }
    }

    pub fn with_retirement(mut self, policy: RetirementPolicy) -> Self {
        self.retirement = policy;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Run one full pass for `target_id`.
    ///
    /// Returns `Err` only when the target does not exist or the end-of-pass
    /// status cannot be written; every other failure is reported in the
    /// returned report and on the target.
    pub async fn refresh(&self, target_id: &str) -> Result<RefreshReport, RefreshError> {
        let started_at = now_rfc3339();
        let target = self.storage.get_target(target_id).await?;
        info!(target_id, "refresh started");

        let snapshot = match self.fetcher.fetch_snapshot(&target).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let reason = format!("fetch failed: {}", e);
                error!(target_id, "{}", reason);
                let finished_at = self
                    .write_status(target_id, Some(reason.clone()), None, None)
                    .await?;
                return Ok(RefreshReport {
                    target_id: target_id.to_string(),
                    outcome: RefreshOutcome::Failed { reason },
                    api_version: None,
                    snapshot_digest: None,
                    unchanged: false,
                    started_at,
                    finished_at,
                    stats: Default::default(),
                    warnings: Vec::new(),
                });
            }
        };

        let digest = match snapshot.digest() {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(target_id, "snapshot digest unavailable: {}", e);
                None
            }
        };
        let unchanged = is_unchanged(&target, digest.as_deref());
        let counts = snapshot.counts();
        info!(
            target_id,
            api_version = snapshot.api_version.as_deref().unwrap_or("unknown"),
            groups = counts.inventory_groups,
            systems = counts.configured_systems,
            credentials = counts.credentials,
            sources = counts.script_sources,
            payloads = counts.script_payloads,
            scripts = counts.configuration_scripts,
            unchanged,
            "snapshot fetched"
        );

        let mut pass = Pass {
            target_id,
            snapshot: &snapshot,
            resolver: Resolver::new(),
            warnings: Vec::new(),
        };

        let mut failure = None;
        for stage in Stage::ALL {
            if let Err(e) = self.run_stage(stage, &mut pass).await {
                let reason = format!("{} stage failed: {}", stage, e);
                error!(target_id, "{}", reason);
                failure = Some(reason);
                break;
            }
            info!(target_id, stage = %stage, "stage committed");
        }

        let Pass {
            resolver, warnings, ..
        } = pass;

        let (outcome, finished_at) = match failure {
            None => {
                let finished_at = self
                    .write_status(target_id, None, snapshot.api_version.clone(), digest.clone())
                    .await?;
                (RefreshOutcome::Ok, finished_at)
            }
            Some(reason) => {
                let finished_at = self
                    .write_status(target_id, Some(reason.clone()), None, None)
                    .await?;
                (RefreshOutcome::Failed { reason }, finished_at)
            }
        };

        info!(
            target_id,
            ok = outcome == RefreshOutcome::Ok,
            warnings = warnings.len(),
            "refresh finished"
        );
        Ok(RefreshReport {
            target_id: target_id.to_string(),
            outcome,
            api_version: snapshot.api_version.clone(),
            snapshot_digest: digest,
            unchanged,
            started_at,
            finished_at,
            stats: resolver.into_stats(),
            warnings,
        })
    }

    async fn run_stage(&self, stage: Stage, pass: &mut Pass<'_>) -> Result<(), StorageError> {
        let mut tx = self.storage.begin_transaction().await?;
        let result = match stage {
            Stage::Groups => self.sync_groups(&mut tx, pass).await,
            Stage::Credentials => self.sync_credentials(&mut tx, pass).await,
            Stage::Sources => self.sync_sources(&mut tx, pass).await,
            Stage::Systems => self.sync_systems(&mut tx, pass).await,
            Stage::Scripts => self.sync_scripts(&mut tx, pass).await,
            Stage::Retirement => {
                retire_unseen(
                    &self.storage,
                    &mut tx,
                    pass.target_id,
                    &self.retirement,
                    &mut pass.resolver,
                )
                .await
            }
        };
        match result {
            Ok(()) => self.storage.commit_transaction(tx).await,
            Err(e) => {
                if let Err(abort_err) = self.storage.abort_transaction(tx).await {
                    warn!(stage = %stage, "abort failed: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    /// Write the end-of-pass status in its own transaction. Returns the
    /// timestamp written.
    async fn write_status(
        &self,
        target_id: &str,
        error: Option<String>,
        api_version: Option<String>,
        snapshot_digest: Option<String>,
    ) -> Result<String, StorageError> {
        let refreshed_at = now_rfc3339();
        let mut tx = self.storage.begin_transaction().await?;
        let update = RefreshStatusUpdate {
            error,
            refreshed_at: refreshed_at.clone(),
            api_version,
            snapshot_digest,
        };
        if let Err(e) = self
            .storage
            .write_refresh_status(&mut tx, target_id, update)
            .await
        {
            let _ = self.storage.abort_transaction(tx).await;
            return Err(e);
        }
        self.storage.commit_transaction(tx).await?;
        Ok(refreshed_at)
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    async fn sync_groups(
        &self,
        tx: &mut S::Transaction,
        pass: &mut Pass<'_>,
    ) -> Result<(), StorageError> {
        for raw in &pass.snapshot.inventory_groups {
            let attrs = EntityAttributes::InventoryGroup(InventoryGroupAttrs {
                name: raw.name.clone(),
            });
            let out = pass
                .resolver
                .upsert(&self.storage, tx, pass.target_id, &raw.remote_ref, attrs)
                .await?;
            pass.resolver.count(EntityKind::InventoryGroup, out.action);
        }
        Ok(())
    }

    async fn sync_credentials(
        &self,
        tx: &mut S::Transaction,
        pass: &mut Pass<'_>,
    ) -> Result<(), StorageError> {
        for raw in &pass.snapshot.credentials {
            let Some(attrs) = classify_credential(raw, &mut pass.warnings) else {
                pass.resolver.stats_mut(EntityKind::Credential).skipped += 1;
                continue;
            };
            let out = pass
                .resolver
                .upsert(
                    &self.storage,
                    tx,
                    pass.target_id,
                    &raw.remote_ref,
                    EntityAttributes::Credential(attrs),
                )
                .await?;
            pass.resolver.count(EntityKind::Credential, out.action);
        }
        Ok(())
    }

    async fn sync_sources(
        &self,
        tx: &mut S::Transaction,
        pass: &mut Pass<'_>,
    ) -> Result<(), StorageError> {
        let snapshot = pass.snapshot;
        for raw in &snapshot.script_sources {
            let owner = (EntityKind::ScriptSource, raw.remote_ref.as_str());
            let credential = resolve_one(
                &pass.resolver,
                &mut pass.warnings,
                owner,
                "credential",
                EntityKind::Credential,
                raw.credential_ref.as_deref(),
            );
            let attrs = EntityAttributes::ScriptSource(ScriptSourceAttrs {
                name: raw.name.clone(),
                description: raw.description.clone(),
                credential,
            });
            let out = pass
                .resolver
                .upsert(&self.storage, tx, pass.target_id, &raw.remote_ref, attrs)
                .await?;
            pass.resolver.count(EntityKind::ScriptSource, out.action);

            let mut drafts = Vec::new();
            for payload in snapshot.payloads_of(&raw.remote_ref) {
                match classify_payload(payload, &mut pass.warnings) {
                    Some(kind) => drafts.push(PayloadDraft {
                        remote_ref: payload.remote_ref(),
                        name: payload.name.clone(),
                        kind,
                    }),
                    None => pass.resolver.stats_mut(EntityKind::ScriptPayload).skipped += 1,
                }
            }
            let mut actions = Vec::with_capacity(drafts.len());
            for draft in &drafts {
                let previous = self
                    .storage
                    .find_entity(tx, pass.target_id, EntityKind::ScriptPayload, &draft.remote_ref)
                    .await?;
                actions.push(payload_action(previous.as_ref(), draft, out.local_id));
            }
            let refs: Vec<String> = drafts.iter().map(|d| d.remote_ref.clone()).collect();
            let ids = self
                .storage
                .replace_payloads(tx, pass.target_id, out.local_id, drafts)
                .await?;
            for ((remote_ref, id), action) in refs.iter().zip(&ids).zip(actions) {
                pass.resolver.remember(EntityKind::ScriptPayload, remote_ref, *id);
                pass.resolver.count(EntityKind::ScriptPayload, action);
            }
        }

        for payload in &snapshot.script_payloads {
            if pass
                .resolver
                .get(EntityKind::ScriptSource, &payload.source_ref)
                .is_none()
            {
                gap(
                    &mut pass.warnings,
                    EntityKind::ScriptPayload,
                    &payload.remote_ref(),
                    "source",
                    format!("source '{}' not in snapshot, payload skipped", payload.source_ref),
                );
                pass.resolver.stats_mut(EntityKind::ScriptPayload).skipped += 1;
            }
        }
        Ok(())
    }

    async fn sync_systems(
        &self,
        tx: &mut S::Transaction,
        pass: &mut Pass<'_>,
    ) -> Result<(), StorageError> {
        for raw in &pass.snapshot.configured_systems {
            let owner = (EntityKind::ConfiguredSystem, raw.remote_ref.as_str());
            let inventory_group = resolve_one(
                &pass.resolver,
                &mut pass.warnings,
                owner,
                "inventory_group",
                EntityKind::InventoryGroup,
                raw.inventory_ref.as_deref(),
            );
            let counterpart =
                resolve_counterpart(&self.counterparts, raw.instance_ref.as_deref()).await?;
            let attrs = EntityAttributes::ConfiguredSystem(ConfiguredSystemAttrs {
                hostname: raw.hostname.clone(),
                virtual_instance_ref: raw.instance_ref.clone(),
                inventory_group,
                counterpart,
            });
            let out = pass
                .resolver
                .upsert(&self.storage, tx, pass.target_id, &raw.remote_ref, attrs)
                .await?;
            pass.resolver.count(EntityKind::ConfiguredSystem, out.action);
        }
        Ok(())
    }

    async fn sync_scripts(
        &self,
        tx: &mut S::Transaction,
        pass: &mut Pass<'_>,
    ) -> Result<(), StorageError> {
        let snapshot = pass.snapshot;

        // Attributes. A script-to-script parent cannot be resolved until every
        // script of the pass exists, so the stored one is carried over for now.
        let mut written = Vec::with_capacity(snapshot.configuration_scripts.len());
        for raw in &snapshot.configuration_scripts {
            let owner = (EntityKind::ConfigurationScript, raw.remote_ref.as_str());
            let inventory_group = resolve_one(
                &pass.resolver,
                &mut pass.warnings,
                owner,
                "inventory_group",
                EntityKind::InventoryGroup,
                raw.inventory_ref.as_deref(),
            );
            let credentials =
                resolve_credentials(&pass.resolver, &mut pass.warnings, owner, &raw.credential_refs);
            let parent = match &raw.parent {
                Some(RawParentRef::Script(_)) => self
                    .storage
                    .find_entity(tx, pass.target_id, EntityKind::ConfigurationScript, &raw.remote_ref)
                    .await?
                    .and_then(|r| r.as_configuration_script().and_then(|a| a.parent))
                    .filter(|p| matches!(p, ParentLink::Script(_))),
                _ => resolve_payload_parent(&pass.resolver, &mut pass.warnings, raw),
            };
            let attrs = ConfigurationScriptAttrs {
                name: raw.name.clone(),
                description: raw.description.clone(),
                variables: raw.variables.clone(),
                survey_spec: raw.survey_spec.clone().unwrap_or_default(),
                inventory_group,
                credentials,
                parent,
            };
            let out = pass
                .resolver
                .upsert(
                    &self.storage,
                    tx,
                    pass.target_id,
                    &raw.remote_ref,
                    EntityAttributes::ConfigurationScript(attrs.clone()),
                )
                .await?;
            written.push((raw, attrs, out.action));
        }

        // Script-to-script parents.
        let parents = resolve_script_parents(
            &pass.resolver,
            &mut pass.warnings,
            &snapshot.configuration_scripts,
        );
        for (raw, mut attrs, action) in written {
            let mut action = action;
            if matches!(raw.parent, Some(RawParentRef::Script(_))) {
                let wanted = parents.get(&raw.remote_ref).copied().map(ParentLink::Script);
                if wanted != attrs.parent {
                    attrs.parent = wanted;
                    let out = pass
                        .resolver
                        .upsert(
                            &self.storage,
                            tx,
                            pass.target_id,
                            &raw.remote_ref,
                            EntityAttributes::ConfigurationScript(attrs),
                        )
                        .await?;
                    action = combine(action, out.action);
                }
            }
            pass.resolver.count(EntityKind::ConfigurationScript, action);
        }
        Ok(())
    }
}

/// What `replace_payloads` will do to one payload.
fn payload_action(
    previous: Option<&EntityRecord>,
    draft: &PayloadDraft,
    source: LocalId,
) -> UpsertAction {
    match previous.and_then(|r| r.as_script_payload().map(|p| (r.retired, p))) {
        None => UpsertAction::Created,
        Some((true, _)) => UpsertAction::Reactivated,
        Some((false, p)) if p.name == draft.name && p.kind == draft.kind && p.source == source => {
            UpsertAction::Unchanged
        }
        Some(_) => UpsertAction::Updated,
    }
}

fn is_unchanged(target: &TargetRecord, digest: Option<&str>) -> bool {
    target.last_refresh_error.is_none()
        && digest.is_some()
        && target.last_snapshot_digest.as_deref() == digest
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
