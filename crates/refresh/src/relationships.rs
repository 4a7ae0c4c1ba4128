//! Relationship building.
//!
//! Every edge is resolved against the pass's [`Resolver`] index. A reference
//! that cannot be resolved leaves the edge unset and adds a
//! [`RefreshWarning::RelationshipGap`].

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use invsync_snapshot::{payload_ref, RawConfigurationScript, RawParentRef};
use invsync_storage::{
    CounterpartLookup, CounterpartRef, EntityKind, LocalId, ParentLink, StorageError,
};

use crate::report::RefreshWarning;
use crate::resolve::Resolver;

pub fn gap(
    warnings: &mut Vec<RefreshWarning>,
    kind: EntityKind,
    remote_ref: &str,
    edge: &str,
    message: String,
) {
    warn!(kind = %kind, remote_ref, edge, "relationship gap: {}", message);
    warnings.push(RefreshWarning::RelationshipGap {
        kind,
        remote_ref: remote_ref.to_string(),
        edge: edge.to_string(),
        message,
    });
}

/// Resolve an optional single reference to a record of `target_kind`.
pub fn resolve_one(
    resolver: &Resolver,
    warnings: &mut Vec<RefreshWarning>,
    owner: (EntityKind, &str),
    edge: &str,
    target_kind: EntityKind,
    reference: Option<&str>,
) -> Option<LocalId> {
    let reference = reference.filter(|r| !r.is_empty())?;
    let resolved = resolver.get(target_kind, reference);
    if resolved.is_none() {
        gap(
            warnings,
            owner.0,
            owner.1,
            edge,
            format!("{} '{}' not resolved in this pass", target_kind, reference),
        );
    }
    resolved
}

/// Resolve a consumer's credential set. Unresolved entries are dropped,
/// duplicates collapse, order follows the snapshot.
pub fn resolve_credentials(
    resolver: &Resolver,
    warnings: &mut Vec<RefreshWarning>,
    owner: (EntityKind, &str),
    references: &[String],
) -> Vec<LocalId> {
    let mut seen = HashSet::new();
    references
        .iter()
        .filter_map(|r| {
            resolve_one(
                resolver,
                warnings,
                owner,
                "credentials",
                EntityKind::Credential,
                Some(r),
            )
        })
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Look up a system's counterpart by virtual instance ref.
pub async fn resolve_counterpart<C: CounterpartLookup + ?Sized>(
    lookup: &C,
    instance_ref: Option<&str>,
) -> Result<Option<CounterpartRef>, StorageError> {
    let Some(instance_ref) = instance_ref.filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    let found = lookup.find_by_instance_ref(instance_ref).await?;
    if found.is_none() {
        debug!(instance_ref, "no counterpart");
    }
    Ok(found)
}

/// Resolve a script's parent when it is a payload.
///
/// Script-to-script parents need every script of the pass to be resolved
/// first and are handled by [`resolve_script_parents`]; for those this
/// returns `None`.
pub fn resolve_payload_parent(
    resolver: &Resolver,
    warnings: &mut Vec<RefreshWarning>,
    script: &RawConfigurationScript,
) -> Option<ParentLink> {
    let Some(RawParentRef::Payload { source, name }) = &script.parent else {
        return None;
    };
    let id = resolver.get(EntityKind::ScriptPayload, &payload_ref(source, name));
    if id.is_none() {
        gap(
            warnings,
            EntityKind::ConfigurationScript,
            &script.remote_ref,
            "parent",
            format!("payload '{}' of source '{}' not in this pass", name, source),
        );
    }
    id.map(ParentLink::Payload)
}

/// Resolve script-to-script parent edges of the pass.
///
/// Edges are accepted in snapshot order. An edge whose parent was not
/// resolved, that points at its own script, or that would close a cycle
/// with edges accepted before it is rejected as a gap. Returns the accepted
/// parent of each child, by child remote ref.
pub fn resolve_script_parents(
    resolver: &Resolver,
    warnings: &mut Vec<RefreshWarning>,
    scripts: &[RawConfigurationScript],
) -> BTreeMap<String, LocalId> {
    let mut accepted: BTreeMap<String, LocalId> = BTreeMap::new();
    // parent ref of each accepted edge, by child ref
    let mut accepted_refs: BTreeMap<&str, &str> = BTreeMap::new();

    for script in scripts {
        let Some(RawParentRef::Script(parent_ref)) = &script.parent else {
            continue;
        };
        let child = script.remote_ref.as_str();
        if resolver.get(EntityKind::ConfigurationScript, child).is_none() {
            continue;
        }
        if parent_ref == child {
            gap(
                warnings,
                EntityKind::ConfigurationScript,
                child,
                "parent",
                "script names itself as parent".to_string(),
            );
            continue;
        }
        let Some(parent_id) = resolver.get(EntityKind::ConfigurationScript, parent_ref) else {
            gap(
                warnings,
                EntityKind::ConfigurationScript,
                child,
                "parent",
                format!("script '{}' not resolved in this pass", parent_ref),
            );
            continue;
        };

        // Walk up from the parent along accepted edges. The accepted graph
        // is acyclic, so the walk ends.
        let mut cursor = parent_ref.as_str();
        let mut closes_cycle = false;
        while let Some(next) = accepted_refs.get(cursor) {
            if *next == child {
                closes_cycle = true;
                break;
            }
            cursor = next;
        }
        if closes_cycle {
            gap(
                warnings,
                EntityKind::ConfigurationScript,
                child,
                "parent",
                format!("parent '{}' would close a cycle", parent_ref),
            );
            continue;
        }

        accepted_refs.insert(child, parent_ref.as_str());
        accepted.insert(child.to_string(), parent_id);
    }
    accepted
}
