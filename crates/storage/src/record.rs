use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Engine-assigned identity of a persisted record.
///
/// Assigned once by the storage backend and never reused, even after the
/// record is hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The entity kinds a target owns. Remote references are unique per
/// (target, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    InventoryGroup,
    ConfiguredSystem,
    ConfigurationScript,
    ScriptSource,
    ScriptPayload,
    Credential,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::InventoryGroup,
        EntityKind::Credential,
        EntityKind::ScriptSource,
        EntityKind::ScriptPayload,
        EntityKind::ConfiguredSystem,
        EntityKind::ConfigurationScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::InventoryGroup => "inventory_group",
            EntityKind::ConfiguredSystem => "configured_system",
            EntityKind::ConfigurationScript => "configuration_script",
            EntityKind::ScriptSource => "configuration_script_source",
            EntityKind::ScriptPayload => "configuration_script_payload",
            EntityKind::Credential => "credential",
        }
    }

    /// Payloads are wholly owned by their source and carry no identity worth
    /// keeping; everything else may be referenced from outside the engine.
    pub fn default_retire_mode(&self) -> RetireMode {
        match self {
            EntityKind::ScriptPayload => RetireMode::Hard,
            _ => RetireMode::Soft,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How records that disappeared from the remote are retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireMode {
    /// Keep the row, flag it retired. Local identity stays resolvable.
    Soft,
    /// Delete the row.
    Hard,
}

// ── Typed kinds ───────────────────────────────────────────────────────────────

/// Concrete credential kind, each with a fixed extra-attribute schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Machine,
    Network,
    Scm,
    Vault,
    Amazon,
    Azure,
    Google,
    Openstack,
    Rhv,
    Satellite6,
    Vmware,
    Cloudforms,
    Rackspace,
    AzureClassic,
}

impl CredentialKind {
    /// Ordered set of non-secret option keys stored for this kind.
    pub fn extra_attributes(&self) -> &'static [&'static str] {
        match self {
            CredentialKind::Machine => &["become_method", "become_username"],
            CredentialKind::Network => &["authorize", "host"],
            CredentialKind::Scm
            | CredentialKind::Vault
            | CredentialKind::Amazon
            | CredentialKind::Rackspace => &[],
            CredentialKind::Azure => &["client", "subscription", "tenant"],
            CredentialKind::Google => &["project"],
            CredentialKind::Openstack => &["domain", "host", "project"],
            CredentialKind::AzureClassic => &["subscription"],
            CredentialKind::Rhv
            | CredentialKind::Satellite6
            | CredentialKind::Vmware
            | CredentialKind::Cloudforms => &["host"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::Machine => "machine",
            CredentialKind::Network => "network",
            CredentialKind::Scm => "scm",
            CredentialKind::Vault => "vault",
            CredentialKind::Amazon => "amazon",
            CredentialKind::Azure => "azure",
            CredentialKind::Google => "google",
            CredentialKind::Openstack => "openstack",
            CredentialKind::Rhv => "rhv",
            CredentialKind::Satellite6 => "satellite6",
            CredentialKind::Vmware => "vmware",
            CredentialKind::Cloudforms => "cloudforms",
            CredentialKind::Rackspace => "rackspace",
            CredentialKind::AzureClassic => "azure_classic",
        }
    }
}

/// Concrete payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Playbook,
}

// ── Target ────────────────────────────────────────────────────────────────────

/// A remote automation endpoint and its refresh status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
    pub url: String,
    pub userid: Option<String>,
    pub verify_ssl: bool,
    /// Version string reported by the remote, surfaced verbatim.
    pub api_version: Option<String>,
    /// `None` only after a fully successful refresh (or before the first one).
    pub last_refresh_error: Option<String>,
    /// RFC 3339 timestamp of the last finished pass, successful or not.
    pub last_refresh_at: Option<String>,
    /// SHA-256 of the last successfully applied snapshot.
    pub last_snapshot_digest: Option<String>,
}

impl TargetRecord {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            userid: None,
            verify_ssl: true,
            api_version: None,
            last_refresh_error: None,
            last_refresh_at: None,
            last_snapshot_digest: None,
        }
    }
}

/// Status written on a target at the end of a pass.
///
/// `api_version` and `snapshot_digest` are only overwritten when `Some`, so a
/// failed pass keeps the values of the last good one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatusUpdate {
    pub error: Option<String>,
    pub refreshed_at: String,
    pub api_version: Option<String>,
    pub snapshot_digest: Option<String>,
}

// ── Entities ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryGroupAttrs {
    pub name: String,
}

/// Weak reference to a record owned by another subsystem, matched by its
/// instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartRef {
    pub id: String,
    pub instance_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredSystemAttrs {
    pub hostname: String,
    pub virtual_instance_ref: Option<String>,
    pub inventory_group: Option<LocalId>,
    pub counterpart: Option<CounterpartRef>,
}

/// Parent edge of a configuration script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentLink {
    /// Another configuration script (workflow edge).
    Script(LocalId),
    /// The playbook payload the template runs.
    Payload(LocalId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationScriptAttrs {
    pub name: String,
    pub description: String,
    pub variables: Map<String, Value>,
    /// Empty object when the remote declares no survey.
    pub survey_spec: Map<String, Value>,
    pub inventory_group: Option<LocalId>,
    pub credentials: Vec<LocalId>,
    pub parent: Option<ParentLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSourceAttrs {
    pub name: String,
    pub description: String,
    pub credential: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptPayloadAttrs {
    pub name: String,
    pub kind: PayloadKind,
    pub source: LocalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialAttrs {
    pub name: String,
    pub userid: Option<String>,
    pub kind: CredentialKind,
    /// Keys are exactly `kind.extra_attributes()`; missing values are `null`.
    pub extra: BTreeMap<String, Value>,
}

/// Kind-specific attributes of an entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityAttributes {
    InventoryGroup(InventoryGroupAttrs),
    ConfiguredSystem(ConfiguredSystemAttrs),
    ConfigurationScript(ConfigurationScriptAttrs),
    ScriptSource(ScriptSourceAttrs),
    ScriptPayload(ScriptPayloadAttrs),
    Credential(CredentialAttrs),
}

impl EntityAttributes {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityAttributes::InventoryGroup(_) => EntityKind::InventoryGroup,
            EntityAttributes::ConfiguredSystem(_) => EntityKind::ConfiguredSystem,
            EntityAttributes::ConfigurationScript(_) => EntityKind::ConfigurationScript,
            EntityAttributes::ScriptSource(_) => EntityKind::ScriptSource,
            EntityAttributes::ScriptPayload(_) => EntityKind::ScriptPayload,
            EntityAttributes::Credential(_) => EntityKind::Credential,
        }
    }

    /// Display name of the entity, whatever its kind.
    pub fn name(&self) -> &str {
        match self {
            EntityAttributes::InventoryGroup(a) => &a.name,
            EntityAttributes::ConfiguredSystem(a) => &a.hostname,
            EntityAttributes::ConfigurationScript(a) => &a.name,
            EntityAttributes::ScriptSource(a) => &a.name,
            EntityAttributes::ScriptPayload(a) => &a.name,
            EntityAttributes::Credential(a) => &a.name,
        }
    }
}

/// A persisted entity of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub local_id: LocalId,
    pub target_id: String,
    pub remote_ref: String,
    pub retired: bool,
    pub attributes: EntityAttributes,
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        self.attributes.kind()
    }

    pub fn as_inventory_group(&self) -> Option<&InventoryGroupAttrs> {
        match &self.attributes {
            EntityAttributes::InventoryGroup(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_configured_system(&self) -> Option<&ConfiguredSystemAttrs> {
        match &self.attributes {
            EntityAttributes::ConfiguredSystem(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_configuration_script(&self) -> Option<&ConfigurationScriptAttrs> {
        match &self.attributes {
            EntityAttributes::ConfigurationScript(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_script_source(&self) -> Option<&ScriptSourceAttrs> {
        match &self.attributes {
            EntityAttributes::ScriptSource(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_script_payload(&self) -> Option<&ScriptPayloadAttrs> {
        match &self.attributes {
            EntityAttributes::ScriptPayload(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_credential(&self) -> Option<&CredentialAttrs> {
        match &self.attributes {
            EntityAttributes::Credential(a) => Some(a),
            _ => None,
        }
    }
}

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
    /// A soft-retired record was seen again and brought back.
    Reactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub local_id: LocalId,
    pub action: UpsertAction,
}

/// A payload to insert under a source by `replace_payloads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDraft {
    pub remote_ref: String,
    pub name: String,
    pub kind: PayloadKind,
}
