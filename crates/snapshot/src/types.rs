//! Raw record types, one per entity kind.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Treat an explicit JSON `null` like an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_payload_kind() -> String {
    "playbook".to_string()
}

/// One target's remote inventory at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Version string reported by the remote, passed through verbatim.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub inventory_groups: Vec<RawInventoryGroup>,
    #[serde(default)]
    pub configured_systems: Vec<RawConfiguredSystem>,
    #[serde(default)]
    pub credentials: Vec<RawCredential>,
    #[serde(default)]
    pub script_sources: Vec<RawScriptSource>,
    #[serde(default)]
    pub script_payloads: Vec<RawScriptPayload>,
    #[serde(default)]
    pub configuration_scripts: Vec<RawConfigurationScript>,
}

impl InventorySnapshot {
    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            inventory_groups: self.inventory_groups.len(),
            configured_systems: self.configured_systems.len(),
            credentials: self.credentials.len(),
            script_sources: self.script_sources.len(),
            script_payloads: self.script_payloads.len(),
            configuration_scripts: self.configuration_scripts.len(),
        }
    }

    /// Payloads declared for one source, in snapshot order.
    pub fn payloads_of<'a>(
        &'a self,
        source_ref: &'a str,
    ) -> impl Iterator<Item = &'a RawScriptPayload> + 'a {
        self.script_payloads
            .iter()
            .filter(move |p| p.source_ref == source_ref)
    }
}

/// Number of raw records per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub inventory_groups: usize,
    pub configured_systems: usize,
    pub credentials: usize,
    pub script_sources: usize,
    pub script_payloads: usize,
    pub configuration_scripts: usize,
}

/// A remote inventory (root group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInventoryGroup {
    #[serde(rename = "ref")]
    pub remote_ref: String,
    pub name: String,
}

/// A remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConfiguredSystem {
    #[serde(rename = "ref")]
    pub remote_ref: String,
    pub hostname: String,
    #[serde(default)]
    pub inventory_ref: Option<String>,
    /// Virtual instance identifier used to find the counterpart record.
    #[serde(default)]
    pub instance_ref: Option<String>,
}

/// A remote credential. `kind` is the discriminant; `fields` holds every
/// other input the remote reported, secrets included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCredential {
    #[serde(rename = "ref")]
    pub remote_ref: String,
    pub name: String,
    #[serde(default)]
    pub userid: Option<String>,
    pub kind: String,
    #[serde(default, deserialize_with = "nullable")]
    pub fields: Map<String, Value>,
}

/// A remote project (source-control repository).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScriptSource {
    #[serde(rename = "ref")]
    pub remote_ref: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default)]
    pub credential_ref: Option<String>,
}

/// A playbook (or other payload) listed under a project.
///
/// Payloads have no remote id of their own; they are keyed by source and name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScriptPayload {
    pub source_ref: String,
    pub name: String,
    #[serde(default = "default_payload_kind")]
    pub kind: String,
}

impl RawScriptPayload {
    /// Natural key of the payload within its target.
    pub fn remote_ref(&self) -> String {
        payload_ref(&self.source_ref, &self.name)
    }
}

/// Natural key of a payload named `name` under source `source_ref`.
///
/// The source ref is length-prefixed (`<len>:<source>:<name>`) so that refs
/// and names containing `:` never map two payloads to the same key.
pub fn payload_ref(source_ref: &str, name: &str) -> String {
    format!("{}:{}:{}", source_ref.len(), source_ref, name)
}

/// Parent of a configuration script, by remote reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawParentRef {
    /// Another configuration script.
    Script(String),
    /// The payload the template runs.
    Payload { source: String, name: String },
}

/// A job template or workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConfigurationScript {
    #[serde(rename = "ref")]
    pub remote_ref: String,
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub variables: Map<String, Value>,
    /// `None` when the template has no survey.
    #[serde(default)]
    pub survey_spec: Option<Map<String, Value>>,
    #[serde(default)]
    pub inventory_ref: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub credential_refs: Vec<String>,
    #[serde(default)]
    pub parent: Option<RawParentRef>,
}
