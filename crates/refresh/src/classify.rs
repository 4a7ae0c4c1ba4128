//! Credential and payload classification.
//!
//! Maps the remote's discriminant strings onto typed kinds and extracts the
//! kind-specific extra attributes. Problems become warnings; classification
//! never aborts a pass.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use invsync_snapshot::{RawCredential, RawScriptPayload};
use invsync_storage::{CredentialAttrs, CredentialKind, EntityKind, PayloadKind};

use crate::report::RefreshWarning;

/// Input fields that hold secrets. They are never stored and never warned
/// about.
pub const SECRET_FIELDS: &[&str] = &[
    "password",
    "ssh_key_data",
    "ssh_key_unlock",
    "become_password",
    "security_token",
    "secret",
    "authorize_password",
    "vault_password",
];

/// Credential kind for a v1 API `kind` value.
pub fn credential_kind(discriminant: &str) -> Option<CredentialKind> {
    let kind = match discriminant {
        "ssh" => CredentialKind::Machine,
        "net" => CredentialKind::Network,
        "scm" => CredentialKind::Scm,
        "vault" => CredentialKind::Vault,
        "aws" => CredentialKind::Amazon,
        "azure_rm" => CredentialKind::Azure,
        "gce" => CredentialKind::Google,
        "openstack" => CredentialKind::Openstack,
        "rhv" => CredentialKind::Rhv,
        "satellite6" => CredentialKind::Satellite6,
        "vmware" => CredentialKind::Vmware,
        "cloudforms" => CredentialKind::Cloudforms,
        "rax" => CredentialKind::Rackspace,
        "azure" => CredentialKind::AzureClassic,
        _ => return None,
    };
    Some(kind)
}

pub fn payload_kind(discriminant: &str) -> Option<PayloadKind> {
    match discriminant {
        "playbook" => Some(PayloadKind::Playbook),
        _ => None,
    }
}

fn classification_warning(
    warnings: &mut Vec<RefreshWarning>,
    kind: EntityKind,
    remote_ref: &str,
    message: String,
) {
    warn!(kind = %kind, remote_ref, "{}", message);
    warnings.push(RefreshWarning::Classification {
        kind,
        remote_ref: remote_ref.to_string(),
        message,
    });
}

/// Classify a credential.
///
/// Returns `None` (with a warning) for an unknown discriminant. The stored
/// extra attributes carry exactly the kind's schema keys: absent inputs
/// become `null`, unexpected inputs are dropped with a warning and secrets
/// are dropped silently.
pub fn classify_credential(
    raw: &RawCredential,
    warnings: &mut Vec<RefreshWarning>,
) -> Option<CredentialAttrs> {
    let Some(kind) = credential_kind(&raw.kind) else {
        classification_warning(
            warnings,
            EntityKind::Credential,
            &raw.remote_ref,
            format!("unknown credential kind '{}', record skipped", raw.kind),
        );
        return None;
    };

    let schema = kind.extra_attributes();
    let mut extra = BTreeMap::new();
    for key in schema {
        let value = raw.fields.get(*key).cloned().unwrap_or(Value::Null);
        extra.insert(key.to_string(), value);
    }

    let dropped: Vec<&str> = raw
        .fields
        .keys()
        .map(String::as_str)
        .filter(|k| !schema.contains(k) && !SECRET_FIELDS.contains(k))
        .collect();
    if !dropped.is_empty() {
        classification_warning(
            warnings,
            EntityKind::Credential,
            &raw.remote_ref,
            format!(
                "fields not in the {} schema dropped: {}",
                kind.as_str(),
                dropped.join(", ")
            ),
        );
    }

    Some(CredentialAttrs {
        name: raw.name.clone(),
        userid: raw.userid.clone(),
        kind,
        extra,
    })
}

/// Classify a payload, warning and returning `None` for an unknown kind.
pub fn classify_payload(
    raw: &RawScriptPayload,
    warnings: &mut Vec<RefreshWarning>,
) -> Option<PayloadKind> {
    let kind = payload_kind(&raw.kind);
    if kind.is_none() {
        classification_warning(
            warnings,
            EntityKind::ScriptPayload,
            &raw.remote_ref(),
            format!("unknown payload kind '{}', record skipped", raw.kind),
        );
    }
    kind
}
