//! Snapshot fetcher for the automation platform's v1 REST API.
//!
//! `ureq` is synchronous, so every request runs on a blocking worker thread.
//! Per-project playbook listings and per-template survey specs are fetched
//! concurrently, bounded by `max_concurrency`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use invsync_snapshot::{
    InventorySnapshot, RawConfigurationScript, RawConfiguredSystem, RawCredential,
    RawInventoryGroup, RawParentRef, RawScriptPayload, RawScriptSource,
};
use invsync_storage::TargetRecord;

use crate::classify::SECRET_FIELDS;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::fetch::SnapshotFetcher;

/// Non-secret credential inputs the v1 API reports as top-level fields.
const CREDENTIAL_INPUTS: &[&str] = &[
    "authorize",
    "become_method",
    "become_username",
    "client",
    "domain",
    "host",
    "project",
    "subscription",
    "tenant",
];

/// Job template fields that hold a credential id.
const TEMPLATE_CREDENTIAL_FIELDS: &[&str] = &[
    "credential",
    "network_credential",
    "cloud_credential",
    "vault_credential",
];

/// Prefix that keeps workflow template refs apart from job template refs,
/// which come from a separate id space.
pub const WORKFLOW_REF_PREFIX: &str = "workflow/";

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub token: Option<String>,
    pub page_size: u32,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl HttpSettings {
    /// Settings from `[fetch]`, reading the token from `token_env`.
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            token: std::env::var(&config.token_env)
                .ok()
                .filter(|t| !t.is_empty()),
            page_size: config.page_size,
            timeout: Duration::from_secs(config.timeout_secs),
            max_concurrency: config.max_concurrency.max(1),
        }
    }
}

/// Fetches a snapshot from a target's REST API.
#[derive(Debug, Clone)]
pub struct TowerApiFetcher {
    settings: HttpSettings,
}

impl TowerApiFetcher {
    pub fn new(settings: HttpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SnapshotFetcher for TowerApiFetcher {
    async fn fetch_snapshot(
        &self,
        target: &TargetRecord,
    ) -> Result<InventorySnapshot, FetchError> {
        let client = Arc::new(ApiClient::new(target, &self.settings));
        let limit = self.settings.max_concurrency;
        info!(target_id = %target.id, root = %client.root, "fetching snapshot over http");

        let api_version = {
            let c = Arc::clone(&client);
            let config = blocking(move || c.get_json(&c.url("config/"))).await?;
            config
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let inventories = list(&client, "inventories/").await?;
        let hosts = list(&client, "hosts/").await?;
        let credentials = list(&client, "credentials/").await?;
        let projects = list(&client, "projects/").await?;
        let job_templates = list(&client, "job_templates/").await?;
        let workflows = list(&client, "workflow_job_templates/").await?;

        let script_sources = projects
            .iter()
            .map(map_project)
            .collect::<Result<Vec<_>, _>>()?;
        let playbook_paths = script_sources
            .iter()
            .map(|s| (s.remote_ref.clone(), format!("projects/{}/playbooks/", s.remote_ref)))
            .collect();
        let mut playbooks = fetch_each(&client, playbook_paths, limit).await?;
        let mut script_payloads = Vec::new();
        for source in &script_sources {
            let listing = playbooks.remove(&source.remote_ref).unwrap_or(Value::Null);
            script_payloads.extend(map_playbooks(&source.remote_ref, &listing)?);
        }

        let survey_paths = job_templates
            .iter()
            .filter(|t| survey_enabled(t))
            .filter_map(|t| id_of(t, "id"))
            .map(|id| (id.clone(), format!("job_templates/{}/survey_spec/", id)))
            .chain(
                workflows
                    .iter()
                    .filter(|t| survey_enabled(t))
                    .filter_map(|t| id_of(t, "id"))
                    .map(|id| {
                        (
                            format!("{}{}", WORKFLOW_REF_PREFIX, id),
                            format!("workflow_job_templates/{}/survey_spec/", id),
                        )
                    }),
            )
            .collect();
        let mut surveys = fetch_each(&client, survey_paths, limit).await?;

        let mut configuration_scripts = Vec::new();
        for template in &job_templates {
            let mut script = map_job_template(template)?;
            script.survey_spec = take_survey(&mut surveys, &script.remote_ref);
            configuration_scripts.push(script);
        }
        for workflow in &workflows {
            let mut script = map_workflow_template(workflow)?;
            script.survey_spec = take_survey(&mut surveys, &script.remote_ref);
            configuration_scripts.push(script);
        }

        let snapshot = InventorySnapshot {
            api_version,
            inventory_groups: inventories
                .iter()
                .map(map_inventory)
                .collect::<Result<_, _>>()?,
            configured_systems: hosts.iter().map(map_host).collect::<Result<_, _>>()?,
            credentials: credentials
                .iter()
                .map(map_credential)
                .collect::<Result<_, _>>()?,
            script_sources,
            script_payloads,
            configuration_scripts,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }
}

// ── Blocking client ──────────────────────────────────────────────────────────

struct ApiClient {
    agent: ureq::Agent,
    root: String,
    origin: String,
    token: Option<String>,
    page_size: u32,
}

impl ApiClient {
    fn new(target: &TargetRecord, settings: &HttpSettings) -> Self {
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(!target.verify_ssl)
            .build();
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(settings.timeout))
            .http_status_as_error(true)
            .tls_config(tls)
            .build();
        let root = api_root(&target.url);
        Self {
            agent: ureq::Agent::new_with_config(config),
            origin: origin_of(&root),
            root,
            token: settings.token.clone(),
            page_size: settings.page_size,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }

    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url, "GET");
        let mut request = self.agent.get(url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }
        let response = request.call().map_err(|e| classify_http_error(e, url))?;
        response
            .into_body()
            .read_json::<Value>()
            .map_err(|e| FetchError::Malformed(format!("{}: {}", url, e)))
    }

    /// Every `results` entry of a paginated list endpoint.
    fn get_paged(&self, path: &str) -> Result<Vec<Value>, FetchError> {
        let mut url = with_query(&self.url(path), "page_size", &self.page_size.to_string());
        let mut results = Vec::new();
        loop {
            let page = self.get_json(&url)?;
            match page.get("results") {
                Some(Value::Array(items)) => results.extend(items.iter().cloned()),
                _ => {
                    return Err(FetchError::Malformed(format!(
                        "{}: list response without 'results'",
                        url
                    )))
                }
            }
            match page.get("next").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => {
                    let next = resolve_next(&self.origin, next);
                    if next == url {
                        return Err(FetchError::Malformed(format!(
                            "{}: 'next' points at the same page",
                            url
                        )));
                    }
                    url = next;
                }
                _ => break,
            }
        }
        Ok(results)
    }
}

async fn blocking<T, F>(f: F) -> Result<T, FetchError>
where
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FetchError::Network(format!("task join error: {}", e)))?
}

async fn list(client: &Arc<ApiClient>, path: &'static str) -> Result<Vec<Value>, FetchError> {
    let c = Arc::clone(client);
    let items = blocking(move || c.get_paged(path)).await?;
    debug!(path, count = items.len(), "listed");
    Ok(items)
}

/// GET each `(key, path)` concurrently, at most `limit` in flight.
async fn fetch_each(
    client: &Arc<ApiClient>,
    paths: Vec<(String, String)>,
    limit: usize,
) -> Result<BTreeMap<String, Value>, FetchError> {
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    for (key, path) in paths {
        let client = Arc::clone(client);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            let value = blocking(move || client.get_json(&client.url(&path))).await?;
            Ok::<_, FetchError>((key, value))
        });
    }

    let mut out = BTreeMap::new();
    while let Some(joined) = set.join_next().await {
        let (key, value) =
            joined.map_err(|e| FetchError::Network(format!("task join error: {}", e)))??;
        out.insert(key, value);
    }
    Ok(out)
}

fn classify_http_error(err: ureq::Error, url: &str) -> FetchError {
    match err {
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            FetchError::Authentication(format!("{} returned HTTP {}", url, code))
        }
        ureq::Error::StatusCode(code) => {
            FetchError::Network(format!("{} returned HTTP {}", url, code))
        }
        other => FetchError::Network(format!("{}: {}", url, other)),
    }
}

// ── URL helpers ──────────────────────────────────────────────────────────────

/// API root for a target URL; a bare host gets `/api/v1` appended.
pub fn api_root(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.contains("/api/") {
        trimmed.to_string()
    } else {
        format!("{}/api/v1", trimmed)
    }
}

/// `scheme://host[:port]` of a URL.
fn origin_of(url: &str) -> String {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => url[..after_scheme + i].to_string(),
        None => url.to_string(),
    }
}

fn resolve_next(origin: &str, next: &str) -> String {
    if next.starts_with("http://") || next.starts_with("https://") {
        next.to_string()
    } else {
        format!("{}/{}", origin, next.trim_start_matches('/'))
    }
}

fn with_query(url: &str, key: &str, value: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, sep, key, value)
}

// ── Mapping to the normalized snapshot ───────────────────────────────────────

/// A reference field as a string; ids may come as numbers or strings.
fn id_of(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn required_id(value: &Value, what: &str) -> Result<String, FetchError> {
    id_of(value, "id").ok_or_else(|| FetchError::Malformed(format!("{} without an id", what)))
}

fn str_of(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn non_empty_str(value: &Value, field: &str) -> Option<String> {
    Some(str_of(value, field)).filter(|s| !s.is_empty())
}

fn survey_enabled(template: &Value) -> bool {
    template
        .get("survey_enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn take_survey(
    surveys: &mut BTreeMap<String, Value>,
    remote_ref: &str,
) -> Option<Map<String, Value>> {
    match surveys.remove(remote_ref)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn map_inventory(value: &Value) -> Result<RawInventoryGroup, FetchError> {
    Ok(RawInventoryGroup {
        remote_ref: required_id(value, "inventory")?,
        name: str_of(value, "name"),
    })
}

fn map_host(value: &Value) -> Result<RawConfiguredSystem, FetchError> {
    Ok(RawConfiguredSystem {
        remote_ref: required_id(value, "host")?,
        hostname: str_of(value, "name"),
        inventory_ref: id_of(value, "inventory"),
        instance_ref: non_empty_str(value, "instance_id"),
    })
}

fn map_credential(value: &Value) -> Result<RawCredential, FetchError> {
    let mut fields = Map::new();
    for key in CREDENTIAL_INPUTS.iter().chain(SECRET_FIELDS) {
        match value.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(v) => {
                fields.insert(key.to_string(), v.clone());
            }
        }
    }
    Ok(RawCredential {
        remote_ref: required_id(value, "credential")?,
        name: str_of(value, "name"),
        userid: non_empty_str(value, "username"),
        kind: str_of(value, "kind"),
        fields,
    })
}

fn map_project(value: &Value) -> Result<RawScriptSource, FetchError> {
    Ok(RawScriptSource {
        remote_ref: required_id(value, "project")?,
        name: str_of(value, "name"),
        description: str_of(value, "description"),
        credential_ref: id_of(value, "credential"),
    })
}

fn map_playbooks(source_ref: &str, listing: &Value) -> Result<Vec<RawScriptPayload>, FetchError> {
    let Value::Array(names) = listing else {
        return Err(FetchError::Malformed(format!(
            "playbook listing of project {} is not an array",
            source_ref
        )));
    };
    Ok(names
        .iter()
        .filter_map(Value::as_str)
        .map(|name| RawScriptPayload {
            source_ref: source_ref.to_string(),
            name: name.to_string(),
            kind: "playbook".to_string(),
        })
        .collect())
}

/// `extra_vars` as an object. The API reports it as JSON or YAML text; text
/// that is not a JSON object is kept verbatim under `_raw_extra_vars`.
fn parse_extra_vars(value: &Value) -> Map<String, Value> {
    match value.get("extra_vars") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match serde_json::from_str::<Map<String, Value>>(text) {
                Ok(map) => map,
                Err(_) => {
                    let mut map = Map::new();
                    map.insert("_raw_extra_vars".to_string(), Value::String(text.clone()));
                    map
                }
            }
        }
        _ => Map::new(),
    }
}

fn map_job_template(value: &Value) -> Result<RawConfigurationScript, FetchError> {
    let mut credential_refs: Vec<String> = TEMPLATE_CREDENTIAL_FIELDS
        .iter()
        .filter_map(|f| id_of(value, f))
        .collect();
    if let Some(Value::Array(extra)) = value.get("extra_credentials") {
        credential_refs.extend(extra.iter().filter_map(|v| match v {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }));
    }

    let parent = match (id_of(value, "project"), non_empty_str(value, "playbook")) {
        (Some(source), Some(name)) => Some(RawParentRef::Payload { source, name }),
        _ => None,
    };

    Ok(RawConfigurationScript {
        remote_ref: required_id(value, "job template")?,
        name: str_of(value, "name"),
        description: str_of(value, "description"),
        variables: parse_extra_vars(value),
        survey_spec: None,
        inventory_ref: id_of(value, "inventory"),
        credential_refs,
        parent,
    })
}

fn map_workflow_template(value: &Value) -> Result<RawConfigurationScript, FetchError> {
    let id = required_id(value, "workflow job template")?;
    Ok(RawConfigurationScript {
        remote_ref: format!("{}{}", WORKFLOW_REF_PREFIX, id),
        name: str_of(value, "name"),
        description: str_of(value, "description"),
        variables: parse_extra_vars(value),
        survey_spec: None,
        inventory_ref: id_of(value, "inventory"),
        credential_refs: Vec::new(),
        parent: None,
    })
}
