//! `invsync.toml` configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use invsync_storage::RetireMode;

use crate::error::ConfigError;
use crate::retire::RetirementPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target refreshed when the CLI is not told otherwise.
    #[serde(default)]
    pub target: Option<TargetConfig>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retirement: RetirementConfig,
    #[serde(default)]
    pub counterparts: CounterpartsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: String,
    /// API root, e.g. `https://tower.example.com/api/v1`
    pub url: String,
    #[serde(default)]
    pub userid: Option<String>,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
}

/// Where snapshots come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    /// A snapshot JSON document on disk.
    #[default]
    File,
    /// The remote's v1 REST API.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub source: FetchSource,

    /// Snapshot file read when `source = "file"`
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Page size requested from list endpoints
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum number of per-project requests in flight
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Environment variable holding the API bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            source: FetchSource::File,
            snapshot_path: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            token_env: default_token_env(),
        }
    }
}

/// Per-kind overrides of the retirement mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetirementConfig {
    #[serde(default)]
    pub inventory_group: Option<RetireMode>,
    #[serde(default)]
    pub configured_system: Option<RetireMode>,
    #[serde(default)]
    pub configuration_script: Option<RetireMode>,
    #[serde(default)]
    pub script_source: Option<RetireMode>,
    /// Only `hard` is accepted; payloads are replaced as a set.
    #[serde(default)]
    pub script_payload: Option<RetireMode>,
    #[serde(default)]
    pub credential: Option<RetireMode>,
}

impl RetirementConfig {
    pub fn policy(&self) -> RetirementPolicy {
        use invsync_storage::EntityKind::*;

        let mut policy = RetirementPolicy::default();
        let overrides = [
            (InventoryGroup, self.inventory_group),
            (ConfiguredSystem, self.configured_system),
            (ConfigurationScript, self.configuration_script),
            (ScriptSource, self.script_source),
            (ScriptPayload, self.script_payload),
            (Credential, self.credential),
        ];
        for (kind, mode) in overrides {
            if let Some(mode) = mode {
                policy = policy.with(kind, mode);
            }
        }
        policy
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterpartsConfig {
    /// JSON object mapping virtual instance refs to counterpart ids
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool { true }
fn default_page_size() -> u32 { 100 }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_concurrency() -> usize { 4 }
fn default_token_env() -> String { "INVSYNC_API_TOKEN".to_string() }

impl Config {
    /// Load a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.page_size == 0 {
            return Err(ConfigError::Invalid("fetch.page_size must be positive".into()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch.timeout_secs must be positive".into()));
        }
        if self.retirement.script_payload == Some(RetireMode::Soft) {
            return Err(ConfigError::Invalid(
                "retirement.script_payload must be 'hard': payloads are replaced as a set".into(),
            ));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch.max_concurrency must be positive".into(),
            ));
        }
        if let Some(target) = &self.target {
            if target.id.trim().is_empty() {
                return Err(ConfigError::Invalid("target.id must not be empty".into()));
            }
        }
        Ok(())
    }
}
