//! Configuration schema (bqlineage.toml)

use crate::schedule::Schedule;
use crate::urn::{DEFAULT_ENV, DEFAULT_PLATFORM};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Audit log table queried when none is configured (`dataset.table`)
pub const DEFAULT_AUDIT_TABLE: &str = "fnd_audit_bq.queries";

/// Catalog connection used when none is configured
pub const DEFAULT_CONNECTION: &str = "datahub_rest_default";

/// Warehouse (audit log) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WarehouseConfig {
    /// BigQuery project that owns the audit table and the destination tables
    pub project_id: String,

    /// Audit log table inside the project (`dataset.table`)
    #[serde(default = "default_audit_table")]
    pub audit_table: String,

    /// Service accounts whose queries count as pipeline activity
    #[serde(default)]
    pub principals: Vec<String>,

    /// Region qualifier for INFORMATION_SCHEMA (e.g. "us", "europe-west1")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Datasets starting with any of these prefixes are ignored
    /// (scratch datasets such as `_script` or `personal_`)
    #[serde(default)]
    pub exclude_dataset_prefixes: Vec<String>,

    /// Service account key file; ADC is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<PathBuf>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            audit_table: default_audit_table(),
            principals: Vec::new(),
            region: None,
            exclude_dataset_prefixes: Vec::new(),
            credentials: None,
        }
    }
}

/// A named DataHub GMS endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConnection {
    /// GMS base URL (e.g. "http://localhost:8080")
    pub server: String,

    /// Personal access token sent as a bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// HTTP timeout; the client default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Metadata catalog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Identifier of the connection to emit to
    #[serde(default = "default_connection")]
    pub connection: String,

    /// Platform of the referenced datasets
    #[serde(default = "default_platform")]
    pub platform: String,

    /// DataHub fabric
    #[serde(default = "default_env")]
    pub env: String,

    /// Actor recorded on lineage audit stamps
    #[serde(default = "default_audit_actor")]
    pub audit_actor: String,

    /// Known connections by identifier
    #[serde(default)]
    pub connections: BTreeMap<String, CatalogConnection>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
            platform: default_platform(),
            env: default_env(),
            audit_actor: default_audit_actor(),
            connections: BTreeMap::new(),
        }
    }
}

impl CatalogConfig {
    /// The connection named by `connection`
    pub fn active_connection(&self) -> Result<&CatalogConnection, ConfigError> {
        self.connections.get(&self.connection).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "Unknown catalog connection '{}'. Add a [catalog.connections.{}] section",
                self.connection, self.connection
            ))
        })
    }
}

/// Failure alerting settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Slack incoming webhook; failures are only logged when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the workflow, used in run ids and alerts
    #[serde(default = "default_dag_id")]
    pub dag_id: String,

    /// Team or person responsible for the workflow
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Run cadence
    #[serde(default)]
    pub schedule: Schedule,

    #[serde(default)]
    pub warehouse: WarehouseConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Directory of the config file (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dag_id: default_dag_id(),
            owner: default_owner(),
            schedule: Schedule::default(),
            warehouse: WarehouseConfig::default(),
            catalog: CatalogConfig::default(),
            notifications: NotificationConfig::default(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl Config {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup
    ///
    /// | variable | field |
    /// |---|---|
    /// | `BQLINEAGE_PROJECT` | `warehouse.project_id` |
    /// | `BQLINEAGE_PRINCIPALS` | `warehouse.principals` (comma-separated) |
    /// | `BQLINEAGE_CATALOG_CONNECTION` | `catalog.connection` |
    /// | `DATAHUB_GMS_TOKEN` | token of the active connection |
    /// | `BQLINEAGE_SLACK_WEBHOOK` | `notifications.slack_webhook_url` |
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(project) = lookup("BQLINEAGE_PROJECT") {
            self.warehouse.project_id = project.trim().to_string();
        }

        if let Some(principals) = lookup("BQLINEAGE_PRINCIPALS") {
            self.warehouse.principals = principals
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(connection) = lookup("BQLINEAGE_CATALOG_CONNECTION") {
            self.catalog.connection = connection.trim().to_string();
        }

        if let Some(token) = lookup("DATAHUB_GMS_TOKEN") {
            if let Some(conn) = self.catalog.connections.get_mut(&self.catalog.connection) {
                conn.token = Some(token);
            }
        }

        if let Some(webhook) = lookup("BQLINEAGE_SLACK_WEBHOOK") {
            self.notifications.slack_webhook_url = Some(webhook);
        }
    }

    /// Check everything a run needs before touching any external system
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.warehouse;

        if !is_valid_project_id(&w.project_id) {
            return Err(ConfigError::Invalid(format!(
                "warehouse.project_id '{}' is not a valid project identifier",
                w.project_id
            )));
        }

        if !is_valid_table_path(&w.audit_table) {
            return Err(ConfigError::Invalid(format!(
                "warehouse.audit_table '{}' must be 'dataset.table'",
                w.audit_table
            )));
        }

        if w.principals.is_empty() {
            return Err(ConfigError::Invalid(
                "warehouse.principals must list at least one service account".to_string(),
            ));
        }

        if let Some(bad) = w.principals.iter().find(|p| !p.contains('@')) {
            return Err(ConfigError::Invalid(format!(
                "warehouse.principals entry '{}' is not an email address",
                bad
            )));
        }

        if let Some(region) = &w.region {
            if !is_valid_region(region) {
                return Err(ConfigError::Invalid(format!(
                    "warehouse.region '{}' is not a valid region",
                    region
                )));
            }
        }

        self.catalog.active_connection()?;

        Ok(())
    }
}

fn identifier_regex(cell: &'static OnceLock<regex::Regex>, pattern: &str) -> &'static regex::Regex {
    cell.get_or_init(|| regex::Regex::new(pattern).expect("static identifier pattern"))
}

/// Project ids are rendered into SQL text and cannot be bound as parameters
pub fn is_valid_project_id(project: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    // Also accepts legacy domain-scoped ids ("example.com:project")
    identifier_regex(&RE, r"^(?:[a-z0-9.\-]+:)?[A-Za-z0-9_\-]+$").is_match(project)
}

/// `dataset.table` path without quoting characters
pub fn is_valid_table_path(path: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    identifier_regex(&RE, r"^[A-Za-z0-9_]+\.[A-Za-z0-9_\-]+$").is_match(path)
}

pub fn is_valid_region(region: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    identifier_regex(&RE, r"^[a-z0-9\-]+$").is_match(region)
}

fn default_audit_table() -> String {
    DEFAULT_AUDIT_TABLE.to_string()
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_audit_actor() -> String {
    crate::event::DEFAULT_AUDIT_ACTOR.to_string()
}

fn default_dag_id() -> String {
    "bq_datahub_lineage".to_string()
}

fn default_owner() -> String {
    "data-platform".to_string()
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
