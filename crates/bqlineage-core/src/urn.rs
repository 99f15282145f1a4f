//! Dataset URNs
//!
//! A URN has a canonical display form `platform:project.dataset.table`
//! and a DataHub wire form
//! `urn:li:dataset:(urn:li:dataPlatform:<platform>,<name>,<env>)`.

use crate::config::{is_valid_project_id, Config, ConfigError};
use crate::lineage::TableKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform of every table this pipeline references
pub const DEFAULT_PLATFORM: &str = "bigquery";

/// DataHub fabric type used when none is configured
pub const DEFAULT_ENV: &str = "PROD";

/// Identifier of a catalogued dataset (a warehouse table)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetUrn {
    /// Data platform (e.g. "bigquery")
    pub platform: String,

    /// Fully qualified table name (`project.dataset.table`)
    pub name: String,

    /// Fabric / environment (e.g. "PROD")
    pub env: String,
}

impl DatasetUrn {
    /// Create a URN in the default environment
    pub fn new(platform: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            name: name.into(),
            env: DEFAULT_ENV.to_string(),
        }
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// DataHub wire form of this URN
    pub fn to_datahub_urn(&self) -> String {
        format!(
            "urn:li:dataset:(urn:li:dataPlatform:{},{},{})",
            self.platform, self.name, self.env
        )
    }
}

impl fmt::Display for DatasetUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.name)
    }
}

/// Builds dataset URNs for tables of a single warehouse project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrnBuilder {
    platform: String,
    project: String,
    env: String,
}

impl UrnBuilder {
    /// Fails on an empty platform or a project id that is not a BigQuery
    /// project; either would yield URNs no catalog entity matches
    pub fn new(platform: impl Into<String>, project: impl Into<String>) -> Result<Self, ConfigError> {
        let platform = platform.into();
        let project = project.into();

        if platform.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog.platform must not be empty".to_string()));
        }
        if !is_valid_project_id(&project) {
            return Err(ConfigError::Invalid(format!(
                "warehouse.project_id '{}' is not a valid BigQuery project id",
                project
            )));
        }

        Ok(Self {
            platform,
            project,
            env: DEFAULT_ENV.to_string(),
        })
    }

    /// Platform and env from `[catalog]`, project from `[warehouse]`
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self::new(&config.catalog.platform, &config.warehouse.project_id)?
            .with_env(&config.catalog.env))
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    /// URN of `project.dataset.table` for the given key
    pub fn dataset(&self, key: &TableKey) -> DatasetUrn {
        DatasetUrn::new(&self.platform, format!("{}.{}", self.project, key)).with_env(&self.env)
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn project(&self) -> &str {
        &self.project
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_form() {
        let urn = DatasetUrn::new("bigquery", "proj.ds1.t1");
        assert_eq!(urn.to_string(), "bigquery:proj.ds1.t1");
    }

    #[test]
    fn datahub_form() {
        let urn = DatasetUrn::new("bigquery", "proj.ds1.t1");
        assert_eq!(
            urn.to_datahub_urn(),
            "urn:li:dataset:(urn:li:dataPlatform:bigquery,proj.ds1.t1,PROD)"
        );

        let dev = urn.clone().with_env("DEV");
        assert_eq!(
            dev.to_datahub_urn(),
            "urn:li:dataset:(urn:li:dataPlatform:bigquery,proj.ds1.t1,DEV)"
        );
    }

    #[test]
    fn builder_prefixes_project() {
        let builder = UrnBuilder::new("bigquery", "proj").unwrap();
        let urn = builder.dataset(&TableKey::new("ds0", "src1"));

        assert_eq!(urn.to_string(), "bigquery:proj.ds0.src1");
        assert_eq!(urn.env, "PROD");
        assert_eq!(builder.project(), "proj");
        assert_eq!(builder.platform(), "bigquery");
    }

    #[test]
    fn builder_rejects_unusable_identity() {
        assert!(matches!(UrnBuilder::new("bigquery", ""), Err(ConfigError::Invalid(_))));
        assert!(matches!(UrnBuilder::new("bigquery", "my project"), Err(ConfigError::Invalid(_))));
        assert!(matches!(UrnBuilder::new("", "proj"), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_config_needs_a_project() {
        assert!(UrnBuilder::from_config(&Config::default()).is_err());

        let mut config = Config::default();
        config.warehouse.project_id = "acme-analytics".to_string();
        config.catalog.env = "DEV".to_string();
        let urn = UrnBuilder::from_config(&config)
            .unwrap()
            .dataset(&TableKey::new("ds1", "t1"));
        assert_eq!(urn.name, "acme-analytics.ds1.t1");
        assert_eq!(urn.env, "DEV");
    }
}
