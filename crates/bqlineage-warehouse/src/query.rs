//! The lineage query
//!
//! Values that can be bound (`@project`, `@principals`,
//! `@excluded_prefixes`) are passed as named query parameters. Identifiers
//! that BigQuery cannot bind (project, audit table, region) are validated
//! before being rendered into the SQL text.

use crate::adapter::FetchError;
use bqlineage_core::config::{is_valid_project_id, is_valid_region, is_valid_table_path, DEFAULT_AUDIT_TABLE};
use bqlineage_core::{AuditLogEntry, AuditRecord, WarehouseConfig};
use std::collections::BTreeSet;

/// Parameters of one lineage query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageQuery {
    /// Project owning the audit table and the destination tables
    pub project_id: String,

    /// Audit table inside the project (`dataset.table`)
    pub audit_table: String,

    /// Principals whose queries are considered
    pub principals: Vec<String>,

    /// INFORMATION_SCHEMA region qualifier
    pub region: Option<String>,

    /// Dataset prefixes to ignore on either side of an edge
    pub exclude_dataset_prefixes: Vec<String>,

    /// Row limit for trial extractions; a limited query never feeds a run
    pub max_rows: Option<u64>,
}

/// Value of a named query parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    String(String),
    StringArray(Vec<String>),
}

/// A named query parameter (`@name` in the SQL)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    pub name: &'static str,
    pub value: ParamValue,
}

impl LineageQuery {
    pub fn new(project_id: impl Into<String>, principals: Vec<String>) -> Self {
        Self {
            project_id: project_id.into(),
            audit_table: DEFAULT_AUDIT_TABLE.to_string(),
            principals,
            region: None,
            exclude_dataset_prefixes: Vec::new(),
            max_rows: None,
        }
    }

    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            audit_table: config.audit_table.clone(),
            principals: config.principals.clone(),
            region: config.region.clone(),
            exclude_dataset_prefixes: config.exclude_dataset_prefixes.clone(),
            max_rows: None,
        }
    }

    pub fn with_audit_table(mut self, audit_table: impl Into<String>) -> Self {
        self.audit_table = audit_table.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_excluded_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.exclude_dataset_prefixes = prefixes;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Check the identifiers that are rendered into the SQL text
    pub fn validate(&self) -> Result<(), FetchError> {
        if !is_valid_project_id(&self.project_id) {
            return Err(FetchError::ConfigError(format!(
                "Invalid project id '{}'",
                self.project_id
            )));
        }
        if !is_valid_table_path(&self.audit_table) {
            return Err(FetchError::ConfigError(format!(
                "Invalid audit table '{}': expected 'dataset.table'",
                self.audit_table
            )));
        }
        if let Some(region) = &self.region {
            if !is_valid_region(region) {
                return Err(FetchError::ConfigError(format!("Invalid region '{}'", region)));
            }
        }
        if self.principals.is_empty() {
            return Err(FetchError::ConfigError(
                "At least one principal is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Fully qualified audit table reference
    pub fn audit_table_ref(&self) -> String {
        format!("`{}.{}`", self.project_id, self.audit_table)
    }

    /// The project's schema catalog, region-qualified when a region is set
    pub fn schemata_ref(&self) -> String {
        match &self.region {
            Some(region) => format!("`{}`.`region-{}`.INFORMATION_SCHEMA.SCHEMATA", self.project_id, region),
            None => format!("`{}`.INFORMATION_SCHEMA.SCHEMATA", self.project_id),
        }
    }

    /// Render the query text
    ///
    /// Self-referencing rows (`destinationTable = sourceTables`, e.g. DELETE
    /// statements) are dropped before the source list is unnested, so a
    /// destination listed among several sources is kept.
    pub fn render_sql(&self) -> Result<String, FetchError> {
        self.validate()?;

        let limit = self
            .max_rows
            .map(|n| format!("\nLIMIT {}", n))
            .unwrap_or_default();

        Ok(format!(
            r#"WITH bq_lineage AS (
    SELECT DISTINCT
        SPLIT(destinationTable, ".")[SAFE_OFFSET(1)] AS destination_dataset,
        SPLIT(destinationTable, ".")[SAFE_OFFSET(2)] AS destination_table,
        SPLIT(src, ".")[SAFE_OFFSET(1)] AS source_dataset,
        SPLIT(src, ".")[SAFE_OFFSET(2)] AS source_table
    FROM {audit}, UNNEST(SPLIT(sourceTables, ",")) AS src
    WHERE principalEmail IN UNNEST(@principals)
        AND SPLIT(destinationTable, ".")[SAFE_OFFSET(0)] = @project
        AND destinationTable != sourceTables
),
bq_table_list AS (
    SELECT source_dataset, source_table, destination_dataset, destination_table
    FROM bq_lineage
    WHERE destination_dataset IN (SELECT schema_name FROM {schemata})
        AND NOT EXISTS (
            SELECT 1 FROM UNNEST(@excluded_prefixes) AS prefix
            WHERE STARTS_WITH(source_dataset, prefix) OR STARTS_WITH(destination_dataset, prefix)
        )
)
SELECT DISTINCT destination_dataset, destination_table, source_dataset, source_table
FROM bq_table_list
ORDER BY destination_dataset, destination_table, source_dataset, source_table{limit}"#,
            audit = self.audit_table_ref(),
            schemata = self.schemata_ref(),
            limit = limit,
        ))
    }

    /// Named parameters referenced by [`LineageQuery::render_sql`]
    pub fn parameters(&self) -> Vec<QueryParam> {
        vec![
            QueryParam {
                name: "project",
                value: ParamValue::String(self.project_id.clone()),
            },
            QueryParam {
                name: "principals",
                value: ParamValue::StringArray(self.principals.clone()),
            },
            QueryParam {
                name: "excluded_prefixes",
                value: ParamValue::StringArray(self.exclude_dataset_prefixes.clone()),
            },
        ]
    }

    /// Evaluate the query against in-memory audit log entries
    ///
    /// Mirrors the SQL row for row, including NULL handling of
    /// `SAFE_OFFSET`, DISTINCT, ordering and LIMIT. `datasets` plays the
    /// role of `INFORMATION_SCHEMA.SCHEMATA`.
    pub fn evaluate(&self, entries: &[AuditLogEntry], datasets: &BTreeSet<String>) -> Vec<AuditRecord> {
        let mut rows = BTreeSet::new();

        for entry in entries {
            if !self.principals.iter().any(|p| p == &entry.principal_email) {
                continue;
            }

            let destination: Vec<&str> = entry.destination_table.split('.').collect();
            if destination.first() != Some(&self.project_id.as_str()) {
                continue;
            }

            if entry.destination_table == entry.source_tables {
                continue;
            }

            let destination_dataset = destination.get(1).map(|s| s.to_string());
            let destination_table = destination.get(2).map(|s| s.to_string());

            // NULL IN (...) is never true
            let Some(dataset) = destination_dataset.as_deref() else {
                continue;
            };
            if !datasets.contains(dataset) {
                continue;
            }

            for src in entry.source_tables.split(',') {
                let source: Vec<&str> = src.split('.').collect();
                let record = AuditRecord {
                    destination_dataset: destination_dataset.clone(),
                    destination_table: destination_table.clone(),
                    source_dataset: source.get(1).map(|s| s.to_string()),
                    source_table: source.get(2).map(|s| s.to_string()),
                };

                if self.is_excluded(&record) {
                    continue;
                }
                rows.insert(record);
            }
        }

        let limit = self.max_rows.map(|n| n as usize).unwrap_or(usize::MAX);
        rows.into_iter().take(limit).collect()
    }

    fn is_excluded(&self, record: &AuditRecord) -> bool {
        // STARTS_WITH(NULL, p) is NULL, which never satisfies the predicate
        let starts_with = |value: &Option<String>, prefix: &str| {
            value.as_deref().is_some_and(|v| v.starts_with(prefix))
        };

        self.exclude_dataset_prefixes.iter().any(|prefix| {
            starts_with(&record.source_dataset, prefix)
                || starts_with(&record.destination_dataset, prefix)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SVC: &str = "etl@proj.iam.gserviceaccount.com";

    fn query() -> LineageQuery {
        LineageQuery::new("proj", vec![SVC.to_string()])
    }

    fn datasets(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn render_default_query() {
        let sql = query().render_sql().unwrap();

        assert!(sql.contains("FROM `proj.fnd_audit_bq.queries`"));
        assert!(sql.contains("principalEmail IN UNNEST(@principals)"));
        assert!(sql.contains("SPLIT(destinationTable, \".\")[SAFE_OFFSET(0)] = @project"));
        assert!(sql.contains("destinationTable != sourceTables"));
        assert!(sql.contains("SELECT schema_name FROM `proj`.INFORMATION_SCHEMA.SCHEMATA"));
        assert!(sql.ends_with("ORDER BY destination_dataset, destination_table, source_dataset, source_table"));
        assert!(!sql.contains(SVC));
    }

    #[test]
    fn render_with_region_and_limit() {
        let sql = query()
            .with_region("us")
            .with_audit_table("audit.jobs")
            .with_max_rows(10)
            .render_sql()
            .unwrap();

        assert!(sql.contains("FROM `proj.audit.jobs`"));
        assert!(sql.contains("`proj`.`region-us`.INFORMATION_SCHEMA.SCHEMATA"));
        assert!(sql.ends_with("\nLIMIT 10"));
    }

    #[test]
    fn render_rejects_unsafe_identifiers() {
        let bad_project = LineageQuery::new("proj`x", vec![SVC.to_string()]);
        assert!(matches!(bad_project.render_sql(), Err(FetchError::ConfigError(_))));

        let bad_table = query().with_audit_table("queries; --");
        assert!(matches!(bad_table.render_sql(), Err(FetchError::ConfigError(_))));

        let no_principals = LineageQuery::new("proj", vec![]);
        assert!(matches!(no_principals.render_sql(), Err(FetchError::ConfigError(_))));
    }

    #[test]
    fn parameters_carry_values() {
        let params = query()
            .with_excluded_prefixes(vec!["_script".to_string()])
            .parameters();

        assert_eq!(params.len(), 3);
        assert_eq!(params[0], QueryParam { name: "project", value: ParamValue::String("proj".into()) });
        assert_eq!(params[1].value, ParamValue::StringArray(vec![SVC.to_string()]));
        assert_eq!(params[2].value, ParamValue::StringArray(vec!["_script".to_string()]));
    }

    #[test]
    fn evaluate_unnests_sources() {
        let entries = vec![AuditLogEntry::new(SVC, "proj.ds1.t1", "proj.ds0.src2,proj.ds0.src1")];

        let rows = query().evaluate(&entries, &datasets(&["ds1"]));

        assert_eq!(
            rows,
            vec![
                AuditRecord::new("ds1", "t1", "ds0", "src1"),
                AuditRecord::new("ds1", "t1", "ds0", "src2"),
            ]
        );
    }

    #[test]
    fn evaluate_drops_self_references() {
        let entries = vec![AuditLogEntry::new(SVC, "proj.ds1.t1", "proj.ds1.t1")];
        assert!(query().evaluate(&entries, &datasets(&["ds1"])).is_empty());
    }

    #[test]
    fn evaluate_keeps_self_reference_among_several_sources() {
        let entries = vec![AuditLogEntry::new(SVC, "proj.ds1.t1", "proj.ds1.t1,proj.ds0.src1")];

        let rows = query().evaluate(&entries, &datasets(&["ds1"]));
        assert_eq!(rows.len(), 2);
        assert!(rows.contains(&AuditRecord::new("ds1", "t1", "ds1", "t1")));
    }

    #[test]
    fn evaluate_filters_principal_project_and_schemata() {
        let entries = vec![
            AuditLogEntry::new("someone@example.com", "proj.ds1.t1", "proj.ds0.a"),
            AuditLogEntry::new(SVC, "other.ds1.t1", "proj.ds0.a"),
            AuditLogEntry::new(SVC, "proj.unknown.t1", "proj.ds0.a"),
            AuditLogEntry::new(SVC, "proj", "proj.ds0.a"),
            AuditLogEntry::new(SVC, "proj.ds1.kept", "proj.ds0.a"),
        ];

        let rows = query().evaluate(&entries, &datasets(&["ds1"]));
        assert_eq!(rows, vec![AuditRecord::new("ds1", "kept", "ds0", "a")]);
    }

    #[test]
    fn evaluate_excluded_prefixes() {
        let entries = vec![
            AuditLogEntry::new(SVC, "proj.ds1.t1", "proj._script123.tmp,proj.ds0.a"),
            AuditLogEntry::new(SVC, "proj.personal_bob.t", "proj.ds0.a"),
        ];

        let q = query().with_excluded_prefixes(vec!["_script".into(), "personal_".into()]);
        let rows = q.evaluate(&entries, &datasets(&["ds1", "personal_bob"]));

        assert_eq!(rows, vec![AuditRecord::new("ds1", "t1", "ds0", "a")]);
    }

    #[test]
    fn evaluate_keeps_short_source_as_null() {
        let entries = vec![AuditLogEntry::new(SVC, "proj.ds1.t1", "orphan")];

        let rows = query().evaluate(&entries, &datasets(&["ds1"]));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_dataset, None);
        assert_eq!(rows[0].source_table, None);
    }

    #[test]
    fn evaluate_distinct_ordered_and_limited() {
        let entries = vec![
            AuditLogEntry::new(SVC, "proj.ds2.b", "proj.ds0.x"),
            AuditLogEntry::new(SVC, "proj.ds1.a", "proj.ds0.x"),
            AuditLogEntry::new(SVC, "proj.ds1.a", "proj.ds0.x"),
            AuditLogEntry::new(SVC, "proj.ds2.a", "proj.ds0.x"),
        ];

        let rows = query().evaluate(&entries, &datasets(&["ds1", "ds2"]));
        let destinations: Vec<String> = rows
            .iter()
            .map(|r| format!("{}.{}", r.destination_dataset.as_deref().unwrap(), r.destination_table.as_deref().unwrap()))
            .collect();
        assert_eq!(destinations, vec!["ds1.a", "ds2.a", "ds2.b"]);

        let limited = query().with_max_rows(2).evaluate(&entries, &datasets(&["ds1", "ds2"]));
        assert_eq!(limited.len(), 2);
    }
}
