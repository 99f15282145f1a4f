//! Lineage extraction
//!
//! Runs the lineage query against the audit log and folds the returned rows
//! into a [`LineageHierarchy`]. Either the whole result set becomes a
//! hierarchy or the extraction fails.

use crate::pipeline::PipelineError;
use bqlineage_core::LineageHierarchy;
use bqlineage_warehouse::{AuditLogSource, LineageQuery};
use std::sync::Arc;
use tracing::{debug, info};

/// Output of one extraction
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub hierarchy: LineageHierarchy,

    /// Rows the query returned, before grouping
    pub rows_fetched: usize,
}

/// Reads the audit log and produces the lineage hierarchy
pub struct LineageExtractor {
    source: Arc<dyn AuditLogSource>,
    query: LineageQuery,
}

impl LineageExtractor {
    pub fn new(source: Arc<dyn AuditLogSource>, query: LineageQuery) -> Self {
        Self { source, query }
    }

    pub fn query(&self) -> &LineageQuery {
        &self.query
    }

    /// Run the query and build the hierarchy
    pub async fn extract(&self) -> Result<Extraction, PipelineError> {
        self.query.validate()?;

        info!(
            source = self.source.name(),
            project = %self.query.project_id,
            principals = self.query.principals.len(),
            "querying audit log"
        );

        let rows = self.source.fetch_lineage_rows(&self.query).await?;
        debug!(rows = rows.len(), "audit rows fetched");

        let hierarchy = LineageHierarchy::from_records(&rows)?;

        info!(
            downstream_tables = hierarchy.len(),
            upstream_edges = hierarchy.edge_count(),
            "lineage hierarchy built"
        );

        Ok(Extraction {
            rows_fetched: rows.len(),
            hierarchy,
        })
    }
}
