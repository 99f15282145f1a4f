//! Mock audit log source for testing
//!
//! This source holds raw audit log entries in memory and answers the lineage
//! query by evaluating it with [`LineageQuery::evaluate`], so principal,
//! project, schema-catalog and self-reference filtering behave as they do in
//! BigQuery. It's useful for:
//! - Unit testing the extractor and the pipeline
//! - Dry runs of the CLI without credentials
//! - Simulating query and connection failures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bqlineage_warehouse::{MockAuditSource, AuditLogSource, LineageQuery};
//! use bqlineage_core::AuditLogEntry;
//!
//! let source = MockAuditSource::new();
//! source.add_dataset("ds1").await;
//! source.add_entry(AuditLogEntry::new("etl@p.iam.gserviceaccount.com", "p.ds1.t1", "p.ds0.src")).await;
//!
//! let rows = source.fetch_lineage_rows(&query).await?;
//! ```
//!
//! ## Simulating Failures
//!
//! ```rust,ignore
//! // Every query fails
//! let source = MockAuditSource::new().with_query_error(FetchError::PermissionDenied("no".into()));
//!
//! // Simulate network latency
//! let source = MockAuditSource::new().with_latency(100); // 100ms delay
//! ```

use crate::adapter::{AuditLogSource, FetchError};
use crate::query::LineageQuery;
use bqlineage_core::{AuditLogEntry, AuditRecord};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mock audit log source
///
/// Clones share state, so a test can keep a handle and inspect how often
/// the source was queried after handing it to a pipeline.
pub struct MockAuditSource {
    /// Raw audit log rows
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,

    /// Datasets visible in the project's schema catalog
    datasets: Arc<RwLock<BTreeSet<String>>>,

    /// Rows returned verbatim instead of evaluating the query
    canned_rows: Arc<RwLock<Option<Vec<AuditRecord>>>>,

    /// Error returned by every query
    query_error: Option<FetchError>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate query latency (milliseconds)
    latency_ms: u64,

    /// Number of lineage queries answered or failed
    query_count: Arc<AtomicUsize>,
}

impl MockAuditSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            datasets: Arc::new(RwLock::new(BTreeSet::new())),
            canned_rows: Arc::new(RwLock::new(None)),
            query_error: None,
            fail_connection: false,
            latency_ms: 0,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a raw audit log row
    pub async fn add_entry(&self, entry: AuditLogEntry) {
        self.entries.write().await.push(entry);
    }

    /// Register a dataset in the schema catalog
    pub async fn add_dataset(&self, dataset: impl Into<String>) {
        self.datasets.write().await.insert(dataset.into());
    }

    /// Return these rows for every query, bypassing evaluation
    ///
    /// Useful for feeding malformed rows that BigQuery could produce.
    pub async fn set_rows(&self, rows: Vec<AuditRecord>) {
        *self.canned_rows.write().await = Some(rows);
    }

    /// Configure an error to be returned by every query
    pub fn with_query_error(mut self, error: FetchError) -> Self {
        self.query_error = Some(error);
        self
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for all operations
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Number of times `fetch_lineage_rows` was called
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Clear all stored entries and canned rows
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        *self.canned_rows.write().await = None;
    }

    /// Simulate latency if configured
    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockAuditSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockAuditSource {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            datasets: Arc::clone(&self.datasets),
            canned_rows: Arc::clone(&self.canned_rows),
            query_error: self.query_error.clone(),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            query_count: Arc::clone(&self.query_count),
        }
    }
}

#[async_trait::async_trait]
impl AuditLogSource for MockAuditSource {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn fetch_lineage_rows(&self, query: &LineageQuery) -> Result<Vec<AuditRecord>, FetchError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = &self.query_error {
            return Err(error.clone());
        }

        // Same validation BigQuery would hit when rendering the SQL
        query.validate()?;

        if let Some(rows) = self.canned_rows.read().await.as_ref() {
            return Ok(rows.clone());
        }

        let entries = self.entries.read().await;
        let datasets = self.datasets.read().await;
        Ok(query.evaluate(&entries, &datasets))
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(FetchError::NetworkError(
                "Simulated connection failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Builder for creating a MockAuditSource with audit log contents
///
/// # Example
///
/// ```rust,ignore
/// let source = MockAuditSourceBuilder::new()
///     .with_datasets(&["ds1", "ds2"])
///     .with_entry("etl@p.iam.gserviceaccount.com", "p.ds1.t1", "p.ds0.a,p.ds0.b")
///     .build();
/// ```
pub struct MockAuditSourceBuilder {
    entries: Vec<AuditLogEntry>,
    datasets: BTreeSet<String>,
    canned_rows: Option<Vec<AuditRecord>>,
    query_error: Option<FetchError>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockAuditSourceBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            datasets: BTreeSet::new(),
            canned_rows: None,
            query_error: None,
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Add a raw audit log row
    pub fn with_entry(mut self, principal: &str, destination_table: &str, source_tables: &str) -> Self {
        self.entries.push(AuditLogEntry::new(principal, destination_table, source_tables));
        self
    }

    pub fn with_entries(mut self, entries: impl IntoIterator<Item = AuditLogEntry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Register datasets in the schema catalog
    pub fn with_datasets(mut self, datasets: &[&str]) -> Self {
        self.datasets.extend(datasets.iter().map(|d| d.to_string()));
        self
    }

    /// Return these rows verbatim
    pub fn with_rows(mut self, rows: Vec<AuditRecord>) -> Self {
        self.canned_rows = Some(rows);
        self
    }

    pub fn with_query_error(mut self, error: FetchError) -> Self {
        self.query_error = Some(error);
        self
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Build the MockAuditSource
    pub fn build(self) -> MockAuditSource {
        MockAuditSource {
            entries: Arc::new(RwLock::new(self.entries)),
            datasets: Arc::new(RwLock::new(self.datasets)),
            canned_rows: Arc::new(RwLock::new(self.canned_rows)),
            query_error: self.query_error,
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for MockAuditSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
