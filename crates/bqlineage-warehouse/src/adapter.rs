//! Audit log source trait

use crate::query::LineageQuery;
use bqlineage_core::AuditRecord;

/// Errors that can occur while reading the audit log
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audit table not found: {0}")]
    AuditTableNotFound(String),

    #[error("Query failed: {0}")]
    QueryError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A warehouse that can answer the lineage query
#[async_trait::async_trait]
pub trait AuditLogSource: Send + Sync {
    /// Get the source name (e.g., "BigQuery")
    fn name(&self) -> &'static str;

    /// Run the lineage query and return its rows in query order
    ///
    /// Any failure aborts the extraction; implementations never return a
    /// partial result set.
    async fn fetch_lineage_rows(&self, query: &LineageQuery) -> Result<Vec<AuditRecord>, FetchError>;

    /// Test the connection to the warehouse
    ///
    /// This is useful for validating credentials before a run.
    async fn test_connection(&self) -> Result<(), FetchError>;
}
