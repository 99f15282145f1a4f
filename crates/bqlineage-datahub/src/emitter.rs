//! Catalog emitter trait

use bqlineage_core::{AuditStamp, LineageEvent};

/// Errors that can occur while submitting lineage to the catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("Catalog connection failed: {0}")]
    Connection(String),

    #[error("Catalog rejected the batch (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to serialize batch: {0}")]
    Serialization(String),

    #[error("Catalog configuration error: {0}")]
    Config(String),
}

/// A metadata catalog that accepts lineage events
#[async_trait::async_trait]
pub trait CatalogEmitter: Send + Sync {
    /// Identifier of the connection this emitter submits to
    fn connection_id(&self) -> &str;

    /// Submit every event of a run as one batch
    ///
    /// Returns the number of events the catalog accepted. The batch is
    /// accepted as a whole or the call fails; there is no partial success.
    async fn emit_batch(&self, events: &[LineageEvent], stamp: &AuditStamp) -> Result<usize, EmitError>;

    /// Test the connection to the catalog
    async fn test_connection(&self) -> Result<(), EmitError>;
}
