//! In-memory catalog emitter for tests and dry runs

use crate::emitter::{CatalogEmitter, EmitError};
use bqlineage_core::{AuditStamp, LineageEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Emitter that records every batch it is handed
///
/// Clones share recorded batches and the call counter.
#[derive(Clone)]
pub struct MockEmitter {
    connection_id: String,
    batches: Arc<RwLock<Vec<Vec<LineageEvent>>>>,
    stamps: Arc<RwLock<Vec<AuditStamp>>>,
    error: Option<EmitError>,
    fail_connection: bool,
    calls: Arc<AtomicUsize>,
}

impl MockEmitter {
    pub fn new() -> Self {
        Self {
            connection_id: "mock".to_string(),
            batches: Arc::new(RwLock::new(Vec::new())),
            stamps: Arc::new(RwLock::new(Vec::new())),
            error: None,
            fail_connection: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = id.into();
        self
    }

    /// Fail every batch with this error
    pub fn with_error(mut self, error: EmitError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Number of `emit_batch` calls, including failed and empty ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batches that were accepted, in submission order
    pub async fn batches(&self) -> Vec<Vec<LineageEvent>> {
        self.batches.read().await.clone()
    }

    /// Every accepted event across all batches
    pub async fn events(&self) -> Vec<LineageEvent> {
        self.batches.read().await.iter().flatten().cloned().collect()
    }

    pub async fn stamps(&self) -> Vec<AuditStamp> {
        self.stamps.read().await.clone()
    }
}

impl Default for MockEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CatalogEmitter for MockEmitter {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn emit_batch(&self, events: &[LineageEvent], stamp: &AuditStamp) -> Result<usize, EmitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        self.batches.write().await.push(events.to_vec());
        self.stamps.write().await.push(stamp.clone());
        Ok(events.len())
    }

    async fn test_connection(&self) -> Result<(), EmitError> {
        if self.fail_connection {
            return Err(EmitError::Connection(format!(
                "mock connection '{}' unavailable",
                self.connection_id
            )));
        }
        Ok(())
    }
}
