//! DataHub catalog emitters
//!
//! Lineage events are submitted to DataHub GMS as one batch of
//! `DatasetSnapshot` entities per run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bqlineage_datahub::{CatalogEmitter, DatahubRestEmitter};
//!
//! let emitter = DatahubRestEmitter::from_config(&config.catalog)?;
//! emitter.test_connection().await?;
//! let accepted = emitter.emit_batch(&events, &stamp).await?;
//! ```

pub mod emitter;
pub mod mock;
pub mod rest;
pub mod wire;

pub use emitter::{CatalogEmitter, EmitError};
pub use mock::MockEmitter;
pub use rest::DatahubRestEmitter;
pub use wire::{batch_payload, IngestBatch, SnapshotEntity};
