//! Audit log sources for lineage extraction
//!
//! This crate provides the sources that read BigQuery's query audit log and
//! return one [`AuditRecord`](bqlineage_core::AuditRecord) per
//! `(destination, source)` table pair.
//!
//! ## Features
//!
//! - `bigquery` - Google BigQuery support (the mock source is always available)
//!
//! ## Example
//!
//! ```rust,ignore
//! use bqlineage_warehouse::{BigQueryAuditSource, AuditLogSource, LineageQuery};
//!
//! let source = BigQueryAuditSource::with_adc("my-project").await?;
//! let query = LineageQuery::new("my-project", vec!["etl@my-project.iam.gserviceaccount.com".into()]);
//! let rows = source.fetch_lineage_rows(&query).await?;
//! ```

pub mod adapter;
pub mod bigquery;
pub mod mock;
pub mod query;

pub use adapter::{AuditLogSource, FetchError};
pub use bigquery::BigQueryAuditSource;
pub use mock::{MockAuditSource, MockAuditSourceBuilder};
pub use query::{LineageQuery, ParamValue, QueryParam};
