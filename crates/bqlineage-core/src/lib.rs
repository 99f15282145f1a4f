//! bqlineage core
//!
//! Domain model shared by the extractor and the emitter: audit records,
//! the lineage hierarchy, dataset URNs, lineage events and their DataHub
//! wire form, run reports, and configuration.

pub mod config;
pub mod event;
pub mod lineage;
pub mod report;
pub mod schedule;
pub mod urn;

pub use config::{CatalogConfig, CatalogConnection, Config, ConfigError, NotificationConfig, WarehouseConfig};
pub use event::{AuditStamp, DatasetLineageType, DatasetSnapshot, LineageEvent, MetadataChangeEvent};
pub use lineage::{AuditLogEntry, AuditRecord, LineageHierarchy, TableKey, TransformError};
pub use report::{ReportVersion, RunErrorInfo, RunReport, RunState, RunSummary, StateTransition};
pub use schedule::Schedule;
pub use urn::{DatasetUrn, UrnBuilder};
