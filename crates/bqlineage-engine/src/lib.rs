//! bqlineage engine - the lineage workflow
//!
//! This crate wires the warehouse and the catalog into a run:
//! - Lineage extraction (audit log rows to hierarchy)
//! - Lineage emission (hierarchy to one catalog batch)
//! - Run state machine and failure notification
//! - Cadence loop

pub mod extractor;
pub mod lineage_emitter;
pub mod notify;
pub mod pipeline;
pub mod scheduler;

pub use extractor::{Extraction, LineageExtractor};
pub use lineage_emitter::{lineage_events, LineageEmitter};
pub use notify::{
    FailureNotifier, LogNotifier, MockNotifier, NotifyError, RunFailure, SlackWebhookNotifier,
};
pub use pipeline::{LineagePipeline, PipelineError, RunContext, RunTrigger};
pub use scheduler::Scheduler;
