//! Lineage workflow run
//!
//! One run moves through `EXTRACTING -> EMITTING -> SUCCEEDED`. Any error
//! ends the run in `FAILED`, is recorded in the [`RunReport`] and is handed
//! to the failure notifier exactly once. Nothing is retried.

use crate::extractor::LineageExtractor;
use crate::lineage_emitter::LineageEmitter;
use crate::notify::{FailureNotifier, LogNotifier, RunFailure};
use bqlineage_core::{RunReport, RunState, TransformError};
use bqlineage_datahub::EmitError;
use bqlineage_warehouse::FetchError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] FetchError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Emission(#[from] EmitError),
}

impl PipelineError {
    /// Error class recorded in run reports and alerts
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "ExtractionError",
            Self::Transform(_) => "TransformError",
            Self::Emission(_) => "EmissionError",
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Identity of a single run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub trigger: RunTrigger,
    pub logical_time: DateTime<Utc>,
}

impl RunContext {
    /// Run id is `<trigger>__<rfc3339 time>`
    pub fn at(trigger: RunTrigger, logical_time: DateTime<Utc>) -> Self {
        Self {
            run_id: format!(
                "{}__{}",
                trigger.as_str(),
                logical_time.to_rfc3339_opts(SecondsFormat::Secs, false)
            ),
            trigger,
            logical_time,
        }
    }

    pub fn manual() -> Self {
        Self::at(RunTrigger::Manual, Utc::now())
    }

    pub fn scheduled() -> Self {
        Self::at(RunTrigger::Scheduled, Utc::now())
    }
}

/// Extract, emit, and report on failure
pub struct LineagePipeline {
    dag_id: String,
    owner: String,
    extractor: LineageExtractor,
    emitter: LineageEmitter,
    notifier: Arc<dyn FailureNotifier>,
}

impl LineagePipeline {
    /// Create a pipeline that logs failures
    pub fn new(
        dag_id: impl Into<String>,
        owner: impl Into<String>,
        extractor: LineageExtractor,
        emitter: LineageEmitter,
    ) -> Self {
        Self {
            dag_id: dag_id.into(),
            owner: owner.into(),
            extractor,
            emitter,
            notifier: Arc::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    /// Execute one run to a terminal state
    pub async fn run(&self, ctx: RunContext) -> RunReport {
        let span = info_span!("run", dag_id = %self.dag_id, run_id = %ctx.run_id);
        self.run_inner(ctx).instrument(span).await
    }

    async fn run_inner(&self, ctx: RunContext) -> RunReport {
        let mut report = RunReport::start(&ctx.run_id, &self.dag_id, &self.owner);
        info!(trigger = ctx.trigger.as_str(), "run started");

        if let Err(err) = self.execute(&mut report).await {
            warn!(kind = err.kind(), stage = report.state.as_str(), "run failed: {}", err);
            report.fail(err.kind(), err.to_string());
            self.notify(&report).await;
            return report;
        }

        report.advance(RunState::Succeeded);
        info!(
            downstream_tables = report.summary.downstream_tables,
            events_emitted = report.summary.events_emitted,
            "run succeeded"
        );
        report
    }

    async fn execute(&self, report: &mut RunReport) -> Result<(), PipelineError> {
        // A truncated result set would overwrite catalog lineage with a subset
        if let Some(limit) = self.extractor.query().max_rows {
            return Err(FetchError::ConfigError(format!(
                "Row limit {} is only allowed for trial extractions",
                limit
            ))
            .into());
        }

        let extraction = self.extractor.extract().await?;

        report.summary.rows_fetched = extraction.rows_fetched;
        report.summary.downstream_tables = extraction.hierarchy.len();
        report.summary.upstream_edges = extraction.hierarchy.edge_count();
        report.hierarchy_digest = Some(extraction.hierarchy.digest());

        report.advance(RunState::Emitting);
        report.summary.events_emitted = self.emitter.emit(&extraction.hierarchy).await?;
        Ok(())
    }

    async fn notify(&self, report: &RunReport) {
        let Some(failure) = RunFailure::from_report(report) else {
            return;
        };

        if let Err(err) = self.notifier.notify_failure(&failure).await {
            warn!(notifier = self.notifier.name(), "failure notification not delivered: {}", err);
        }
    }
}
