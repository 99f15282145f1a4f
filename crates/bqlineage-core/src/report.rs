//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// State of a pipeline run
///
/// `EXTRACTING -> EMITTING -> SUCCEEDED`, with `FAILED` reachable from
/// either working state. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Extracting,
    Emitting,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracting => "EXTRACTING",
            Self::Emitting => "EMITTING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Extracting, Self::Emitting)
                | (Self::Extracting, Self::Failed)
                | (Self::Emitting, Self::Succeeded)
                | (Self::Emitting, Self::Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: RunState,

    /// Timestamp (ISO 8601)
    pub at: String,
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Rows returned by the lineage query
    pub rows_fetched: usize,

    /// Distinct downstream tables in the hierarchy
    pub downstream_tables: usize,

    /// Upstream -> downstream edges in the hierarchy
    pub upstream_edges: usize,

    /// Lineage events accepted by the catalog
    pub events_emitted: usize,
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunErrorInfo {
    /// State the run was in when it failed
    pub stage: RunState,

    /// Error class ("ExtractionError", "TransformError", "EmissionError")
    pub kind: String,

    pub message: String,
}

/// Run report (run-report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    pub run_id: String,

    pub dag_id: String,

    pub owner: String,

    /// Timestamp (ISO 8601)
    pub started_at: String,

    /// Set once the run reaches a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    /// Current state
    pub state: RunState,

    /// Every state the run has been in, in order
    pub transitions: Vec<StateTransition>,

    pub summary: RunSummary,

    /// Digest of the extracted hierarchy (see `LineageHierarchy::digest`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_digest: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunErrorInfo>,
}

impl RunReport {
    /// Start a report in the `EXTRACTING` state
    pub fn start(
        run_id: impl Into<String>,
        dag_id: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();

        Self {
            version: ReportVersion::CURRENT,
            run_id: run_id.into(),
            dag_id: dag_id.into(),
            owner: owner.into(),
            started_at: now.clone(),
            finished_at: None,
            state: RunState::Extracting,
            transitions: vec![StateTransition {
                state: RunState::Extracting,
                at: now,
            }],
            summary: RunSummary::default(),
            hierarchy_digest: None,
            error: None,
        }
    }

    /// Move to `next`; illegal transitions are ignored and return false
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }

        let now = chrono::Utc::now().to_rfc3339();
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(now.clone());
        }
        self.transitions.push(StateTransition { state: next, at: now });
        true
    }

    /// Record a failure at the current stage and move to `FAILED`
    pub fn fail(&mut self, kind: impl Into<String>, message: impl Into<String>) -> bool {
        let stage = self.state;
        if !self.advance(RunState::Failed) {
            return false;
        }

        self.error = Some(RunErrorInfo {
            stage,
            kind: kind.into(),
            message: message.into(),
        });
        true
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}
