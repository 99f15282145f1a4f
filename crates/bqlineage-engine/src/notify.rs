//! Failure notification
//!
//! A failed run calls its notifier once. Notifier errors are the caller's
//! to log; they never replace the run's own error.

use bqlineage_core::{RunReport, RunState};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to deliver notification: {0}")]
    Delivery(String),

    #[error("Notification endpoint rejected the message (HTTP {0})")]
    Rejected(u16),
}

/// What a notifier is told about a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub dag_id: String,
    pub run_id: String,
    pub owner: String,
    pub stage: RunState,
    pub kind: String,
    pub message: String,
    pub started_at: String,
}

impl RunFailure {
    /// The failure recorded in a report, if the run failed
    pub fn from_report(report: &RunReport) -> Option<Self> {
        let error = report.error.as_ref()?;

        Some(Self {
            dag_id: report.dag_id.clone(),
            run_id: report.run_id.clone(),
            owner: report.owner.clone(),
            stage: error.stage,
            kind: error.kind.clone(),
            message: error.message.clone(),
            started_at: report.started_at.clone(),
        })
    }

    /// Single-line summary used by log and chat notifiers
    pub fn summary(&self) -> String {
        format!(
            "{} run {} failed during {} ({}): {} [owner: {}, started {}]",
            self.dag_id,
            self.run_id,
            self.stage.as_str(),
            self.kind,
            self.message,
            self.owner,
            self.started_at
        )
    }
}

/// Receives failed runs
#[async_trait::async_trait]
pub trait FailureNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify_failure(&self, failure: &RunFailure) -> Result<(), NotifyError>;
}

/// Logs failures through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl FailureNotifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify_failure(&self, failure: &RunFailure) -> Result<(), NotifyError> {
        error!(
            dag_id = %failure.dag_id,
            run_id = %failure.run_id,
            stage = failure.stage.as_str(),
            kind = %failure.kind,
            "{}",
            failure.message
        );
        Ok(())
    }
}

/// Posts failures to a Slack incoming webhook
pub struct SlackWebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

impl SlackWebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }

    fn message_text(failure: &RunFailure) -> String {
        format!(":red_circle: {}", failure.summary())
    }
}

#[async_trait::async_trait]
impl FailureNotifier for SlackWebhookNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify_failure(&self, failure: &RunFailure) -> Result<(), NotifyError> {
        let text = Self::message_text(failure);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&SlackMessage { text: &text })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Records failures in memory
///
/// Clones share the recorded failures.
#[derive(Clone, Default)]
pub struct MockNotifier {
    failures: Arc<RwLock<Vec<RunFailure>>>,
    fail_delivery: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the failure, then report a delivery error
    pub fn with_delivery_failure(mut self) -> Self {
        self.fail_delivery = true;
        self
    }

    pub async fn failures(&self) -> Vec<RunFailure> {
        self.failures.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.failures.read().await.len()
    }
}

#[async_trait::async_trait]
impl FailureNotifier for MockNotifier {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn notify_failure(&self, failure: &RunFailure) -> Result<(), NotifyError> {
        self.failures.write().await.push(failure.clone());

        if self.fail_delivery {
            return Err(NotifyError::Delivery("simulated delivery failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_report() -> RunReport {
        let mut report = RunReport::start("manual__2024-01-01T00:00:00+00:00", "bq_datahub_lineage", "data-platform");
        report.advance(RunState::Emitting);
        report.fail("EmissionError", "Catalog connection failed: refused");
        report
    }

    #[test]
    fn failure_from_report() {
        let failure = RunFailure::from_report(&failed_report()).unwrap();

        assert_eq!(failure.stage, RunState::Emitting);
        assert_eq!(failure.kind, "EmissionError");
        assert_eq!(failure.owner, "data-platform");

        let summary = failure.summary();
        assert!(summary.contains("bq_datahub_lineage"));
        assert!(summary.contains("EMITTING"));
        assert!(summary.contains("refused"));
    }

    #[test]
    fn successful_report_has_no_failure() {
        let report = RunReport::start("manual__x", "dag", "owner");
        assert!(RunFailure::from_report(&report).is_none());
    }

    #[test]
    fn slack_text_mentions_run() {
        let failure = RunFailure::from_report(&failed_report()).unwrap();
        let text = SlackWebhookNotifier::message_text(&failure);
        assert!(text.starts_with(":red_circle:"));
        assert!(text.contains("manual__2024-01-01T00:00:00+00:00"));
    }

    #[tokio::test]
    async fn mock_records_even_when_delivery_fails() {
        let notifier = MockNotifier::new().with_delivery_failure();
        let failure = RunFailure::from_report(&failed_report()).unwrap();

        assert!(notifier.notify_failure(&failure).await.is_err());
        assert_eq!(notifier.count().await, 1);
    }
}
