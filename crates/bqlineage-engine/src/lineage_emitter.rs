//! Lineage emission
//!
//! Turns a hierarchy into one [`LineageEvent`] per downstream table and
//! submits all of them to the catalog in a single batch.

use crate::pipeline::PipelineError;
use bqlineage_core::{AuditStamp, Config, ConfigError, LineageEvent, LineageHierarchy, UrnBuilder};
use bqlineage_datahub::CatalogEmitter;
use std::sync::Arc;
use tracing::info;

/// One event per downstream table, in hierarchy order
///
/// Needs no catalog connection, so dry runs can render the batch offline.
pub fn lineage_events(urns: &UrnBuilder, hierarchy: &LineageHierarchy) -> Vec<LineageEvent> {
    hierarchy
        .iter()
        .map(|(downstream, upstreams)| {
            LineageEvent::new(
                urns.dataset(downstream),
                upstreams.iter().map(|upstream| urns.dataset(upstream)),
            )
        })
        .collect()
}

/// Emits a hierarchy to the catalog
pub struct LineageEmitter {
    catalog: Arc<dyn CatalogEmitter>,
    urns: UrnBuilder,
    audit_actor: String,
}

impl LineageEmitter {
    pub fn new(catalog: Arc<dyn CatalogEmitter>, urns: UrnBuilder, audit_actor: impl Into<String>) -> Self {
        Self {
            catalog,
            urns,
            audit_actor: audit_actor.into(),
        }
    }

    /// URNs from `[catalog]` platform/env and the warehouse project
    pub fn from_config(catalog: Arc<dyn CatalogEmitter>, config: &Config) -> Result<Self, ConfigError> {
        let urns = UrnBuilder::from_config(config)?;
        Ok(Self::new(catalog, urns, &config.catalog.audit_actor))
    }

    pub fn connection_id(&self) -> &str {
        self.catalog.connection_id()
    }

    /// Build and submit the batch; returns the number of accepted events
    ///
    /// An empty hierarchy still goes through the catalog as an empty batch.
    pub async fn emit(&self, hierarchy: &LineageHierarchy) -> Result<usize, PipelineError> {
        let events = lineage_events(&self.urns, hierarchy);
        let stamp = AuditStamp::now(&self.audit_actor);

        info!(
            connection = %self.catalog.connection_id(),
            events = events.len(),
            "emitting lineage"
        );

        let accepted = self.catalog.emit_batch(&events, &stamp).await?;
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqlineage_core::AuditRecord;
    use bqlineage_datahub::{EmitError, MockEmitter};
    use pretty_assertions::assert_eq;

    fn hierarchy() -> LineageHierarchy {
        let rows = vec![
            AuditRecord::new("ds1", "t1", "ds0", "src1"),
            AuditRecord::new("ds1", "t1", "ds0", "src2"),
            AuditRecord::new("ds2", "t2", "ds1", "t1"),
        ];
        LineageHierarchy::from_records(&rows).unwrap()
    }

    fn emitter(catalog: MockEmitter) -> LineageEmitter {
        LineageEmitter::new(
            Arc::new(catalog),
            UrnBuilder::new("bigquery", "proj").unwrap(),
            "urn:li:corpuser:datahub",
        )
    }

    #[test]
    fn one_event_per_downstream() {
        let urns = UrnBuilder::new("bigquery", "proj").unwrap();
        let events = lineage_events(&urns, &hierarchy());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].downstream.to_string(), "bigquery:proj.ds1.t1");
        let upstreams: Vec<String> = events[0].upstreams.iter().map(|u| u.to_string()).collect();
        assert_eq!(upstreams, vec!["bigquery:proj.ds0.src1", "bigquery:proj.ds0.src2"]);
        assert_eq!(events[1].downstream.to_string(), "bigquery:proj.ds2.t2");
    }

    #[tokio::test]
    async fn from_config_uses_project_and_env() {
        let mut config = Config::default();
        config.warehouse.project_id = "acme-analytics".to_string();
        config.catalog.env = "DEV".to_string();

        let catalog = MockEmitter::new();
        let emitter = LineageEmitter::from_config(Arc::new(catalog.clone()), &config).unwrap();
        emitter.emit(&hierarchy()).await.unwrap();

        let events = catalog.events().await;
        assert_eq!(events[0].downstream.name, "acme-analytics.ds1.t1");
        assert_eq!(events[0].downstream.env, "DEV");
    }

    #[test]
    fn from_config_without_project_is_rejected() {
        let result = LineageEmitter::from_config(Arc::new(MockEmitter::new()), &Config::default());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn emits_single_batch() {
        let catalog = MockEmitter::new();
        let accepted = emitter(catalog.clone()).emit(&hierarchy()).await.unwrap();

        assert_eq!(accepted, 2);
        assert_eq!(catalog.call_count(), 1);
        assert_eq!(catalog.batches().await[0].len(), 2);
        assert_eq!(catalog.stamps().await[0].actor, "urn:li:corpuser:datahub");
    }

    #[tokio::test]
    async fn empty_hierarchy_sends_empty_batch() {
        let catalog = MockEmitter::new();
        let accepted = emitter(catalog.clone())
            .emit(&LineageHierarchy::default())
            .await
            .unwrap();

        assert_eq!(accepted, 0);
        assert_eq!(catalog.call_count(), 1);
        assert!(catalog.batches().await[0].is_empty());
    }

    #[tokio::test]
    async fn catalog_error_is_emission_error() {
        let catalog = MockEmitter::new().with_error(EmitError::Connection("refused".to_string()));
        let err = emitter(catalog).emit(&hierarchy()).await.unwrap_err();
        assert_eq!(err.kind(), "EmissionError");
    }
}
