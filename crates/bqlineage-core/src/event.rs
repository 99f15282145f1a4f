//! Lineage events and their DataHub MCE wire form
//!
//! A [`LineageEvent`] pairs one downstream dataset with its upstreams. On the
//! wire it becomes a `MetadataChangeEvent` whose proposed snapshot is a
//! `DatasetSnapshot` carrying a single `UpstreamLineage` aspect.

use crate::urn::DatasetUrn;
use serde::{Deserialize, Serialize};

/// Actor recorded on lineage audit stamps when none is configured
pub const DEFAULT_AUDIT_ACTOR: &str = "urn:li:corpuser:datahub";

/// One downstream dataset and the datasets it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEvent {
    pub downstream: DatasetUrn,
    pub upstreams: Vec<DatasetUrn>,
}

impl LineageEvent {
    /// Create an event; duplicate upstreams are dropped, first occurrence wins
    pub fn new(downstream: DatasetUrn, upstreams: impl IntoIterator<Item = DatasetUrn>) -> Self {
        let mut unique: Vec<DatasetUrn> = Vec::new();
        for upstream in upstreams {
            if !unique.contains(&upstream) {
                unique.push(upstream);
            }
        }

        Self {
            downstream,
            upstreams: unique,
        }
    }

    /// Build the MCE for this event, stamping every upstream edge
    pub fn to_mce(&self, stamp: &AuditStamp) -> MetadataChangeEvent {
        let upstreams = self
            .upstreams
            .iter()
            .map(|urn| Upstream {
                audit_stamp: stamp.clone(),
                dataset: urn.to_datahub_urn(),
                lineage_type: DatasetLineageType::Transformed,
            })
            .collect();

        MetadataChangeEvent {
            proposed_snapshot: DatasetSnapshot {
                urn: self.downstream.to_datahub_urn(),
                aspects: vec![DatasetAspect::UpstreamLineage(UpstreamLineage { upstreams })],
            },
        }
    }
}

/// Who recorded a lineage edge, and when (epoch millis)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub time: i64,
    pub actor: String,
}

impl AuditStamp {
    pub fn new(time: i64, actor: impl Into<String>) -> Self {
        Self {
            time,
            actor: actor.into(),
        }
    }

    /// Stamp with the current wall-clock time
    pub fn now(actor: impl Into<String>) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), actor)
    }
}

/// DataHub `DatasetLineageType`; audit-log edges are always query transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetLineageType {
    Transformed,
}

/// `com.linkedin.mxe.MetadataChangeEvent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataChangeEvent {
    #[serde(rename = "proposedSnapshot")]
    pub proposed_snapshot: DatasetSnapshot,
}

/// `com.linkedin.metadata.snapshot.DatasetSnapshot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub urn: String,
    pub aspects: Vec<DatasetAspect>,
}

/// Aspect union of a dataset snapshot (only lineage is emitted)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetAspect {
    #[serde(rename = "com.linkedin.dataset.UpstreamLineage")]
    UpstreamLineage(UpstreamLineage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamLineage {
    pub upstreams: Vec<Upstream>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upstream {
    #[serde(rename = "auditStamp")]
    pub audit_stamp: AuditStamp,

    pub dataset: String,

    #[serde(rename = "type")]
    pub lineage_type: DatasetLineageType,
}
