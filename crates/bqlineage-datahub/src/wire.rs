//! Rest.li request bodies for the GMS `entities` resource

use bqlineage_core::{AuditStamp, DatasetSnapshot, LineageEvent, MetadataChangeEvent};
use serde::{Deserialize, Serialize};

/// Body of `POST /entities?action=batchIngest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestBatch {
    pub entities: Vec<SnapshotEntity>,
}

/// Rest.li `Entity`: a snapshot wrapped in its union member name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntity {
    pub value: SnapshotValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotValue {
    #[serde(rename = "com.linkedin.metadata.snapshot.DatasetSnapshot")]
    DatasetSnapshot(DatasetSnapshot),
}

impl From<MetadataChangeEvent> for SnapshotEntity {
    fn from(mce: MetadataChangeEvent) -> Self {
        Self {
            value: SnapshotValue::DatasetSnapshot(mce.proposed_snapshot),
        }
    }
}

/// Build the batch body for a run's events
pub fn batch_payload(events: &[LineageEvent], stamp: &AuditStamp) -> IngestBatch {
    IngestBatch {
        entities: events
            .iter()
            .map(|event| SnapshotEntity::from(event.to_mce(stamp)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqlineage_core::DatasetUrn;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn batch_wraps_snapshots() {
        let events = vec![
            LineageEvent::new(
                DatasetUrn::new("bigquery", "proj.ds1.t1"),
                vec![DatasetUrn::new("bigquery", "proj.ds0.src1")],
            ),
            LineageEvent::new(
                DatasetUrn::new("bigquery", "proj.ds2.t2"),
                vec![DatasetUrn::new("bigquery", "proj.ds1.t1")],
            ),
        ];

        let payload = batch_payload(&events, &AuditStamp::new(0, "urn:li:corpuser:datahub"));
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["entities"].as_array().unwrap().len(), 2);
        assert_eq!(
            value["entities"][0]["value"]["com.linkedin.metadata.snapshot.DatasetSnapshot"]["urn"],
            json!("urn:li:dataset:(urn:li:dataPlatform:bigquery,proj.ds1.t1,PROD)")
        );
        assert_eq!(
            value["entities"][1]["value"]["com.linkedin.metadata.snapshot.DatasetSnapshot"]["aspects"][0]
                ["com.linkedin.dataset.UpstreamLineage"]["upstreams"][0]["dataset"],
            json!("urn:li:dataset:(urn:li:dataPlatform:bigquery,proj.ds1.t1,PROD)")
        );
    }

    #[test]
    fn empty_batch() {
        let payload = batch_payload(&[], &AuditStamp::new(0, "urn:li:corpuser:datahub"));
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({ "entities": [] }));
    }
}
