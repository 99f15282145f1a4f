//! Audit records and the lineage hierarchy built from them
//!
//! The hierarchy is an immutable value: it is built in one pass from the
//! rows the warehouse returns and is never mutated afterwards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A `dataset.table` pair inside the configured project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableKey {
    /// Dataset name
    pub dataset: String,

    /// Table name
    pub table: String,
}

impl TableKey {
    /// Create a new table key
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

impl FromStr for TableKey {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((dataset, table))
                if !dataset.is_empty() && !table.is_empty() && !table.contains('.') =>
            {
                Ok(Self::new(dataset, table))
            }
            _ => Err(TransformError::InvalidTableKey(s.to_string())),
        }
    }
}

impl Serialize for TableKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TableKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One row of the lineage query output
///
/// Fields are optional because `SPLIT(..)[SAFE_OFFSET(n)]` yields NULL when
/// an audit log identifier has fewer parts than expected. Ordering follows
/// the query's `ORDER BY` (destination first, NULLs first).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AuditRecord {
    pub destination_dataset: Option<String>,
    pub destination_table: Option<String>,
    pub source_dataset: Option<String>,
    pub source_table: Option<String>,
}

impl AuditRecord {
    /// Create a record with every field present
    pub fn new(
        destination_dataset: impl Into<String>,
        destination_table: impl Into<String>,
        source_dataset: impl Into<String>,
        source_table: impl Into<String>,
    ) -> Self {
        Self {
            destination_dataset: Some(destination_dataset.into()),
            destination_table: Some(destination_table.into()),
            source_dataset: Some(source_dataset.into()),
            source_table: Some(source_table.into()),
        }
    }

    /// Downstream key of this row; `row` is used for error reporting only
    pub fn destination_key(&self, row: usize) -> Result<TableKey, TransformError> {
        Ok(TableKey::new(
            required(&self.destination_dataset, row, "destination_dataset")?,
            required(&self.destination_table, row, "destination_table")?,
        ))
    }

    /// Upstream key of this row
    pub fn source_key(&self, row: usize) -> Result<TableKey, TransformError> {
        Ok(TableKey::new(
            required(&self.source_dataset, row, "source_dataset")?,
            required(&self.source_table, row, "source_table")?,
        ))
    }
}

fn required<'a>(
    value: &'a Option<String>,
    row: usize,
    field: &'static str,
) -> Result<&'a str, TransformError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TransformError::MissingField { row, field }),
    }
}

/// A raw row of the BigQuery audit log table
///
/// `destination_table` and every entry of `source_tables` are
/// `project.dataset.table` identifiers; `source_tables` is comma-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub principal_email: String,
    pub destination_table: String,
    pub source_tables: String,
}

impl AuditLogEntry {
    pub fn new(
        principal_email: impl Into<String>,
        destination_table: impl Into<String>,
        source_tables: impl Into<String>,
    ) -> Self {
        Self {
            principal_email: principal_email.into(),
            destination_table: destination_table.into(),
            source_tables: source_tables.into(),
        }
    }
}

/// Mapping from a downstream table to the ordered upstream tables that fed it
///
/// Every downstream key maps to at least one upstream key, and upstream
/// lists contain no duplicates. Keys iterate in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<TableKey, Vec<TableKey>>",
    into = "BTreeMap<TableKey, Vec<TableKey>>"
)]
pub struct LineageHierarchy {
    edges: BTreeMap<TableKey, Vec<TableKey>>,
}

impl LineageHierarchy {
    /// Build the hierarchy from query rows
    ///
    /// Fails on the first row with a NULL or empty dataset/table field:
    /// an incomplete graph must never be emitted as if it were complete.
    pub fn from_records<'a, I>(records: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = &'a AuditRecord>,
    {
        let mut edges: BTreeMap<TableKey, Vec<TableKey>> = BTreeMap::new();

        for (row, record) in records.into_iter().enumerate() {
            let downstream = record.destination_key(row)?;
            let upstream = record.source_key(row)?;

            let upstreams = edges.entry(downstream).or_default();
            if !upstreams.contains(&upstream) {
                upstreams.push(upstream);
            }
        }

        Ok(Self { edges })
    }

    /// Number of downstream tables
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Total number of upstream -> downstream edges
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Upstream tables of a downstream table
    pub fn upstreams(&self, downstream: &TableKey) -> Option<&[TableKey]> {
        self.edges.get(downstream).map(Vec::as_slice)
    }

    pub fn contains(&self, downstream: &TableKey) -> bool {
        self.edges.contains_key(downstream)
    }

    /// Iterate over `(downstream, upstreams)` in key order
    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &[TableKey])> {
        self.edges.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// SHA-256 over the canonical form of the hierarchy, hex encoded
    ///
    /// Two runs over the same audit rows produce the same digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (downstream, upstreams) in &self.edges {
            hasher.update(downstream.to_string().as_bytes());
            hasher.update(b"<-");
            for upstream in upstreams {
                hasher.update(upstream.to_string().as_bytes());
                hasher.update(b",");
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Serialize to a pretty JSON object (`{"ds.t": ["ds.src", ...]}`)
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse and re-validate a hierarchy from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Load from a file written by [`LineageHierarchy::save_to_file`]
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl TryFrom<BTreeMap<TableKey, Vec<TableKey>>> for LineageHierarchy {
    type Error = TransformError;

    fn try_from(raw: BTreeMap<TableKey, Vec<TableKey>>) -> Result<Self, Self::Error> {
        let mut edges = BTreeMap::new();

        for (downstream, upstreams) in raw {
            if upstreams.is_empty() {
                return Err(TransformError::EmptyUpstreams(downstream.to_string()));
            }

            let mut unique: Vec<TableKey> = Vec::with_capacity(upstreams.len());
            for upstream in upstreams {
                if !unique.contains(&upstream) {
                    unique.push(upstream);
                }
            }
            edges.insert(downstream, unique);
        }

        Ok(Self { edges })
    }
}

impl From<LineageHierarchy> for BTreeMap<TableKey, Vec<TableKey>> {
    fn from(hierarchy: LineageHierarchy) -> Self {
        hierarchy.edges
    }
}

/// Errors raised while reshaping query rows into a hierarchy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("Row {row}: missing or empty field '{field}'")]
    MissingField { row: usize, field: &'static str },

    #[error("Downstream table '{0}' has no upstream tables")]
    EmptyUpstreams(String),

    #[error("Invalid table key '{0}': expected 'dataset.table'")]
    InvalidTableKey(String),
}
