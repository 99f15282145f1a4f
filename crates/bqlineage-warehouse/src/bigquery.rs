//! BigQuery audit log source
//!
//! Runs the lineage query through the BigQuery jobs API, polling the job
//! until it completes and reading every result page. It requires:
//! - bigquery.jobs.create on the project
//! - read access to the audit table and to INFORMATION_SCHEMA.SCHEMATA
//!
//! ## Authentication
//!
//! 1. Service account JSON file (explicit path)
//! 2. Application Default Credentials (ADC)
//!
//! ## Usage
//!
//! ```rust,ignore
//! // Using ADC
//! let source = BigQueryAuditSource::with_adc("my-project").await?;
//!
//! // Using service account file
//! let source = BigQueryAuditSource::from_service_account_file(
//!     "my-project",
//!     "/path/to/service-account.json"
//! ).await?;
//! ```

use crate::adapter::{AuditLogSource, FetchError};
use crate::query::LineageQuery;
use bqlineage_core::{AuditRecord, WarehouseConfig};
use std::future::Future;

#[cfg(feature = "bigquery")]
use crate::query::{ParamValue, QueryParam};

#[cfg(feature = "bigquery")]
use gcp_bigquery_client::{
    error::BQError,
    model::{
        query_parameter::QueryParameter, query_parameter_type::QueryParameterType,
        get_query_results_parameters::GetQueryResultsParameters,
        query_parameter_value::QueryParameterValue, query_request::QueryRequest,
        query_response::{QueryResponse, ResultSet},
    },
    Client as BigQueryClient,
};

/// Output columns of the lineage query, in order
#[cfg(feature = "bigquery")]
const COLUMNS: [&str; 4] = [
    "destination_dataset",
    "destination_table",
    "source_dataset",
    "source_table",
];

/// Server-side wait of one `jobs.getQueryResults` call
#[cfg(feature = "bigquery")]
const POLL_TIMEOUT_MS: i32 = 10_000;

/// One response of `jobs.query` or `jobs.getQueryResults`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultPage {
    /// False while the job is still running; such a page carries no rows
    pub job_complete: bool,
    pub rows: Vec<AuditRecord>,
    pub page_token: Option<String>,
}

/// Drain a query job into one result set
///
/// `fetch(token)` asks for the next response: `None` polls a job that is
/// still running, `Some(token)` reads the page after a complete one. Any
/// error ends the drain; no partial result set is returned.
pub async fn collect_pages<F, Fut>(first: ResultPage, mut fetch: F) -> Result<Vec<AuditRecord>, FetchError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ResultPage, FetchError>>,
{
    let mut rows = Vec::new();
    let mut page = first;
    let mut pages = 0usize;

    loop {
        if !page.job_complete {
            tracing::debug!("lineage query still running");
            page = fetch(None).await?;
            continue;
        }

        pages += 1;
        rows.extend(page.rows);

        match page.page_token {
            Some(token) => page = fetch(Some(token)).await?,
            None => break,
        }
    }

    tracing::debug!(pages = pages, rows = rows.len(), "result pages drained");
    Ok(rows)
}

/// BigQuery audit log source
pub struct BigQueryAuditSource {
    /// Project the query jobs run in
    project_id: String,

    /// BigQuery client (only available with bigquery feature)
    #[cfg(feature = "bigquery")]
    client: BigQueryClient,
}

impl BigQueryAuditSource {
    /// Build a source from the `[warehouse]` section
    ///
    /// Uses the configured service account key file, or ADC when none is set.
    pub async fn from_config(config: &WarehouseConfig) -> Result<Self, FetchError> {
        match &config.credentials {
            Some(path) => Self::from_service_account_file(&config.project_id, path).await,
            None => Self::with_adc(&config.project_id).await,
        }
    }

    /// Create a source using Application Default Credentials (ADC)
    ///
    /// ADC automatically detects credentials from:
    /// - GOOGLE_APPLICATION_CREDENTIALS environment variable
    /// - gcloud CLI default credentials
    /// - GCE/GKE metadata service
    #[cfg(feature = "bigquery")]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, FetchError> {
        let project_id = project_id.into();

        let client = BigQueryClient::from_application_default_credentials()
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to authenticate with ADC: {}. \
                 Ensure GOOGLE_APPLICATION_CREDENTIALS is set or run 'gcloud auth application-default login'",
                e
            )))?;

        Ok(Self { project_id, client })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn with_adc(project_id: impl Into<String>) -> Result<Self, FetchError> {
        let _ = project_id.into();
        Err(not_compiled())
    }

    /// Create a source using a service account key file
    #[cfg(feature = "bigquery")]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        let project_id = project_id.into();
        let key_path_str = key_path.as_ref().to_string_lossy().to_string();

        let client = BigQueryClient::from_service_account_key_file(&key_path_str)
            .await
            .map_err(|e| FetchError::AuthenticationError(format!(
                "Failed to read service account key file '{}': {}",
                key_path_str, e
            )))?;

        Ok(Self { project_id, client })
    }

    #[cfg(not(feature = "bigquery"))]
    pub async fn from_service_account_file(
        project_id: impl Into<String>,
        _key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self, FetchError> {
        let _ = project_id.into();
        Err(not_compiled())
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Map an HTTP error status from the BigQuery API onto the fetch error
    /// taxonomy
    ///
    /// `audit_table` is the table the failing query read, if any; a 404
    /// naming it is reported as a missing audit table.
    pub fn classify_status(status: i64, message: &str, audit_table: Option<&LineageQuery>) -> FetchError {
        match status {
            401 => FetchError::AuthenticationError(message.to_string()),
            403 => FetchError::PermissionDenied(message.to_string()),
            404 => match audit_table {
                Some(query) if message.to_lowercase().contains(&query.audit_table.to_lowercase()) => {
                    FetchError::AuditTableNotFound(query.audit_table_ref())
                }
                _ => FetchError::QueryError(message.to_string()),
            },
            408 | 502 | 503 | 504 => FetchError::NetworkError(message.to_string()),
            _ => FetchError::QueryError(message.to_string()),
        }
    }

    #[cfg(feature = "bigquery")]
    fn classify_error(error: BQError, audit_table: Option<&LineageQuery>) -> FetchError {
        match error {
            BQError::ResponseError { error } => {
                Self::classify_status(error.error.code, &error.error.message, audit_table)
            }
            BQError::RequestError(e) if e.is_connect() || e.is_timeout() => {
                FetchError::NetworkError(e.to_string())
            }
            BQError::RequestError(e) => match e.status() {
                Some(status) => Self::classify_status(i64::from(status.as_u16()), &e.to_string(), audit_table),
                None => FetchError::NetworkError(e.to_string()),
            },
            other @ (BQError::NoToken | BQError::AuthError(_) | BQError::YupAuthError(_)) => {
                FetchError::AuthenticationError(other.to_string())
            }
            other => FetchError::QueryError(other.to_string()),
        }
    }

    /// Read the remaining responses of a job
    #[cfg(feature = "bigquery")]
    async fn results_page(
        &self,
        job_id: &str,
        location: Option<String>,
        page_token: Option<String>,
        query: &LineageQuery,
    ) -> Result<ResultPage, FetchError> {
        let parameters = GetQueryResultsParameters {
            location,
            page_token,
            timeout_ms: Some(POLL_TIMEOUT_MS),
            ..Default::default()
        };

        let response = self
            .client
            .job()
            .get_query_results(&self.project_id, job_id, parameters)
            .await
            .map_err(|e| Self::classify_error(e, Some(query)))?;

        result_page(QueryResponse::from(response))
    }
}

#[cfg(feature = "bigquery")]
fn to_bigquery_parameter(param: &QueryParam) -> QueryParameter {
    let string_type = || QueryParameterType {
        array_type: None,
        struct_types: None,
        r#type: "STRING".to_string(),
    };
    let scalar = |value: &str| QueryParameterValue {
        array_values: None,
        struct_values: None,
        value: Some(value.to_string()),
    };

    let (parameter_type, parameter_value) = match &param.value {
        ParamValue::String(value) => (string_type(), scalar(value)),
        ParamValue::StringArray(values) => (
            QueryParameterType {
                array_type: Some(Box::new(string_type())),
                struct_types: None,
                r#type: "ARRAY".to_string(),
            },
            QueryParameterValue {
                array_values: Some(values.iter().map(|v| scalar(v)).collect()),
                struct_values: None,
                value: None,
            },
        ),
    };

    QueryParameter {
        name: Some(param.name.to_string()),
        parameter_type: Some(parameter_type),
        parameter_value: Some(parameter_value),
    }
}

/// Rows and paging state of one response
#[cfg(feature = "bigquery")]
fn result_page(response: QueryResponse) -> Result<ResultPage, FetchError> {
    let job_complete = response.job_complete.unwrap_or(false);
    let page_token = response.page_token.clone();

    let mut rows = Vec::new();
    if job_complete {
        let mut rs = ResultSet::new_from_query_response(response);
        while rs.next_row() {
            let [destination_dataset, destination_table, source_dataset, source_table] = [
                read_column(&rs, COLUMNS[0])?,
                read_column(&rs, COLUMNS[1])?,
                read_column(&rs, COLUMNS[2])?,
                read_column(&rs, COLUMNS[3])?,
            ];

            rows.push(AuditRecord {
                destination_dataset,
                destination_table,
                source_dataset,
                source_table,
            });
        }
    }

    Ok(ResultPage {
        job_complete,
        rows,
        page_token,
    })
}

#[cfg(feature = "bigquery")]
fn read_column(rs: &ResultSet, column: &str) -> Result<Option<String>, FetchError> {
    rs.get_string_by_name(column)
        .map_err(|e: BQError| FetchError::InvalidResponse(format!("Failed to get {}: {}", column, e)))
}

#[cfg(not(feature = "bigquery"))]
fn not_compiled() -> FetchError {
    FetchError::ConfigError(
        "BigQuery support not compiled. Rebuild with: cargo build --features bigquery".to_string(),
    )
}

#[async_trait::async_trait]
impl AuditLogSource for BigQueryAuditSource {
    fn name(&self) -> &'static str {
        "BigQuery"
    }

    #[cfg(feature = "bigquery")]
    async fn fetch_lineage_rows(&self, query: &LineageQuery) -> Result<Vec<AuditRecord>, FetchError> {
        let sql = query.render_sql()?;
        tracing::debug!(project = %self.project_id, "lineage query:\n{}", sql);

        let mut request = QueryRequest::new(sql);
        request.parameter_mode = Some("NAMED".to_string());
        request.query_parameters = Some(query.parameters().iter().map(to_bigquery_parameter).collect());

        let response = self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| Self::classify_error(e, Some(query)))?;

        let (job_id, location) = match response.job_reference.as_ref() {
            Some(job) => (job.job_id.clone(), job.location.clone()),
            None => (None, None),
        };
        let job_id = job_id.ok_or_else(|| {
            FetchError::InvalidResponse("jobs.query response carries no job id".to_string())
        })?;

        let first = result_page(response)?;
        let rows = collect_pages(first, |page_token| {
            self.results_page(&job_id, location.clone(), page_token, query)
        })
        .await?;

        tracing::debug!(rows = rows.len(), "lineage query returned");
        Ok(rows)
    }

    #[cfg(not(feature = "bigquery"))]
    async fn fetch_lineage_rows(&self, _query: &LineageQuery) -> Result<Vec<AuditRecord>, FetchError> {
        Err(not_compiled())
    }

    #[cfg(feature = "bigquery")]
    async fn test_connection(&self) -> Result<(), FetchError> {
        // Simple query to test connection
        let request = QueryRequest::new("SELECT 1".to_string());

        self.client
            .job()
            .query(&self.project_id, request)
            .await
            .map_err(|e| Self::classify_error(e, None))?;

        Ok(())
    }

    #[cfg(not(feature = "bigquery"))]
    async fn test_connection(&self) -> Result<(), FetchError> {
        Err(not_compiled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> LineageQuery {
        LineageQuery::new("proj", vec!["etl@proj.iam.gserviceaccount.com".to_string()])
    }

    fn record(table: &str) -> AuditRecord {
        AuditRecord::new("ds1", table, "ds0", "src")
    }

    fn page(complete: bool, rows: &[&str], token: Option<&str>) -> ResultPage {
        ResultPage {
            job_complete: complete,
            rows: rows.iter().map(|t| record(t)).collect(),
            page_token: token.map(str::to_string),
        }
    }

    /// Serves canned responses and records the tokens it was asked for
    fn fake_job(
        responses: Vec<Result<ResultPage, FetchError>>,
        requested: &mut Vec<Option<String>>,
    ) -> impl FnMut(Option<String>) -> std::future::Ready<Result<ResultPage, FetchError>> + '_ {
        let mut responses = responses.into_iter();
        move |token| {
            requested.push(token);
            std::future::ready(
                responses
                    .next()
                    .unwrap_or_else(|| Err(FetchError::QueryError("no more responses".to_string()))),
            )
        }
    }

    #[tokio::test]
    async fn running_job_is_polled_until_complete() {
        let mut requested = Vec::new();
        let rows = collect_pages(
            page(false, &[], None),
            fake_job(
                vec![Ok(page(false, &[], None)), Ok(page(true, &["t1", "t2"], None))],
                &mut requested,
            ),
        )
        .await
        .unwrap();

        assert_eq!(rows, vec![record("t1"), record("t2")]);
        assert_eq!(requested, vec![None, None]);
    }

    #[tokio::test]
    async fn every_page_is_read() {
        let mut requested = Vec::new();
        let rows = collect_pages(
            page(true, &["t1"], Some("p2")),
            fake_job(
                vec![
                    Ok(page(true, &["t2"], Some("p3"))),
                    Ok(page(true, &["t3"], None)),
                ],
                &mut requested,
            ),
        )
        .await
        .unwrap();

        assert_eq!(rows, vec![record("t1"), record("t2"), record("t3")]);
        assert_eq!(requested, vec![Some("p2".to_string()), Some("p3".to_string())]);
    }

    #[tokio::test]
    async fn failing_page_discards_earlier_rows() {
        let mut requested = Vec::new();
        let result = collect_pages(
            page(true, &["t1"], Some("p2")),
            fake_job(
                vec![Err(FetchError::NetworkError("connection reset".to_string()))],
                &mut requested,
            ),
        )
        .await;

        assert_eq!(result, Err(FetchError::NetworkError("connection reset".to_string())));
    }

    #[tokio::test]
    async fn single_complete_page_needs_no_requests() {
        let mut requested = Vec::new();
        let rows = collect_pages(page(true, &["t1"], None), fake_job(Vec::new(), &mut requested))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(requested.is_empty());
    }

    #[test]
    fn classify_by_status() {
        let q = query();

        assert!(matches!(
            BigQueryAuditSource::classify_status(404, "Not found: Table proj:fnd_audit_bq.queries", Some(&q)),
            FetchError::AuditTableNotFound(_)
        ));
        assert!(matches!(
            BigQueryAuditSource::classify_status(404, "Not found: Dataset proj:region-us", Some(&q)),
            FetchError::QueryError(_)
        ));
        assert!(matches!(
            BigQueryAuditSource::classify_status(403, "Access Denied: Project proj", Some(&q)),
            FetchError::PermissionDenied(_)
        ));
        assert!(matches!(
            BigQueryAuditSource::classify_status(401, "Request had invalid authentication credentials", None),
            FetchError::AuthenticationError(_)
        ));
        assert!(matches!(
            BigQueryAuditSource::classify_status(503, "Service unavailable", None),
            FetchError::NetworkError(_)
        ));
    }

    #[test]
    fn numbers_in_messages_do_not_change_the_class() {
        let q = query();

        // A syntax error that quotes "401" is still a query error
        let err = BigQueryAuditSource::classify_status(
            400,
            "Syntax error: Unexpected integer literal \"401\" at [3:14]",
            Some(&q),
        );
        assert!(matches!(err, FetchError::QueryError(_)));
    }

    #[tokio::test]
    #[cfg(not(feature = "bigquery"))]
    async fn without_feature_construction_fails() {
        let result = BigQueryAuditSource::with_adc("proj").await;
        assert!(matches!(result, Err(FetchError::ConfigError(_))));

        let result = BigQueryAuditSource::from_config(&WarehouseConfig::default()).await;
        assert!(matches!(result, Err(FetchError::ConfigError(_))));
    }

    #[test]
    #[cfg(feature = "bigquery")]
    fn array_parameter_shape() {
        let param = QueryParam {
            name: "principals",
            value: ParamValue::StringArray(vec!["a@x".to_string(), "b@x".to_string()]),
        };

        let bq = to_bigquery_parameter(&param);
        assert_eq!(bq.name.as_deref(), Some("principals"));
        let ty = bq.parameter_type.unwrap();
        assert_eq!(ty.r#type, "ARRAY");
        assert_eq!(ty.array_type.unwrap().r#type, "STRING");
        assert_eq!(bq.parameter_value.unwrap().array_values.unwrap().len(), 2);
    }
}
