//! DataHub GMS REST emitter
//!
//! Submits a run's lineage in a single `POST /entities?action=batchIngest`
//! call and checks connectivity with `GET /config`.

use crate::emitter::{CatalogEmitter, EmitError};
use crate::wire::batch_payload;
use bqlineage_core::{AuditStamp, CatalogConfig, CatalogConnection, LineageEvent};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, info, warn};

const RESTLI_PROTOCOL_HEADER: &str = "x-restli-protocol-version";
const RESTLI_PROTOCOL_VERSION: &str = "2.0.0";

/// Emitter for a DataHub GMS endpoint
pub struct DatahubRestEmitter {
    connection_id: String,
    server: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl DatahubRestEmitter {
    /// Create an emitter for a named connection
    pub fn new(connection_id: impl Into<String>, connection: &CatalogConnection) -> Result<Self, EmitError> {
        let server = connection.server.trim_end_matches('/').to_string();
        if !(server.starts_with("http://") || server.starts_with("https://")) {
            return Err(EmitError::Config(format!(
                "GMS server '{}' must be an http(s) URL",
                connection.server
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(RESTLI_PROTOCOL_HEADER, HeaderValue::from_static(RESTLI_PROTOCOL_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(secs) = connection.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let client = builder
            .build()
            .map_err(|e| EmitError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            connection_id: connection_id.into(),
            server,
            token: connection.token.clone(),
            client,
        })
    }

    /// Create an emitter for the connection selected in `[catalog]`
    pub fn from_config(config: &CatalogConfig) -> Result<Self, EmitError> {
        let connection = config
            .active_connection()
            .map_err(|e| EmitError::Config(e.to_string()))?;
        Self::new(&config.connection, connection)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl CatalogEmitter for DatahubRestEmitter {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    async fn emit_batch(&self, events: &[LineageEvent], stamp: &AuditStamp) -> Result<usize, EmitError> {
        if events.is_empty() {
            debug!(connection = %self.connection_id, "empty batch, nothing to send");
            return Ok(0);
        }

        let payload = batch_payload(events, stamp);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| EmitError::Serialization(e.to_string()))?;

        debug!(
            connection = %self.connection_id,
            events = events.len(),
            bytes = body.len(),
            "submitting lineage batch"
        );

        let request = self
            .client
            .post(self.endpoint("/entities?action=batchIngest"))
            .body(body);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| EmitError::Connection(format!("{}: {}", self.server, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(connection = %self.connection_id, status = status.as_u16(), "batch rejected");
            return Err(EmitError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(connection = %self.connection_id, events = events.len(), "lineage batch accepted");
        Ok(events.len())
    }

    async fn test_connection(&self) -> Result<(), EmitError> {
        let response = self
            .authorize(self.client.get(self.endpoint("/config")))
            .send()
            .await
            .map_err(|e| EmitError::Connection(format!("{}: {}", self.server, e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EmitError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(server: &str) -> CatalogConnection {
        CatalogConnection {
            server: server.to_string(),
            token: None,
            timeout_secs: Some(5),
        }
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let emitter = DatahubRestEmitter::new("gms", &connection("http://localhost:8080/")).unwrap();
        assert_eq!(emitter.server(), "http://localhost:8080");
        assert_eq!(
            emitter.endpoint("/entities?action=batchIngest"),
            "http://localhost:8080/entities?action=batchIngest"
        );
        assert_eq!(emitter.connection_id(), "gms");
    }

    #[test]
    fn non_http_server_is_rejected() {
        let result = DatahubRestEmitter::new("gms", &connection("localhost:8080"));
        assert!(matches!(result, Err(EmitError::Config(_))));
    }

    #[test]
    fn from_config_requires_known_connection() {
        let config = CatalogConfig::default();
        assert!(matches!(
            DatahubRestEmitter::from_config(&config),
            Err(EmitError::Config(_))
        ));

        let mut config = CatalogConfig::default();
        config
            .connections
            .insert(config.connection.clone(), connection("http://gms:8080"));
        let emitter = DatahubRestEmitter::from_config(&config).unwrap();
        assert_eq!(emitter.connection_id(), "datahub_rest_default");
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        // Nothing listens on this address; an actual request would fail
        let emitter = DatahubRestEmitter::new("gms", &connection("http://127.0.0.1:9")).unwrap();
        let accepted = emitter
            .emit_batch(&[], &AuditStamp::new(0, "urn:li:corpuser:datahub"))
            .await
            .unwrap();
        assert_eq!(accepted, 0);
    }
}
