//! reqwest-backed [`ExportClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::CollectorCredentials;
use crate::error::AgentError;
use crate::http::{ExportBatch, ExportClient, HttpResponse};
use crate::installation::Installation;
use crate::storage::{EventEntity, ResourceUsageEntity, SessionEntity, TraceEntity};

const COLLECTOR_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COLLECTOR_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn build_collector_http_client() -> Result<Client, AgentError> {
    Client::builder()
        .connect_timeout(COLLECTOR_HTTP_CONNECT_TIMEOUT)
        .timeout(COLLECTOR_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AgentError::TransportError(format!("Failed to create HTTP client: {}", e)))
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("Request timeout: {}", error)
    } else if error.is_connect() {
        format!("Connection error: {}", error)
    } else {
        format!("HTTP error: {}", error)
    }
}

pub struct HttpExportClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpExportClient {
    pub fn new(credentials: CollectorCredentials) -> Result<Self, AgentError> {
        Ok(Self {
            client: build_collector_http_client()?,
            base_url: credentials.base_url,
            api_key: credentials.api_key,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post_json<T: Serialize + ?Sized + Sync>(&self, path: &str, body: &T) -> HttpResponse {
        let url = self.endpoint(path);
        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return HttpResponse::UnknownError(describe_transport_error(&err)),
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        debug!(url = %url, status, "collector responded");
        HttpResponse::from_status(status, text)
    }
}

#[async_trait]
impl ExportClient for HttpExportClient {
    async fn export_session(&self, session: &SessionEntity) -> HttpResponse {
        self.post_json("sessions", session).await
    }

    async fn mark_session_crashed(&self, session_id: &str) -> HttpResponse {
        self.post_json(
            &format!("sessions/{session_id}/crashed"),
            &json!({ "session_id": session_id }),
        )
        .await
    }

    async fn export_event(&self, event: &EventEntity) -> HttpResponse {
        self.post_json("events", event).await
    }

    async fn export_trace(&self, trace: &TraceEntity) -> HttpResponse {
        self.post_json("traces", trace).await
    }

    async fn export_collection(&self, batch: &ExportBatch) -> HttpResponse {
        self.post_json("collection", batch).await
    }

    async fn export_installation(&self, installation: &Installation) -> HttpResponse {
        self.post_json("installations", installation).await
    }

    async fn export_memory_usage(&self, samples: &[ResourceUsageEntity]) -> HttpResponse {
        self.post_json("memory-usage", samples).await
    }
}
