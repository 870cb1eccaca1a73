//! Collector transport.
//!
//! The exporter talks to the backend only through [`ExportClient`]. Every call
//! resolves to an [`HttpResponse`]; transport failures are values, not errors, so
//! the caller decides whether rows stay unexported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::installation::Installation;
use crate::storage::{EventEntity, ExportData, ResourceUsageEntity, SessionEntity, TraceEntity};

pub mod client;
pub mod recording;

pub use client::HttpExportClient;
pub use recording::{ExportCall, RecordingExportClient};

/// Outcome of one request to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpResponse {
    /// 2xx
    Success { body: String },
    /// 4xx
    ClientError { code: u16, body: String },
    /// 5xx
    ServerError { code: u16, body: String },
    /// No usable status: connection, timeout, unexpected status class.
    UnknownError(String),
}

impl HttpResponse {
    /// Classify a status code and body.
    pub fn from_status(code: u16, body: String) -> Self {
        match code {
            200..=299 => HttpResponse::Success { body },
            400..=499 => HttpResponse::ClientError { code, body },
            500..=599 => HttpResponse::ServerError { code, body },
            other => HttpResponse::UnknownError(format!("unexpected status {other}: {body}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HttpResponse::Success { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpResponse::Success { .. } | HttpResponse::UnknownError(_) => None,
            HttpResponse::ClientError { code, .. } | HttpResponse::ServerError { code, .. } => {
                Some(*code)
            }
        }
    }
}

impl std::fmt::Display for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpResponse::Success { .. } => write!(f, "success"),
            HttpResponse::ClientError { code, body } => write!(f, "client error {code}: {body}"),
            HttpResponse::ServerError { code, body } => write!(f, "server error {code}: {body}"),
            HttpResponse::UnknownError(cause) => write!(f, "transport error: {cause}"),
        }
    }
}

/// Body of a combined export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub installation_id: String,
    #[serde(flatten)]
    pub data: ExportData,
}

/// Backend operations used by the agent.
#[async_trait]
pub trait ExportClient: Send + Sync {
    async fn export_session(&self, session: &SessionEntity) -> HttpResponse;

    async fn mark_session_crashed(&self, session_id: &str) -> HttpResponse;

    async fn export_event(&self, event: &EventEntity) -> HttpResponse;

    async fn export_trace(&self, trace: &TraceEntity) -> HttpResponse;

    async fn export_collection(&self, batch: &ExportBatch) -> HttpResponse;

    async fn export_installation(&self, installation: &Installation) -> HttpResponse;

    async fn export_memory_usage(&self, samples: &[ResourceUsageEntity]) -> HttpResponse;
}
