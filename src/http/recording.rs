//! In-memory [`ExportClient`] that records calls and replays scripted responses.
//!
//! Useful for embedding applications' tests as well as the agent's own.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::http::{ExportBatch, ExportClient, HttpResponse};
use crate::installation::Installation;
use crate::storage::{EventEntity, ResourceUsageEntity, SessionEntity, TraceEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportCall {
    Session(SessionEntity),
    SessionCrashed(String),
    Event(EventEntity),
    Trace(TraceEntity),
    Collection(ExportBatch),
    Installation(Installation),
    MemoryUsage(Vec<ResourceUsageEntity>),
}

#[derive(Default)]
pub struct RecordingExportClient {
    calls: Mutex<Vec<ExportCall>>,
    scripted: Mutex<VecDeque<HttpResponse>>,
    fallback: Mutex<Option<HttpResponse>>,
}

impl RecordingExportClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call. Unscripted calls use the fallback.
    pub fn push_response(&self, response: HttpResponse) {
        self.scripted.lock().push_back(response);
    }

    /// Response for calls with nothing scripted (default: 201 with empty body).
    pub fn set_fallback(&self, response: HttpResponse) {
        *self.fallback.lock() = Some(response);
    }

    pub fn calls(&self) -> Vec<ExportCall> {
        self.calls.lock().clone()
    }

    pub fn collections(&self) -> Vec<ExportBatch> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ExportCall::Collection(batch) => Some(batch.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn crashed_sessions(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                ExportCall::SessionCrashed(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    fn respond(&self, call: ExportCall) -> HttpResponse {
        self.calls.lock().push(call);
        if let Some(response) = self.scripted.lock().pop_front() {
            return response;
        }
        self.fallback
            .lock()
            .clone()
            .unwrap_or_else(|| HttpResponse::Success {
                body: String::new(),
            })
    }
}

#[async_trait]
impl ExportClient for RecordingExportClient {
    async fn export_session(&self, session: &SessionEntity) -> HttpResponse {
        self.respond(ExportCall::Session(session.clone()))
    }

    async fn mark_session_crashed(&self, session_id: &str) -> HttpResponse {
        self.respond(ExportCall::SessionCrashed(session_id.to_string()))
    }

    async fn export_event(&self, event: &EventEntity) -> HttpResponse {
        self.respond(ExportCall::Event(event.clone()))
    }

    async fn export_trace(&self, trace: &TraceEntity) -> HttpResponse {
        self.respond(ExportCall::Trace(trace.clone()))
    }

    async fn export_collection(&self, batch: &ExportBatch) -> HttpResponse {
        self.respond(ExportCall::Collection(batch.clone()))
    }

    async fn export_installation(&self, installation: &Installation) -> HttpResponse {
        self.respond(ExportCall::Installation(installation.clone()))
    }

    async fn export_memory_usage(&self, samples: &[ResourceUsageEntity]) -> HttpResponse {
        self.respond(ExportCall::MemoryUsage(samples.to_vec()))
    }
}
