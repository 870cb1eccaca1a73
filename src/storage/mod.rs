//! Durable Store
//!
//! The contracts the agent core persists through, and their sled-backed
//! implementations. The core never touches files directly; it only calls
//! [`Database`] and [`KeyValueStore`].

pub mod persistence;
pub mod prefs;
pub mod records;

pub use persistence::SledDatabase;
pub use prefs::SledPrefs;
pub use records::{
    EventEntity, ExportData, ResourceUsageEntity, SessionEntity, TraceEntity, TraceStatus,
};

use crate::error::StorageError;

/// Durable storage for sessions and telemetry rows.
///
/// Implementations must serialize concurrent writers themselves. Any insert that
/// references a session id with no persisted session fails with
/// [`StorageError::SessionNotFound`] and is not retried.
pub trait Database: Send + Sync {
    fn create_session(&self, session: &SessionEntity) -> Result<(), StorageError>;
    fn get_session(&self, session_id: &str) -> Result<Option<SessionEntity>, StorageError>;
    fn set_session_crashed(&self, session_id: &str) -> Result<(), StorageError>;
    fn set_session_exported(&self, session_id: &str) -> Result<(), StorageError>;
    /// All sessions, newest first.
    fn list_sessions(&self) -> Result<Vec<SessionEntity>, StorageError>;

    fn create_event(&self, event: &EventEntity) -> Result<(), StorageError>;
    fn get_event(&self, event_id: &str) -> Result<Option<EventEntity>, StorageError>;
    /// Writes every row whose session exists as one atomic batch; returns the count written.
    fn insert_events(&self, events: &[EventEntity]) -> Result<usize, StorageError>;
    fn set_event_exported(&self, event_id: &str) -> Result<(), StorageError>;

    fn create_trace(&self, trace: &TraceEntity) -> Result<(), StorageError>;
    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceEntity>, StorageError>;
    fn insert_traces(&self, traces: &[TraceEntity]) -> Result<usize, StorageError>;
    fn set_trace_exported(&self, trace_id: &str) -> Result<(), StorageError>;

    fn create_resource_usage(&self, sample: &ResourceUsageEntity) -> Result<(), StorageError>;
    fn get_resource_usage(
        &self,
        sample_id: &str,
    ) -> Result<Option<ResourceUsageEntity>, StorageError>;
    fn insert_resource_usage(
        &self,
        samples: &[ResourceUsageEntity],
    ) -> Result<usize, StorageError>;
    fn set_resource_usage_exported(&self, sample_id: &str) -> Result<(), StorageError>;

    /// The session (only if unexported) and its unexported rows, oldest first.
    fn get_data_for_export(&self, session_id: &str) -> Result<ExportData, StorageError>;

    /// Delete exported sessions other than `excluding_session_id`, with all their rows.
    /// Returns the number of sessions removed.
    fn delete_exported_sessions(&self, excluding_session_id: &str) -> Result<usize, StorageError>;

    /// Mark every row in `data` (and its session, if present) as exported.
    fn mark_exported(&self, data: &ExportData) -> Result<(), StorageError> {
        for event in &data.events {
            self.set_event_exported(&event.id)?;
        }
        for trace in &data.traces {
            self.set_trace_exported(&trace.trace_id)?;
        }
        for sample in &data.resource_samples {
            self.set_resource_usage_exported(&sample.id)?;
        }
        if let Some(session) = &data.session {
            self.set_session_exported(&session.id)?;
        }
        Ok(())
    }
}

/// Small, fast key-value storage for values read on the startup path.
pub trait KeyValueStore: Send + Sync {
    fn get_recent_session(&self) -> Result<Option<SessionEntity>, StorageError>;
    fn set_recent_session(&self, session: &SessionEntity) -> Result<(), StorageError>;
    fn get_installation_id(&self) -> Result<Option<String>, StorageError>;
    fn set_installation_id(&self, installation_id: &str) -> Result<(), StorageError>;
}
