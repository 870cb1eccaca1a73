//! Row types persisted by the durable store.

use serde::{Deserialize, Serialize};

/// A bounded window of app usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntity {
    pub id: String,
    pub created_at: i64,
    /// Timestamp of the most recent tracked event, 0 when none was observed yet.
    #[serde(default)]
    pub last_event_time: i64,
    #[serde(default)]
    pub crashed: bool,
    #[serde(default)]
    pub exported: bool,
    /// Process that minted the session.
    #[serde(default)]
    pub pid: u32,
}

impl SessionEntity {
    pub fn new(id: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
            last_event_time: 0,
            crashed: false,
            exported: false,
            pid: std::process::id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntity {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON-encoded payload; opaque to the store.
    pub serialized_data: String,
    /// When the producer observed the event.
    pub timestamp: i64,
    /// When the agent accepted the event.
    pub created_at: i64,
    pub session_id: String,
    #[serde(default)]
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Error { message: String },
}

impl TraceStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, TraceStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntity {
    pub trace_id: String,
    pub group_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub status: TraceStatus,
    pub start_time: i64,
    pub end_time: i64,
    pub has_ended: bool,
    pub session_id: String,
    #[serde(default)]
    pub exported: bool,
}

/// One memory sample; all counters are byte counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsageEntity {
    pub id: String,
    pub session_id: String,
    pub free_memory: u64,
    pub used_memory: u64,
    pub total_memory: u64,
    pub max_memory: u64,
    pub available_heap_space: u64,
    pub created_at: i64,
    #[serde(default)]
    pub exported: bool,
}

/// Everything not yet exported for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportData {
    /// Present only while the session itself is unexported.
    pub session: Option<SessionEntity>,
    pub events: Vec<EventEntity>,
    pub traces: Vec<TraceEntity>,
    pub resource_samples: Vec<ResourceUsageEntity>,
}

impl ExportData {
    /// True when there are no telemetry rows. The session record is not counted.
    pub fn has_no_rows(&self) -> bool {
        self.events.is_empty() && self.traces.is_empty() && self.resource_samples.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.has_no_rows()
    }

    pub fn row_count(&self) -> usize {
        self.events.len() + self.traces.len() + self.resource_samples.len()
    }
}
