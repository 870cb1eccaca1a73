//! Event schema and tracking.
//!
//! Producers hand typed payloads to [`EventTracker::track`]; the tracker stamps the
//! current session, queues the row in the [`EventStore`] and lets the session
//! manager observe the event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::buffer::{BufferedStore, FlushOutcome, Flushable, OfferOutcome};
use crate::identity::IdFactory;
use crate::session::SessionManager;
use crate::storage::{Database, EventEntity};
use crate::time::TimeProvider;

/// Event type tags as stored and exported.
pub mod event_type {
    pub const EXCEPTION: &str = "exception";
    pub const NAVIGATION: &str = "navigation";
    pub const LIFECYCLE_APP: &str = "lifecycle_app";
    pub const LIFECYCLE_ACTIVITY: &str = "lifecycle_activity";
    pub const APP_EXIT: &str = "app_exit";
    pub const COLD_LAUNCH: &str = "cold_launch";
    pub const CUSTOM: &str = "custom";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionUnit {
    #[serde(rename = "type")]
    pub exception_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionData {
    /// False when the exception escaped to the top of the thread.
    pub handled: bool,
    pub exceptions: Vec<ExceptionUnit>,
    pub thread_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycleKind {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLifecycleKind {
    Created,
    Resumed,
    Paused,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppExitData {
    pub reason: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdLaunchData {
    pub start_uptime_ms: u64,
    pub end_uptime_ms: u64,
}

impl ColdLaunchData {
    pub fn duration_ms(&self) -> u64 {
        self.end_uptime_ms.saturating_sub(self.start_uptime_ms)
    }
}

/// Typed payload of a tracked event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Exception(ExceptionData),
    Navigation { route: String },
    AppLifecycle(AppLifecycleKind),
    ActivityLifecycle {
        kind: ActivityLifecycleKind,
        class_name: String,
    },
    AppExit(AppExitData),
    ColdLaunch(ColdLaunchData),
    Custom {
        name: String,
        attributes: Map<String, Value>,
    },
}

impl EventData {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventData::Exception(_) => event_type::EXCEPTION,
            EventData::Navigation { .. } => event_type::NAVIGATION,
            EventData::AppLifecycle(_) => event_type::LIFECYCLE_APP,
            EventData::ActivityLifecycle { .. } => event_type::LIFECYCLE_ACTIVITY,
            EventData::AppExit(_) => event_type::APP_EXIT,
            EventData::ColdLaunch(_) => event_type::COLD_LAUNCH,
            EventData::Custom { .. } => event_type::CUSTOM,
        }
    }

    /// JSON payload stored in `serialized_data`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            EventData::Exception(data) => serde_json::to_string(data),
            EventData::Navigation { route } => {
                serde_json::to_string(&serde_json::json!({ "route": route }))
            }
            EventData::AppLifecycle(kind) => {
                serde_json::to_string(&serde_json::json!({ "type": kind }))
            }
            EventData::ActivityLifecycle { kind, class_name } => serde_json::to_string(
                &serde_json::json!({ "type": kind, "class_name": class_name }),
            ),
            EventData::AppExit(data) => serde_json::to_string(data),
            EventData::ColdLaunch(data) => serde_json::to_string(&serde_json::json!({
                "start_uptime": data.start_uptime_ms,
                "end_uptime": data.end_uptime_ms,
                "duration": data.duration_ms(),
            })),
            EventData::Custom { name, attributes } => serde_json::to_string(
                &serde_json::json!({ "name": name, "attributes": attributes }),
            ),
        }
    }
}

/// An event bound to a session, as seen by the store and the session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEvent {
    pub session_id: String,
    pub timestamp: i64,
    pub data: EventData,
}

impl TrackedEvent {
    pub fn new(session_id: impl Into<String>, timestamp: i64, data: EventData) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            data,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.data.event_type()
    }

    pub fn is_unhandled_exception(&self) -> bool {
        matches!(&self.data, EventData::Exception(exception) if !exception.handled)
    }
}

/// Buffered store for events.
pub struct EventStore {
    buffer: BufferedStore<EventEntity>,
    ids: Arc<dyn IdFactory>,
    time: Arc<dyn TimeProvider>,
}

impl EventStore {
    pub fn new(
        database: Arc<dyn Database>,
        ids: Arc<dyn IdFactory>,
        time: Arc<dyn TimeProvider>,
        capacity: usize,
    ) -> Self {
        Self {
            buffer: BufferedStore::new(database, capacity),
            ids,
            time,
        }
    }

    /// Convert and queue `event`. Returns `None` when the payload could not be encoded.
    pub fn store(&self, event: &TrackedEvent) -> Option<OfferOutcome> {
        let serialized_data = match event.data.to_json() {
            Ok(json) => json,
            Err(err) => {
                warn!(event_type = event.event_type(), error = %err, "failed to encode event");
                return None;
            }
        };
        let row = EventEntity {
            id: self.ids.create_id(),
            event_type: event.event_type().to_string(),
            serialized_data,
            timestamp: event.timestamp,
            created_at: self.time.now_millis(),
            session_id: event.session_id.clone(),
            exported: false,
        };
        Some(self.buffer.offer(row))
    }

    pub fn buffer(&self) -> &BufferedStore<EventEntity> {
        &self.buffer
    }
}

impl Flushable for EventStore {
    fn kind(&self) -> &'static str {
        self.buffer.kind()
    }

    fn flush(&self) -> FlushOutcome {
        self.buffer.flush()
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Entry point for producers. Never blocks on the network and never fails.
pub struct EventTracker {
    session_manager: Arc<SessionManager>,
    store: Arc<EventStore>,
    time: Arc<dyn TimeProvider>,
}

impl EventTracker {
    pub fn new(
        session_manager: Arc<SessionManager>,
        store: Arc<EventStore>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            session_manager,
            store,
            time,
        }
    }

    /// Record `data` observed at `timestamp` (ms epoch) against the current session.
    pub fn track(&self, data: EventData, timestamp: i64) {
        let session_id = match self.session_manager.session_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(event_type = data.event_type(), error = %err, "dropping event");
                return;
            }
        };
        let event = TrackedEvent::new(session_id, timestamp, data);
        if self.store.store(&event).is_some() {
            debug!(event_type = event.event_type(), session_id = %event.session_id, "tracked event");
        }
        self.session_manager.on_event_tracked(&event);
    }

    /// Record `data` stamped with the current wall-clock time.
    pub fn track_now(&self, data: EventData) {
        self.track(data, self.time.now_millis());
    }

    pub fn track_navigation(&self, route: impl Into<String>) {
        self.track_now(EventData::Navigation {
            route: route.into(),
        });
    }

    pub fn track_exception(&self, exception: ExceptionData) {
        self.track_now(EventData::Exception(exception));
    }

    pub fn track_app_lifecycle(&self, kind: AppLifecycleKind) {
        self.track_now(EventData::AppLifecycle(kind));
    }

    pub fn track_custom(&self, name: impl Into<String>, attributes: Map<String, Value>) {
        self.track_now(EventData::Custom {
            name: name.into(),
            attributes,
        });
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Persist queued events and the session record on the caller's thread.
    pub fn flush(&self) -> FlushOutcome {
        let outcome = self.store.flush();
        self.session_manager.flush();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SequentialIdFactory;
    use crate::scheduler::Scheduler;
    use crate::session::SessionPolicy;
    use crate::storage::SledDatabase;
    use crate::time::ManualTimeProvider;

    fn tracker(capacity: usize) -> (Arc<SledDatabase>, Arc<SessionManager>, EventTracker) {
        let db = Arc::new(SledDatabase::temporary().unwrap());
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let ids = Arc::new(SequentialIdFactory::new("id"));
        let manager = Arc::new(SessionManager::new(
            db.clone(),
            Arc::new(db.prefs().unwrap()),
            time.clone(),
            ids.clone(),
            Scheduler::with_worker_threads(1).unwrap(),
            SessionPolicy::default(),
        ));
        let store = Arc::new(EventStore::new(db.clone(), ids, time.clone(), capacity));
        let tracker = EventTracker::new(manager.clone(), store, time);
        (db, manager, tracker)
    }

    #[test]
    fn exception_payload_serializes_handled_flag() {
        let data = EventData::Exception(ExceptionData {
            handled: false,
            exceptions: vec![ExceptionUnit {
                exception_type: "Panic".to_string(),
                message: Some("index out of bounds".to_string()),
                frames: vec!["main.rs:10".to_string()],
            }],
            thread_name: "main".to_string(),
        });
        assert_eq!(data.event_type(), "exception");
        let json: Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(json["handled"], Value::Bool(false));
        assert_eq!(json["exceptions"][0]["type"], "Panic");
    }

    #[test]
    fn cold_launch_reports_duration() {
        let data = EventData::ColdLaunch(ColdLaunchData {
            start_uptime_ms: 100,
            end_uptime_ms: 450,
        });
        let json: Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();
        assert_eq!(json["duration"], 350);
    }

    #[test]
    fn track_before_session_init_drops_event() {
        let (_db, _manager, tracker) = tracker(4);
        tracker.track_navigation("home");
        assert_eq!(tracker.store().len(), 0);
    }

    #[test]
    fn tracked_events_reach_storage_on_flush() {
        let (db, manager, tracker) = tracker(4);
        manager.init();
        let session_id = manager.session_id().unwrap();

        tracker.track_navigation("home");
        tracker.track_custom("purchase", Map::new());
        assert_eq!(tracker.store().len(), 2);

        tracker.store().flush();
        let data = db.get_data_for_export(&session_id).unwrap();
        let types: Vec<_> = data.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["navigation", "custom"]);
        assert_eq!(manager.current_session().unwrap().last_event_time, 1_000);
    }
}
