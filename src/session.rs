//! Session lifecycle.
//!
//! Decides, at startup and on every return to the foreground, whether the most
//! recently persisted session continues or a new one is minted, and folds tracked
//! events back into the current session (last activity, crash flag).

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::events::TrackedEvent;
use crate::identity::IdFactory;
use crate::scheduler::Scheduler;
use crate::storage::{Database, KeyValueStore, SessionEntity};
use crate::time::TimeProvider;

/// Continuation thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_session_duration_ms: u64,
    pub max_session_time_between_events_ms: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl SessionPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_session_duration_ms: config.max_session_duration_ms,
            max_session_time_between_events_ms: config.max_session_time_between_events_ms,
        }
    }

    /// Whether `session` may be resumed at wall-clock time `now`.
    ///
    /// Crashed sessions never continue. Negative ages (clock moved backwards) never
    /// continue. A session with recorded activity continues only inside the
    /// inactivity window.
    pub fn should_continue(&self, session: &SessionEntity, now: i64) -> bool {
        if session.crashed {
            return false;
        }
        let age = now - session.created_at;
        if age < 0 || age as u64 > self.max_session_duration_ms {
            return false;
        }
        if session.last_event_time > 0 {
            let gap = now - session.last_event_time;
            return gap >= 0 && (gap as u64) < self.max_session_time_between_events_ms;
        }
        true
    }
}

/// Coalescing writer for the recent-session record. Producers queue snapshots;
/// a blocking task writes the newest one. Writes are serialized so an older
/// snapshot never lands after a newer one.
struct RecentSessionWriter {
    prefs: Arc<dyn KeyValueStore>,
    pending: Mutex<Option<SessionEntity>>,
    writing: Mutex<()>,
}

impl RecentSessionWriter {
    /// Returns true when no earlier snapshot was waiting, i.e. a write must be scheduled.
    fn queue(&self, snapshot: SessionEntity) -> bool {
        self.pending.lock().replace(snapshot).is_none()
    }

    fn write_pending(&self) {
        let _writing = self.writing.lock();
        let Some(snapshot) = self.pending.lock().take() else {
            return;
        };
        if let Err(err) = self.prefs.set_recent_session(&snapshot) {
            warn!(session_id = %snapshot.id, error = %err, "failed to persist recent session");
        }
    }

    /// Write `snapshot` now, superseding anything queued.
    fn write_now(&self, snapshot: &SessionEntity) {
        let _writing = self.writing.lock();
        self.pending.lock().take();
        if let Err(err) = self.prefs.set_recent_session(snapshot) {
            warn!(session_id = %snapshot.id, error = %err, "failed to persist recent session");
        }
    }
}

/// Result of evaluating the persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    Continued,
    Created,
}

pub struct SessionManager {
    database: Arc<dyn Database>,
    prefs: Arc<dyn KeyValueStore>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdFactory>,
    scheduler: Scheduler,
    policy: SessionPolicy,
    recent_writer: Arc<RecentSessionWriter>,
    current: RwLock<Option<SessionEntity>>,
    /// Monotonic instant of the last move to background.
    background_at: Mutex<Option<u64>>,
}

impl SessionManager {
    pub fn new(
        database: Arc<dyn Database>,
        prefs: Arc<dyn KeyValueStore>,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdFactory>,
        scheduler: Scheduler,
        policy: SessionPolicy,
    ) -> Self {
        let recent_writer = Arc::new(RecentSessionWriter {
            prefs: Arc::clone(&prefs),
            pending: Mutex::new(None),
            writing: Mutex::new(()),
        });
        Self {
            database,
            prefs,
            time,
            ids,
            scheduler,
            policy,
            recent_writer,
            current: RwLock::new(None),
            background_at: Mutex::new(None),
        }
    }

    /// Load the recent session and continue it, or mint a replacement.
    pub fn init(&self) -> SessionStart {
        let now = self.time.now_millis();
        let recent = match self.prefs.get_recent_session() {
            Ok(recent) => recent,
            Err(err) => {
                warn!(error = %err, "failed to read recent session, starting a new one");
                None
            }
        };

        if let Some(session) = recent {
            if self.policy.should_continue(&session, now) {
                debug!(session_id = %session.id, "continuing session");
                *self.current.write() = Some(session);
                return SessionStart::Continued;
            }
            debug!(
                session_id = %session.id,
                crashed = session.crashed,
                "recent session cannot be continued"
            );
        }

        let session = SessionEntity::new(self.ids.create_id(), now);
        if let Err(err) = self.database.create_session(&session) {
            error!(session_id = %session.id, error = %err, "failed to persist new session");
        }
        info!(session_id = %session.id, "started new session");
        let mut current = self.current.write();
        self.recent_writer.write_now(&session);
        *current = Some(session);
        SessionStart::Created
    }

    /// Adopt the recent session as current without evaluating or replacing it.
    /// For tools that ship stored data without starting a run. Returns false
    /// when no session was ever recorded.
    pub fn load_recent(&self) -> bool {
        match self.prefs.get_recent_session() {
            Ok(Some(session)) => {
                debug!(session_id = %session.id, "loaded recent session");
                *self.current.write() = Some(session);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "failed to read recent session");
                false
            }
        }
    }

    /// Current session id. Calling before [`SessionManager::init`] is a programming error.
    pub fn session_id(&self) -> Result<String, AgentError> {
        match self.current.read().as_ref() {
            Some(session) => Ok(session.id.clone()),
            None => {
                error!("session id requested before session manager init");
                Err(AgentError::NotInitialized("session manager"))
            }
        }
    }

    /// Snapshot of the current session record.
    pub fn current_session(&self) -> Option<SessionEntity> {
        self.current.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Fold a tracked event into the current session. Runs on the producer's
    /// thread: only memory is touched here, the record is written on the scheduler.
    pub fn on_event_tracked(&self, event: &TrackedEvent) {
        let crashed_now;
        let needs_write;
        let session_id = {
            let mut guard = self.current.write();
            let Some(session) = guard.as_mut() else {
                return;
            };
            if session.id != event.session_id {
                return;
            }
            session.last_event_time = event.timestamp;
            crashed_now = event.is_unhandled_exception() && !session.crashed;
            if crashed_now {
                session.crashed = true;
            }
            needs_write = self.recent_writer.queue(session.clone());
            session.id.clone()
        };
        if !needs_write && !crashed_now {
            return;
        }

        let writer = Arc::clone(&self.recent_writer);
        let database = Arc::clone(&self.database);
        if crashed_now {
            warn!(session_id = %session_id, "unhandled exception, marking session crashed");
        }
        self.scheduler.spawn_blocking(move || {
            writer.write_pending();
            if crashed_now {
                if let Err(err) = database.set_session_crashed(&session_id) {
                    warn!(session_id = %session_id, error = %err, "failed to persist crash flag");
                }
            }
        });
    }

    /// Write any queued recent-session snapshot on the caller's thread.
    pub fn flush(&self) {
        self.recent_writer.write_pending();
    }

    /// Record the moment the app moved to the background.
    pub fn on_app_background(&self) {
        *self.background_at.lock() = Some(self.time.elapsed_realtime_millis());
        self.flush();
    }

    /// Re-evaluate the session after returning from the background.
    ///
    /// The first foreground since process start has no recorded background instant
    /// and is a no-op.
    pub fn on_app_foreground(&self) -> Option<SessionStart> {
        let background_at = self.background_at.lock().take()?;
        let away = self
            .time
            .elapsed_realtime_millis()
            .saturating_sub(background_at);
        debug!(away_ms = away, "returned to foreground");
        Some(self.init())
    }

    /// Reflect a durable "session exported" write in the in-memory record.
    pub fn mark_exported(&self, session_id: &str) {
        {
            let mut guard = self.current.write();
            match guard.as_mut() {
                Some(session) if session.id == session_id => {
                    session.exported = true;
                    if !self.recent_writer.queue(session.clone()) {
                        return;
                    }
                }
                _ => return,
            }
        }
        let writer = Arc::clone(&self.recent_writer);
        self.scheduler.spawn_blocking(move || writer.write_pending());
    }
}
