//! Sled-backed implementation of [`Database`].

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Batch, Db, Tree};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::prefs::SledPrefs;
use crate::storage::records::{
    EventEntity, ExportData, ResourceUsageEntity, SessionEntity, TraceEntity,
};
use crate::storage::Database;

const TREE_SESSIONS: &str = "sessions";
const TREE_EVENTS: &str = "events";
const TREE_TRACES: &str = "traces";
const TREE_RESOURCE_USAGE: &str = "resource_usage";

/// Rows that belong to a session and are keyed by their own id.
trait SessionRow: Serialize + DeserializeOwned {
    fn row_id(&self) -> &str;
    fn session_id(&self) -> &str;
    fn is_exported(&self) -> bool;
    fn order_key(&self) -> i64;
}

impl SessionRow for EventEntity {
    fn row_id(&self) -> &str {
        &self.id
    }
    fn session_id(&self) -> &str {
        &self.session_id
    }
    fn is_exported(&self) -> bool {
        self.exported
    }
    fn order_key(&self) -> i64 {
        self.created_at
    }
}

impl SessionRow for TraceEntity {
    fn row_id(&self) -> &str {
        &self.trace_id
    }
    fn session_id(&self) -> &str {
        &self.session_id
    }
    fn is_exported(&self) -> bool {
        self.exported
    }
    fn order_key(&self) -> i64 {
        self.start_time
    }
}

impl SessionRow for ResourceUsageEntity {
    fn row_id(&self) -> &str {
        &self.id
    }
    fn session_id(&self) -> &str {
        &self.session_id
    }
    fn is_exported(&self) -> bool {
        self.exported
    }
    fn order_key(&self) -> i64 {
        self.created_at
    }
}

#[derive(Clone)]
pub struct SledDatabase {
    db: Db,
    sessions: Tree,
    events: Tree,
    traces: Tree,
    resource_usage: Tree,
}

impl SledDatabase {
    /// Open (or create) a database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::new(sled::open(path)?)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, StorageError> {
        Self::new(sled::Config::new().temporary(true).open()?)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let sessions = db.open_tree(TREE_SESSIONS)?;
        let events = db.open_tree(TREE_EVENTS)?;
        let traces = db.open_tree(TREE_TRACES)?;
        let resource_usage = db.open_tree(TREE_RESOURCE_USAGE)?;
        Ok(Self {
            db,
            sessions,
            events,
            traces,
            resource_usage,
        })
    }

    /// Key-value store sharing this database.
    pub fn prefs(&self) -> Result<SledPrefs, StorageError> {
        SledPrefs::new(&self.db)
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn session_exists(&self, session_id: &str) -> Result<bool, StorageError> {
        Ok(self.sessions.contains_key(session_id.as_bytes())?)
    }

    fn create_row<R: SessionRow>(&self, tree: &Tree, row: &R) -> Result<(), StorageError> {
        if !self.session_exists(row.session_id())? {
            return Err(StorageError::SessionNotFound(row.session_id().to_string()));
        }
        tree.insert(row.row_id().as_bytes(), serde_json::to_vec(row)?)?;
        Ok(())
    }

    fn insert_rows<R: SessionRow>(&self, tree: &Tree, rows: &[R]) -> Result<usize, StorageError> {
        let mut known: HashSet<String> = HashSet::new();
        let mut batch = Batch::default();
        let mut written = 0usize;
        for row in rows {
            let session_id = row.session_id();
            if !known.contains(session_id) {
                if !self.session_exists(session_id)? {
                    debug!(session_id = %session_id, row_id = %row.row_id(), "dropping row for missing session");
                    continue;
                }
                known.insert(session_id.to_string());
            }
            batch.insert(row.row_id().as_bytes(), serde_json::to_vec(row)?);
            written += 1;
        }
        tree.apply_batch(batch)?;
        Ok(written)
    }

    fn unexported_rows<R: SessionRow>(
        &self,
        tree: &Tree,
        session_id: &str,
    ) -> Result<Vec<R>, StorageError> {
        let mut out = Vec::new();
        for result in tree.iter() {
            let (_, value) = result?;
            let row: R = serde_json::from_slice(&value)?;
            if row.session_id() == session_id && !row.is_exported() {
                out.push(row);
            }
        }
        out.sort_by_key(|r| r.order_key());
        Ok(out)
    }

    fn delete_rows_of<R: SessionRow>(
        &self,
        tree: &Tree,
        session_ids: &HashSet<String>,
    ) -> Result<usize, StorageError> {
        let mut batch = Batch::default();
        let mut removed = 0usize;
        for result in tree.iter() {
            let (key, value) = result?;
            let row: R = serde_json::from_slice(&value)?;
            if session_ids.contains(row.session_id()) {
                batch.remove(key);
                removed += 1;
            }
        }
        tree.apply_batch(batch)?;
        Ok(removed)
    }
}

fn get_json<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, StorageError> {
    let Some(raw) = tree.get(key.as_bytes())? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}

/// Atomically rewrites the JSON value at `key`. Returns false when the key is absent.
fn update_json<T, F>(tree: &Tree, key: &str, mut apply: F) -> Result<bool, StorageError>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T),
{
    let mut found = false;
    let mut decode_error = None;
    tree.fetch_and_update(key.as_bytes(), |old| {
        let old = old?;
        match serde_json::from_slice::<T>(old) {
            Ok(mut value) => {
                apply(&mut value);
                found = true;
                Some(serde_json::to_vec(&value).unwrap_or_else(|_| old.to_vec()))
            }
            Err(err) => {
                decode_error = Some(err);
                Some(old.to_vec())
            }
        }
    })?;
    if let Some(err) = decode_error {
        return Err(err.into());
    }
    Ok(found)
}

impl Database for SledDatabase {
    fn create_session(&self, session: &SessionEntity) -> Result<(), StorageError> {
        self.sessions
            .insert(session.id.as_bytes(), serde_json::to_vec(session)?)?;
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<SessionEntity>, StorageError> {
        get_json(&self.sessions, session_id)
    }

    fn set_session_crashed(&self, session_id: &str) -> Result<(), StorageError> {
        if !update_json(&self.sessions, session_id, |s: &mut SessionEntity| {
            s.crashed = true
        })? {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn set_session_exported(&self, session_id: &str) -> Result<(), StorageError> {
        if !update_json(&self.sessions, session_id, |s: &mut SessionEntity| {
            s.exported = true
        })? {
            return Err(StorageError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    fn list_sessions(&self) -> Result<Vec<SessionEntity>, StorageError> {
        let mut out = Vec::new();
        for result in self.sessions.iter() {
            let (_, value) = result?;
            out.push(serde_json::from_slice::<SessionEntity>(&value)?);
        }
        out.sort_by_key(|s| std::cmp::Reverse(s.created_at));
        Ok(out)
    }

    fn create_event(&self, event: &EventEntity) -> Result<(), StorageError> {
        self.create_row(&self.events, event)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<EventEntity>, StorageError> {
        get_json(&self.events, event_id)
    }

    fn insert_events(&self, events: &[EventEntity]) -> Result<usize, StorageError> {
        self.insert_rows(&self.events, events)
    }

    fn set_event_exported(&self, event_id: &str) -> Result<(), StorageError> {
        update_json(&self.events, event_id, |e: &mut EventEntity| e.exported = true)?;
        Ok(())
    }

    fn create_trace(&self, trace: &TraceEntity) -> Result<(), StorageError> {
        self.create_row(&self.traces, trace)
    }

    fn get_trace(&self, trace_id: &str) -> Result<Option<TraceEntity>, StorageError> {
        get_json(&self.traces, trace_id)
    }

    fn insert_traces(&self, traces: &[TraceEntity]) -> Result<usize, StorageError> {
        self.insert_rows(&self.traces, traces)
    }

    fn set_trace_exported(&self, trace_id: &str) -> Result<(), StorageError> {
        update_json(&self.traces, trace_id, |t: &mut TraceEntity| t.exported = true)?;
        Ok(())
    }

    fn create_resource_usage(&self, sample: &ResourceUsageEntity) -> Result<(), StorageError> {
        self.create_row(&self.resource_usage, sample)
    }

    fn get_resource_usage(
        &self,
        sample_id: &str,
    ) -> Result<Option<ResourceUsageEntity>, StorageError> {
        get_json(&self.resource_usage, sample_id)
    }

    fn insert_resource_usage(
        &self,
        samples: &[ResourceUsageEntity],
    ) -> Result<usize, StorageError> {
        self.insert_rows(&self.resource_usage, samples)
    }

    fn set_resource_usage_exported(&self, sample_id: &str) -> Result<(), StorageError> {
        update_json(
            &self.resource_usage,
            sample_id,
            |r: &mut ResourceUsageEntity| r.exported = true,
        )?;
        Ok(())
    }

    fn get_data_for_export(&self, session_id: &str) -> Result<ExportData, StorageError> {
        let session = self
            .get_session(session_id)?
            .filter(|session| !session.exported);
        Ok(ExportData {
            session,
            events: self.unexported_rows(&self.events, session_id)?,
            traces: self.unexported_rows(&self.traces, session_id)?,
            resource_samples: self.unexported_rows(&self.resource_usage, session_id)?,
        })
    }

    fn delete_exported_sessions(&self, excluding_session_id: &str) -> Result<usize, StorageError> {
        let doomed: HashSet<String> = self
            .list_sessions()?
            .into_iter()
            .filter(|s| s.exported && s.id != excluding_session_id)
            .map(|s| s.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        // Rows go first so an interrupted purge leaves the session to be retried.
        let events = self.delete_rows_of::<EventEntity>(&self.events, &doomed)?;
        let traces = self.delete_rows_of::<TraceEntity>(&self.traces, &doomed)?;
        let samples =
            self.delete_rows_of::<ResourceUsageEntity>(&self.resource_usage, &doomed)?;

        let mut batch = Batch::default();
        for id in &doomed {
            batch.remove(id.as_bytes());
        }
        self.sessions.apply_batch(batch)?;

        debug!(
            sessions = doomed.len(),
            events, traces, samples, "deleted exported sessions"
        );
        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::TraceStatus;

    fn event(id: &str, session_id: &str, created_at: i64) -> EventEntity {
        EventEntity {
            id: id.to_string(),
            event_type: "custom".to_string(),
            serialized_data: "{}".to_string(),
            timestamp: created_at,
            created_at,
            session_id: session_id.to_string(),
            exported: false,
        }
    }

    fn trace(id: &str, session_id: &str) -> TraceEntity {
        TraceEntity {
            trace_id: id.to_string(),
            group_id: id.to_string(),
            parent_id: None,
            name: "load".to_string(),
            status: TraceStatus::Ok,
            start_time: 1,
            end_time: 2,
            has_ended: true,
            session_id: session_id.to_string(),
            exported: false,
        }
    }

    #[test]
    fn orphaned_event_is_rejected() {
        let db = SledDatabase::temporary().unwrap();
        let err = db.create_event(&event("e1", "missing", 1)).unwrap_err();
        assert!(err.is_referential());
        assert!(db.get_event("e1").unwrap().is_none());
    }

    #[test]
    fn batch_insert_skips_rows_without_session() {
        let db = SledDatabase::temporary().unwrap();
        db.create_session(&SessionEntity::new("s1", 10)).unwrap();
        let written = db
            .insert_events(&[event("e1", "s1", 1), event("e2", "ghost", 2), event("e3", "s1", 3)])
            .unwrap();
        assert_eq!(written, 2);
        assert!(db.get_event("e2").unwrap().is_none());
        assert!(db.get_event("e3").unwrap().is_some());
    }

    #[test]
    fn export_data_contains_only_unexported_rows_in_order() {
        let db = SledDatabase::temporary().unwrap();
        db.create_session(&SessionEntity::new("s1", 10)).unwrap();
        db.insert_events(&[event("b", "s1", 2), event("a", "s1", 1), event("c", "s1", 3)])
            .unwrap();
        db.set_event_exported("c").unwrap();

        let data = db.get_data_for_export("s1").unwrap();
        assert!(data.session.is_some());
        let ids: Vec<_> = data.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        db.set_session_exported("s1").unwrap();
        assert!(db.get_data_for_export("s1").unwrap().session.is_none());
    }

    #[test]
    fn crash_and_export_flags_do_not_clobber_each_other() {
        let db = SledDatabase::temporary().unwrap();
        db.create_session(&SessionEntity::new("s1", 10)).unwrap();
        db.set_session_crashed("s1").unwrap();
        db.set_session_exported("s1").unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert!(session.crashed);
        assert!(session.exported);
        assert!(db.set_session_crashed("nope").unwrap_err().is_referential());
    }

    #[test]
    fn delete_exported_sessions_keeps_excluded_and_unexported() {
        let db = SledDatabase::temporary().unwrap();
        for id in ["old", "current", "pending"] {
            db.create_session(&SessionEntity::new(id, 1)).unwrap();
        }
        db.set_session_exported("old").unwrap();
        db.set_session_exported("current").unwrap();
        db.create_event(&event("e-old", "old", 1)).unwrap();
        db.create_trace(&trace("t-old", "old")).unwrap();
        db.create_event(&event("e-cur", "current", 1)).unwrap();

        let removed = db.delete_exported_sessions("current").unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_session("old").unwrap().is_none());
        assert!(db.get_event("e-old").unwrap().is_none());
        assert!(db.get_trace("t-old").unwrap().is_none());
        assert!(db.get_session("current").unwrap().is_some());
        assert!(db.get_event("e-cur").unwrap().is_some());
        assert!(db.get_session("pending").unwrap().is_some());
    }

    #[test]
    fn sessions_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let db = SledDatabase::open(dir.path()).unwrap();
            db.create_session(&SessionEntity::new("s1", 42)).unwrap();
            db.flush().unwrap();
        }
        let db = SledDatabase::open(dir.path()).unwrap();
        assert_eq!(db.get_session("s1").unwrap().unwrap().created_at, 42);
    }
}
