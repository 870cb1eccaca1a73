//! Deletes sessions the collector already has.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::session::SessionManager;
use crate::storage::Database;

pub struct CleanupService {
    database: Arc<dyn Database>,
    session_manager: Arc<SessionManager>,
}

impl CleanupService {
    pub fn new(database: Arc<dyn Database>, session_manager: Arc<SessionManager>) -> Self {
        Self {
            database,
            session_manager,
        }
    }

    /// Remove exported sessions other than the current one. Returns how many went.
    pub fn cleanup(&self) -> usize {
        match self.session_manager.session_id() {
            Ok(current) => self.cleanup_excluding(&current),
            Err(_) => {
                debug!("skipping cleanup, no current session");
                0
            }
        }
    }

    /// Remove exported sessions other than `keep_session_id`.
    pub fn cleanup_excluding(&self, keep_session_id: &str) -> usize {
        match self.database.delete_exported_sessions(keep_session_id) {
            Ok(0) => 0,
            Ok(deleted) => {
                info!(deleted, kept = %keep_session_id, "deleted exported sessions");
                deleted
            }
            Err(err) => {
                warn!(error = %err, "cleanup failed");
                0
            }
        }
    }
}
