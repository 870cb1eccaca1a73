//! One export cycle: flush, collect, send, mark, clean up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{FlushOutcome, Flushable};
use crate::export::CleanupService;
use crate::http::{ExportBatch, ExportClient, HttpResponse};
use crate::installation::InstallationManager;
use crate::session::SessionManager;
use crate::storage::{Database, SessionEntity};

/// Earlier unexported sessions shipped per cycle, after the current one.
pub const PREVIOUS_SESSIONS_PER_CYCLE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Another cycle is still running.
    AlreadyExporting,
    /// Installation or session manager not initialized yet.
    NotReady,
    NothingToExport,
    Exported {
        rows: usize,
        session_included: bool,
    },
    /// Collector rejected the batch or was unreachable; rows stay unexported.
    Failed(HttpResponse),
    /// Storage could not be read, or an accepted batch could not be marked exported.
    StorageUnavailable,
}

impl ExportOutcome {
    pub fn is_exported(&self) -> bool {
        matches!(self, ExportOutcome::Exported { .. })
    }
}

struct ExportGuard<'a>(&'a AtomicBool);

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Exporter {
    database: Arc<dyn Database>,
    session_manager: Arc<SessionManager>,
    installation_manager: Arc<InstallationManager>,
    client: Arc<dyn ExportClient>,
    stores: Vec<Arc<dyn Flushable>>,
    cleanup: Arc<CleanupService>,
    is_exporting: AtomicBool,
    /// Sessions whose crash the collector has acknowledged.
    crash_reported: Mutex<HashSet<String>>,
}

impl Exporter {
    pub fn new(
        database: Arc<dyn Database>,
        session_manager: Arc<SessionManager>,
        installation_manager: Arc<InstallationManager>,
        client: Arc<dyn ExportClient>,
        stores: Vec<Arc<dyn Flushable>>,
        cleanup: Arc<CleanupService>,
    ) -> Self {
        Self {
            database,
            session_manager,
            installation_manager,
            client,
            stores,
            cleanup,
            is_exporting: AtomicBool::new(false),
            crash_reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.is_exporting.load(Ordering::Acquire)
    }

    /// Drain every buffered store into durable storage.
    pub fn flush_stores(&self) {
        for store in &self.stores {
            if let FlushOutcome::Flushed { written, failed } = store.flush() {
                debug!(kind = store.kind(), written, failed, "flushed before export");
            }
        }
    }

    pub async fn export_cycle(&self) -> ExportOutcome {
        if self
            .is_exporting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("export already in progress");
            return ExportOutcome::AlreadyExporting;
        }
        let _guard = ExportGuard(&self.is_exporting);

        let installation_id = match self.installation_manager.installation_id() {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "skipping export");
                return ExportOutcome::NotReady;
            }
        };
        let Some(session) = self.session_manager.current_session() else {
            warn!("skipping export, no current session");
            return ExportOutcome::NotReady;
        };

        self.flush_stores();

        let outcome = self.export_session(&installation_id, &session, true).await;
        if matches!(
            outcome,
            ExportOutcome::Failed(_) | ExportOutcome::StorageUnavailable
        ) {
            return outcome;
        }
        let swept = self.export_previous_sessions(&installation_id, &session.id).await;
        if outcome.is_exported() || swept > 0 {
            self.cleanup.cleanup();
        }
        outcome
    }

    /// Ship one session's unexported rows and mark them exported on acceptance.
    async fn export_session(
        &self,
        installation_id: &str,
        session: &SessionEntity,
        is_current: bool,
    ) -> ExportOutcome {
        let data = match self.database.get_data_for_export(&session.id) {
            Ok(data) => data,
            Err(err) => {
                error!(session_id = %session.id, error = %err, "failed to read export data");
                return ExportOutcome::StorageUnavailable;
            }
        };

        if session.crashed {
            self.report_crash(&session.id).await;
        }

        if data.is_empty() {
            debug!(session_id = %session.id, "nothing to export");
            return ExportOutcome::NothingToExport;
        }

        let rows = data.row_count();
        let session_included = data.session.is_some();
        let batch = ExportBatch {
            installation_id: installation_id.to_string(),
            data,
        };
        let response = self.client.export_collection(&batch).await;
        if !response.is_success() {
            warn!(session_id = %session.id, rows, response = %response, "export failed");
            return ExportOutcome::Failed(response);
        }

        if let Err(err) = self.database.mark_exported(&batch.data) {
            error!(session_id = %session.id, error = %err, "failed to mark rows exported");
            return ExportOutcome::StorageUnavailable;
        }
        if session_included && is_current {
            self.session_manager.mark_exported(&session.id);
        }
        info!(session_id = %session.id, rows, session_included, is_current, "exported batch");

        ExportOutcome::Exported {
            rows,
            session_included,
        }
    }

    /// Ship sessions left unexported by earlier runs (expired or crashed before
    /// their rows went out), oldest first, at most [`PREVIOUS_SESSIONS_PER_CYCLE`].
    /// Stops at the first failure. Returns how many were exported.
    async fn export_previous_sessions(&self, installation_id: &str, current_id: &str) -> usize {
        let sessions = match self.database.list_sessions() {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(error = %err, "failed to list earlier sessions");
                return 0;
            }
        };
        let mut previous: Vec<SessionEntity> = sessions
            .into_iter()
            .filter(|s| s.id != current_id && !s.exported)
            .collect();
        previous.reverse();
        previous.truncate(PREVIOUS_SESSIONS_PER_CYCLE);

        let mut exported = 0;
        for session in &previous {
            match self.export_session(installation_id, session, false).await {
                ExportOutcome::Exported { .. } => exported += 1,
                ExportOutcome::NothingToExport => {}
                other => {
                    debug!(session_id = %session.id, outcome = ?other, "stopping earlier-session sweep");
                    break;
                }
            }
        }
        exported
    }

    async fn report_crash(&self, session_id: &str) {
        if self.crash_reported.lock().contains(session_id) {
            return;
        }
        let response = self.client.mark_session_crashed(session_id).await;
        if response.is_success() {
            info!(session_id = %session_id, "reported crashed session");
            self.crash_reported.lock().insert(session_id.to_string());
        } else {
            warn!(session_id = %session_id, response = %response, "failed to report crashed session");
        }
    }
}
