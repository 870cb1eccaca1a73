//! Installation identity.
//!
//! One id per install, generated on first start and reused afterwards. A fresh id
//! is registered with the collector once; a failed registration only costs the
//! backend a record, the id is still used locally.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::AgentError;
use crate::http::ExportClient;
use crate::identity::IdFactory;
use crate::scheduler::Scheduler;
use crate::storage::KeyValueStore;
use crate::time::TimeProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    pub created_at: i64,
}

/// Whether `init` found an id or had to mint one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationStart {
    Existing,
    Created,
}

pub struct InstallationManager {
    prefs: Arc<dyn KeyValueStore>,
    ids: Arc<dyn IdFactory>,
    time: Arc<dyn TimeProvider>,
    client: Arc<dyn ExportClient>,
    scheduler: Scheduler,
    current: RwLock<Option<String>>,
}

impl InstallationManager {
    pub fn new(
        prefs: Arc<dyn KeyValueStore>,
        ids: Arc<dyn IdFactory>,
        time: Arc<dyn TimeProvider>,
        client: Arc<dyn ExportClient>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            prefs,
            ids,
            time,
            client,
            scheduler,
            current: RwLock::new(None),
        }
    }

    pub fn init(&self) -> InstallationStart {
        match self.prefs.get_installation_id() {
            Ok(Some(id)) => {
                debug!(installation_id = %id, "loaded installation id");
                *self.current.write() = Some(id);
                return InstallationStart::Existing;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read installation id, generating one"),
        }

        let installation = Installation {
            id: self.ids.create_id(),
            created_at: self.time.now_millis(),
        };
        *self.current.write() = Some(installation.id.clone());
        info!(installation_id = %installation.id, "created installation");

        let prefs = Arc::clone(&self.prefs);
        let id = installation.id.clone();
        self.scheduler.spawn_blocking(move || {
            if let Err(err) = prefs.set_installation_id(&id) {
                error!(installation_id = %id, error = %err, "failed to persist installation id");
            }
        });

        let client = Arc::clone(&self.client);
        self.scheduler.spawn(async move {
            let response = client.export_installation(&installation).await;
            if response.is_success() {
                debug!(installation_id = %installation.id, "installation registered");
            } else {
                warn!(installation_id = %installation.id, response = %response, "installation registration failed");
            }
        });

        InstallationStart::Created
    }

    pub fn installation_id(&self) -> Result<String, AgentError> {
        self.current
            .read()
            .clone()
            .ok_or(AgentError::NotInitialized("installation manager"))
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }
}
