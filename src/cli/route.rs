//! CLI route: run context and dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::agent::Agent;
use crate::cli::output::{format_sessions_json, format_sessions_table, SessionRow};
use crate::cli::parse::Commands;
use crate::config::{AgentConfig, ConfigLoader};
use crate::error::AgentError;
use crate::export::ExportOutcome;
use crate::http::ExportClient;
use crate::storage::{Database, KeyValueStore, SledDatabase, SledPrefs};

/// Loaded configuration plus the opened local store.
pub struct RunContext {
    config: AgentConfig,
    database: Arc<SledDatabase>,
    prefs: Arc<SledPrefs>,
}

impl RunContext {
    pub fn new(config_path: Option<PathBuf>, storage: Option<PathBuf>) -> Result<Self, AgentError> {
        let mut config = ConfigLoader::load(config_path.as_deref())?;
        if let Some(path) = storage {
            config.storage.path = path;
        }
        Self::with_config(config)
    }

    pub fn with_config(config: AgentConfig) -> Result<Self, AgentError> {
        let database = SledDatabase::open(&config.storage.path)?;
        let prefs = Arc::new(database.prefs()?);
        Ok(Self {
            config,
            database: Arc::new(database),
            prefs,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn execute(&self, command: &Commands) -> Result<String, AgentError> {
        match command {
            Commands::Status { format } => self.status(format),
            Commands::Export => self.export(None),
            Commands::Purge => self.purge(),
        }
    }

    fn status(&self, format: &str) -> Result<String, AgentError> {
        let installation_id = self.prefs.get_installation_id()?;
        let recent = self.prefs.get_recent_session()?.map(|s| s.id);
        let mut rows = Vec::new();
        for session in self.database.list_sessions()? {
            let pending_rows = self.database.get_data_for_export(&session.id)?.row_count();
            rows.push(SessionRow {
                recent: recent.as_deref() == Some(session.id.as_str()),
                id: session.id,
                created_at: session.created_at,
                last_event_time: session.last_event_time,
                crashed: session.crashed,
                exported: session.exported,
                pending_rows,
            });
        }
        match format {
            "json" => format_sessions_json(installation_id.as_deref(), &rows),
            "text" => Ok(format_sessions_table(installation_id.as_deref(), &rows)),
            other => Err(AgentError::ConfigError(format!(
                "Unknown output format '{}': expected text or json",
                other
            ))),
        }
    }

    /// Export the recorded session, and earlier unexported ones, once. Collectors are
    /// not started and the session is not rotated. `client` replaces the HTTP client
    /// built from the environment.
    pub fn export(&self, client: Option<Arc<dyn ExportClient>>) -> Result<String, AgentError> {
        let config = AgentConfig {
            auto_start: false,
            ..self.config.clone()
        };
        let mut builder = Agent::builder()
            .config(config)
            .storage(self.database.clone(), self.prefs.clone());
        if let Some(client) = client {
            builder = builder.client(client);
        }
        let agent = builder.build()?;
        let outcome = agent.scheduler().block_on(agent.export_stored());
        info!(outcome = ?outcome, "cli export finished");

        match outcome {
            ExportOutcome::Exported {
                rows,
                session_included,
            } => Ok(format!(
                "Exported {} rows{}",
                rows,
                if session_included { " and the session record" } else { "" }
            )),
            ExportOutcome::NothingToExport => Ok("Nothing to export".to_string()),
            ExportOutcome::AlreadyExporting => Ok("An export is already running".to_string()),
            ExportOutcome::NotReady => Err(AgentError::NotInitialized("agent")),
            ExportOutcome::StorageUnavailable => Err(AgentError::ConfigError(
                "Local store could not be read".to_string(),
            )),
            ExportOutcome::Failed(response) => {
                Err(AgentError::TransportError(response.to_string()))
            }
        }
    }

    fn purge(&self) -> Result<String, AgentError> {
        let keep = self
            .prefs
            .get_recent_session()?
            .map(|session| session.id)
            .unwrap_or_default();
        let deleted = self.database.delete_exported_sessions(&keep)?;
        self.database.flush()?;
        Ok(format!("Deleted {} exported sessions", deleted))
    }
}
