//! Error types for the Pulse telemetry agent.
//!
//! Transport failures are not errors here: the collector's answers are modelled
//! as [`crate::http::HttpResponse`] values and handled by the exporter.

use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Row references a session that is not (or no longer) persisted.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage engine error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Row serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Agent-level errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    /// A component was used before its `init()` ran. This is a programming error.
    #[error("{0} accessed before init()")]
    NotInitialized(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Scheduler error: {0}")]
    SchedulerError(String),
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::ConfigError(err.to_string())
    }
}

impl StorageError {
    /// True when the store rejected a row because its session is missing.
    pub fn is_referential(&self) -> bool {
        matches!(self, StorageError::SessionNotFound(_))
    }
}
