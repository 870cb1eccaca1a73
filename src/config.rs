//! Configuration System
//!
//! Agent policy knobs (session thresholds, buffer capacities, export cadence) loaded
//! through the `config` crate: built-in defaults, then an optional user file, then an
//! explicit file, then `PULSE_*` environment overrides. Collector credentials are
//! deployment secrets and are only ever read from the environment.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

pub const COLLECTOR_URL_ENV: &str = "PULSE_COLLECTOR_URL";
pub const API_KEY_ENV: &str = "PULSE_API_KEY";

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Start collectors and the export ticker as soon as the agent is built
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// Interval between scheduled export cycles
    #[serde(default = "default_time_between_exports_ms")]
    pub time_between_exports_ms: u64,

    /// Sessions older than this are never continued
    #[serde(default = "default_max_session_duration_ms")]
    pub max_session_duration_ms: u64,

    /// Inactivity gap after which a session is not continued
    #[serde(default = "default_max_session_time_between_events_ms")]
    pub max_session_time_between_events_ms: u64,

    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,

    #[serde(default = "default_trace_buffer_capacity")]
    pub trace_buffer_capacity: usize,

    #[serde(default = "default_resource_buffer_capacity")]
    pub resource_buffer_capacity: usize,

    /// Cadence of memory sampling while the resource collector is registered
    #[serde(default = "default_resource_sample_interval_ms")]
    pub resource_sample_interval_ms: u64,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the durable store lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_time_between_exports_ms() -> u64 {
    30_000
}

fn default_max_session_duration_ms() -> u64 {
    6 * 60 * 60 * 1000
}

fn default_max_session_time_between_events_ms() -> u64 {
    20 * 60 * 1000
}

fn default_event_buffer_capacity() -> usize {
    30
}

fn default_trace_buffer_capacity() -> usize {
    10
}

fn default_resource_buffer_capacity() -> usize {
    10
}

fn default_resource_sample_interval_ms() -> u64 {
    2_000
}

pub(crate) fn default_storage_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "pulse", "pulse")
        .map(|dirs| dirs.data_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from(".pulse/db"))
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_start: default_true(),
            time_between_exports_ms: default_time_between_exports_ms(),
            max_session_duration_ms: default_max_session_duration_ms(),
            max_session_time_between_events_ms: default_max_session_time_between_events_ms(),
            event_buffer_capacity: default_event_buffer_capacity(),
            trace_buffer_capacity: default_trace_buffer_capacity(),
            resource_buffer_capacity: default_resource_buffer_capacity(),
            resource_sample_interval_ms: default_resource_sample_interval_ms(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn time_between_exports(&self) -> Duration {
        Duration::from_millis(self.time_between_exports_ms)
    }

    pub fn max_session_duration(&self) -> Duration {
        Duration::from_millis(self.max_session_duration_ms)
    }

    pub fn max_session_time_between_events(&self) -> Duration {
        Duration::from_millis(self.max_session_time_between_events_ms)
    }

    pub fn resource_sample_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sample_interval_ms)
    }

    /// Validate the entire configuration, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let durations = [
            ("time_between_exports_ms", self.time_between_exports_ms),
            ("max_session_duration_ms", self.max_session_duration_ms),
            (
                "max_session_time_between_events_ms",
                self.max_session_time_between_events_ms,
            ),
            ("resource_sample_interval_ms", self.resource_sample_interval_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        let capacities = [
            ("event_buffer_capacity", self.event_buffer_capacity),
            ("trace_buffer_capacity", self.trace_buffer_capacity),
            ("resource_buffer_capacity", self.resource_buffer_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if self.storage.path.as_os_str().is_empty() {
            errors.push("storage.path cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Collector endpoint and key, supplied out-of-band by the deployment.
#[derive(Clone)]
pub struct CollectorCredentials {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for CollectorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorCredentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl CollectorCredentials {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Read `PULSE_COLLECTOR_URL` and `PULSE_API_KEY`. Both must be present.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(COLLECTOR_URL_ENV).ok()?;
        let api_key = std::env::var(API_KEY_ENV).ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self::new(base_url, api_key))
    }
}
