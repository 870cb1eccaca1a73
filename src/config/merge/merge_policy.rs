//! Merge rules: defaults first, later sources override earlier ones.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with the agent's policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let storage_path = crate::config::default_storage_path();
    Config::builder()
        .set_default("auto_start", true)?
        .set_default("time_between_exports_ms", 30_000i64)?
        .set_default("max_session_duration_ms", 6 * 60 * 60 * 1000i64)?
        .set_default("max_session_time_between_events_ms", 20 * 60 * 1000i64)?
        .set_default("storage.path", storage_path.to_string_lossy().to_string())
}
