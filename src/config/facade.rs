//! Config loading entry points.

use std::path::Path;

use config::ConfigError;

use crate::config::merge::merge_policy;
use crate::config::sources::{agent_file, environment, user_file};
use crate::config::AgentConfig;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the full precedence chain: defaults, user file, explicit file, environment.
    pub fn load(explicit: Option<&Path>) -> Result<AgentConfig, ConfigError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = user_file::add_to_builder(builder)?;
        if let Some(path) = explicit {
            builder = agent_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder);
        builder.build()?.try_deserialize()
    }

    /// Load defaults plus a single file, ignoring user file and environment.
    pub fn load_from_file(path: &Path) -> Result<AgentConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = agent_file::add_to_builder(builder, path)?;
        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("pulse.toml");
        std::fs::write(
            &config_file,
            r#"
auto_start = false
time_between_exports_ms = 5000
event_buffer_capacity = 4

[storage]
path = "/tmp/pulse-test-db"

[logging]
level = "debug"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&config_file).unwrap();
        assert!(!config.auto_start);
        assert_eq!(config.time_between_exports_ms, 5000);
        assert_eq!(config.event_buffer_capacity, 4);
        assert_eq!(config.trace_buffer_capacity, 10);
        assert_eq!(config.max_session_duration_ms, 6 * 60 * 60 * 1000);
        assert_eq!(config.storage.path, std::path::PathBuf::from("/tmp/pulse-test-db"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope.toml");
        assert!(ConfigLoader::load_from_file(&missing).is_err());
    }
}
