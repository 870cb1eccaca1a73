//! Configuration layering and its effect on a built agent.

use std::sync::Arc;

use pulse::agent::Agent;
use pulse::config::{AgentConfig, CollectorCredentials, ConfigLoader};
use pulse::error::AgentError;
use pulse::http::RecordingExportClient;
use tempfile::TempDir;

use crate::integration::test_utils::lock_env;

#[test]
fn environment_overrides_file_values() {
    let _guard = lock_env();
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("pulse.toml");
    std::fs::write(
        &config_file,
        "event_buffer_capacity = 12\ntime_between_exports_ms = 1000\n",
    )
    .unwrap();

    std::env::set_var("PULSE_EVENT_BUFFER_CAPACITY", "40");
    std::env::set_var("PULSE_STORAGE__PATH", temp_dir.path().join("db"));
    let loaded = ConfigLoader::load(Some(&config_file));
    std::env::remove_var("PULSE_EVENT_BUFFER_CAPACITY");
    std::env::remove_var("PULSE_STORAGE__PATH");

    let config = loaded.unwrap();
    assert_eq!(config.event_buffer_capacity, 40);
    assert_eq!(config.time_between_exports_ms, 1000);
    assert_eq!(config.storage.path, temp_dir.path().join("db"));
}

#[test]
fn credentials_come_from_environment_only() {
    let _guard = lock_env();
    std::env::remove_var("PULSE_COLLECTOR_URL");
    std::env::remove_var("PULSE_API_KEY");
    assert!(CollectorCredentials::from_env().is_none());

    let temp_dir = TempDir::new().unwrap();
    let mut config = AgentConfig::default();
    config.storage.path = temp_dir.path().join("db");
    let result = Agent::builder().config(config).build();
    assert!(matches!(result, Err(AgentError::ConfigError(_))));

    std::env::set_var("PULSE_COLLECTOR_URL", "https://collector.test/");
    std::env::set_var("PULSE_API_KEY", "secret");
    let credentials = CollectorCredentials::from_env();
    std::env::remove_var("PULSE_COLLECTOR_URL");
    std::env::remove_var("PULSE_API_KEY");

    let credentials = credentials.unwrap();
    assert_eq!(credentials.base_url, "https://collector.test");
    assert!(!format!("{:?}", credentials).contains("secret"));
}

#[test]
fn agent_opens_its_own_store_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = AgentConfig {
        auto_start: false,
        ..AgentConfig::default()
    };
    config.storage.path = temp_dir.path().join("db");

    let agent = Agent::builder()
        .config(config)
        .client(Arc::new(RecordingExportClient::new()))
        .build()
        .unwrap();
    agent.start();
    assert!(agent.session_id().is_ok());
    assert!(temp_dir.path().join("db").exists());
}
