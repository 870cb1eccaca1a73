//! Integration tests for the Pulse telemetry agent

mod buffered_store;
mod config_integration;
mod export_pipeline;
mod session_lifecycle;
mod test_utils;
