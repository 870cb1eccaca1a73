//! Pulse: embedded telemetry agent
//!
//! Groups an application's activity into sessions, buffers events, trace spans and
//! resource samples in memory, persists them in a local store and ships them to a
//! collector backend in periodic batches. Exported sessions are pruned locally.

pub mod agent;
pub mod buffer;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod http;
pub mod identity;
pub mod installation;
pub mod logging;
pub mod resource;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod time;
pub mod trace;

pub use agent::{Agent, AgentBuilder};
pub use config::AgentConfig;
pub use error::{AgentError, StorageError};
