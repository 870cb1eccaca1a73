//! Configuration sources, in precedence order.

pub mod agent_file;
pub mod environment;
pub mod user_file;
