//! CLI domain: parse, route and output only. Inspection and maintenance of the
//! local telemetry store.

mod output;
mod parse;
mod route;

pub use output::{format_sessions_json, format_sessions_table, SessionRow};
pub use parse::{Cli, Commands};
pub use route::RunContext;
