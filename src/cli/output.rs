//! CLI output: session listing as a table or JSON.

use chrono::{TimeZone, Utc};
use comfy_table::Table;
use serde::Serialize;

use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub created_at: i64,
    pub last_event_time: i64,
    pub crashed: bool,
    pub exported: bool,
    pub pending_rows: usize,
    pub recent: bool,
}

fn format_millis(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    match Utc.timestamp_millis_opt(millis).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

pub fn format_sessions_table(installation_id: Option<&str>, rows: &[SessionRow]) -> String {
    let mut out = format!("Installation: {}\n", installation_id.unwrap_or("(none)"));
    if rows.is_empty() {
        out.push_str("No sessions stored.");
        return out;
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec![
        "Session", "Created", "Last Event", "Crashed", "Exported", "Pending",
    ]);
    for row in rows {
        let id = if row.recent {
            format!("{} *", row.id)
        } else {
            row.id.clone()
        };
        table.add_row(vec![
            id,
            format_millis(row.created_at),
            format_millis(row.last_event_time),
            yes_no(row.crashed).to_string(),
            yes_no(row.exported).to_string(),
            row.pending_rows.to_string(),
        ]);
    }
    out.push_str(&table.to_string());
    out
}

pub fn format_sessions_json(
    installation_id: Option<&str>,
    rows: &[SessionRow],
) -> Result<String, AgentError> {
    serde_json::to_string_pretty(&serde_json::json!({
        "installation_id": installation_id,
        "sessions": rows,
    }))
    .map_err(|e| AgentError::ConfigError(format!("Failed to encode status: {}", e)))
}
