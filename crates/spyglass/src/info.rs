// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spyglass info` command implementation.
//!
//! Summarises a store: record counts, disk usage, sessions and the labels
//! messages were logged under.

use serde::Serialize;
use spyglass_core::SpyglassError;
use spyglass_core::types::{LabelCount, SessionRecord};
use spyglass_storage::{LogStore, StoreInfo};

/// Structured output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub path: String,
    #[serde(flatten)]
    pub info: StoreInfo,
    pub sessions: Vec<SessionRecord>,
    pub labels: Vec<LabelCount>,
}

/// Format a byte count with a binary unit.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Run the `spyglass info` command.
pub async fn run_info(store: &LogStore, json: bool) -> Result<(), SpyglassError> {
    let response = InfoResponse {
        path: store.dir().display().to_string(),
        info: store.info().await?,
        sessions: store.sessions().await?,
        labels: store.labels().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render(&response));
    }
    Ok(())
}

fn render(response: &InfoResponse) -> String {
    let info = &response.info;
    let mut out = String::new();
    out.push_str(&format!("Store     {}\n", response.path));
    out.push_str(&format!("Id        {}\n", info.store_id));
    out.push_str(&format!("Version   {}\n", info.version));
    out.push_str(&format!("Created   {}\n", info.creation_date.to_rfc3339()));
    out.push_str(&format!("Modified  {}\n", info.modified_date.to_rfc3339()));
    out.push_str(&format!("Sessions  {}\n", info.session_count));
    out.push_str(&format!("Messages  {}\n", info.message_count));
    out.push_str(&format!("Tasks     {}\n", info.task_count));
    out.push_str(&format!(
        "Blobs     {} ({} on disk, {} decompressed)\n",
        info.blob_count,
        format_size(info.blobs_size),
        format_size(info.blobs_decompressed_size)
    ));
    out.push_str(&format!("Size      {}\n", format_size(info.total_store_size)));

    if !response.sessions.is_empty() {
        out.push_str("\nSessions:\n");
        for session in &response.sessions {
            let app = match (&session.app.name, &session.app.version) {
                (Some(name), Some(version)) => format!("{name} {version}"),
                (Some(name), None) => name.clone(),
                _ => "-".to_string(),
            };
            out.push_str(&format!(
                "  {}  {}  {app}\n",
                session.id,
                session.started_at.to_rfc3339()
            ));
        }
    }
    if !response.labels.is_empty() {
        out.push_str("\nLabels:\n");
        for label in &response.labels {
            out.push_str(&format!("  {:<16} {}\n", label.label, label.count));
        }
    }
    out
}
