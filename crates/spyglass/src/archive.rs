// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spyglass export` and `spyglass import` command implementation.

use std::path::Path;

use spyglass_core::{SessionId, SpyglassError};
use spyglass_storage::{ExportOptions, LogStore};

use crate::info::format_size;

/// Export the store, or only `sessions` when any are given, to `output`.
pub async fn run_export(
    store: &LogStore,
    output: &Path,
    sessions: Vec<SessionId>,
) -> Result<(), SpyglassError> {
    let options = ExportOptions {
        sessions: (!sessions.is_empty()).then_some(sessions),
    };
    let info = store.export(output, options).await?;
    let size = std::fs::metadata(output)?.len();
    eprintln!(
        "Export complete: {} sessions, {} messages, {} tasks, {} blobs ({}) written to {}",
        info.session_count,
        info.message_count,
        info.task_count,
        info.blob_count,
        format_size(size),
        output.display()
    );
    Ok(())
}

/// Import every session of `archive` the store does not hold yet.
pub async fn run_import(store: &LogStore, archive: &Path) -> Result<(), SpyglassError> {
    let report = store.import(archive).await?;
    eprintln!(
        "Import complete: {} sessions ({} already present), {} messages, {} tasks",
        report.sessions, report.skipped_sessions, report.messages, report.tasks
    );
    if report.unreadable_bodies > 0 {
        eprintln!(
            "warning: {} bodies could not be read from the archive",
            report.unreadable_bodies
        );
    }
    Ok(())
}
