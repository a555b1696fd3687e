// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session rows.

use rusqlite::{Connection, Row, params};
use spyglass_core::types::{AppInfo, SessionRecord};
use spyglass_core::SessionId;

use crate::codec::{date_col, format_date, parsed_col};

const SESSION_COLUMNS: &str = "id, started_at, app_name, app_version, app_build";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: parsed_col(row, 0)?,
        started_at: date_col(row, 1)?,
        app: AppInfo {
            name: row.get(2)?,
            version: row.get(3)?,
            build: row.get(4)?,
        },
    })
}

/// Inserts the session unless a row with its id already exists.
pub(crate) fn ensure(conn: &Connection, session: &SessionRecord) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO sessions (id, started_at, app_name, app_version, app_build)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session.id.to_string(),
            format_date(&session.started_at),
            session.app.name,
            session.app.version,
            session.app.build,
        ],
    )?;
    Ok(inserted > 0)
}

/// All sessions, oldest first.
pub(crate) fn list(conn: &Connection) -> rusqlite::Result<Vec<SessionRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY started_at, id"
    ))?;
    stmt.query_map([], session_from_row)?.collect()
}

/// Ids of sessions that started before `cutoff`.
pub(crate) fn started_before(conn: &Connection, cutoff: &str) -> rusqlite::Result<Vec<SessionId>> {
    let mut stmt = conn.prepare("SELECT id FROM sessions WHERE started_at < ?1")?;
    stmt.query_map(params![cutoff], |row| parsed_col(row, 0))?
        .collect()
}

pub(crate) fn delete(conn: &Connection, id: SessionId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])
}
