// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The label dedup set. Derived from `messages`; rebuilt after deletes.

use rusqlite::{Connection, params};
use spyglass_core::types::LabelCount;

/// Counts one more use of `label`. Returns true when the label is new.
pub(crate) fn record(conn: &Connection, label: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "INSERT INTO labels (name, count) VALUES (?1, 1)
         ON CONFLICT(name) DO UPDATE SET count = count + 1
         RETURNING count",
        params![label],
        |row| row.get(0),
    )?;
    Ok(count == 1)
}

/// Recomputes the set from the surviving messages.
pub(crate) fn rebuild(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DELETE FROM labels;
         INSERT INTO labels (name, count)
             SELECT label, COUNT(*) FROM messages GROUP BY label;",
    )
}

pub(crate) fn list(conn: &Connection) -> rusqlite::Result<Vec<LabelCount>> {
    let mut stmt = conn.prepare("SELECT name, count FROM labels ORDER BY name")?;
    stmt.query_map([], |row| {
        Ok(LabelCount {
            label: row.get(0)?,
            count: row.get(1)?,
        })
    })?
    .collect()
}
