// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message rows.

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use spyglass_core::types::{Level, MessageRecord, NewMessage, Provenance};
use spyglass_core::{MessageId, SessionId, TaskId};

use crate::codec::{date_col, format_date, json_col, opt_parsed_col, parsed_col};
use crate::queries::labels;

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, session_id, created_at, level, label, text, file, function, line, metadata, pinned, task_id";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let rank: i64 = row.get(3)?;
    let level = Level::from_rank(rank).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("unknown level rank {rank}").into(),
        )
    })?;
    Ok(MessageRecord {
        id: MessageId(row.get(0)?),
        session_id: parsed_col(row, 1)?,
        created_at: date_col(row, 2)?,
        level,
        label: row.get(4)?,
        text: row.get(5)?,
        provenance: Provenance {
            file: row.get(6)?,
            function: row.get(7)?,
            line: row.get(8)?,
        },
        metadata: json_col(row, 9)?,
        pinned: row.get(10)?,
        task_id: opt_parsed_col(row, 11)?,
    })
}

/// Inserts the message and counts its label.
pub(crate) fn insert(
    conn: &Connection,
    message: &NewMessage,
    task_id: Option<TaskId>,
) -> rusqlite::Result<MessageId> {
    let metadata = serde_json::to_string(&message.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO messages (session_id, created_at, level, label, text, file, function, line, metadata, task_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            message.session_id.to_string(),
            format_date(&message.created_at),
            message.level.rank(),
            message.label,
            message.text,
            message.provenance.file,
            message.provenance.function,
            message.provenance.line,
            metadata,
            task_id.map(|id| id.to_string()),
        ],
    )?;
    let id = MessageId(conn.last_insert_rowid());
    labels::record(conn, &message.label)?;
    Ok(id)
}

/// Inserts an exported message verbatim apart from its storage-local id.
pub(crate) fn insert_record(conn: &Connection, message: &MessageRecord) -> rusqlite::Result<MessageId> {
    let metadata = serde_json::to_string(&message.metadata)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO messages (session_id, created_at, level, label, text, file, function, line, metadata, pinned, task_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            message.session_id.to_string(),
            format_date(&message.created_at),
            message.level.rank(),
            message.label,
            message.text,
            message.provenance.file,
            message.provenance.function,
            message.provenance.line,
            metadata,
            message.pinned,
            message.task_id.map(|id| id.to_string()),
        ],
    )?;
    let id = MessageId(conn.last_insert_rowid());
    labels::record(conn, &message.label)?;
    Ok(id)
}

pub(crate) fn get(conn: &Connection, id: MessageId) -> rusqlite::Result<Option<MessageRecord>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id.0],
        message_from_row,
    )
    .optional()
}

pub(crate) fn for_session(conn: &Connection, session: SessionId) -> rusqlite::Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY created_at, id"
    ))?;
    stmt.query_map(params![session.to_string()], message_from_row)?
        .collect()
}

pub(crate) fn set_level(conn: &Connection, id: MessageId, level: Level) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE messages SET level = ?1 WHERE id = ?2",
        params![level.rank(), id.0],
    )
}

/// Sets the pinned flag on the message and the task linked to it.
pub(crate) fn set_pinned(conn: &Connection, id: MessageId, pinned: bool) -> rusqlite::Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET pinned = ?1 WHERE id = ?2",
        params![pinned, id.0],
    )?;
    conn.execute(
        "UPDATE tasks SET pinned = ?1 WHERE message_id = ?2",
        params![pinned, id.0],
    )?;
    Ok(changed)
}

pub(crate) fn delete_for_session(conn: &Connection, session: SessionId) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM messages WHERE session_id = ?1",
        params![session.to_string()],
    )
}

pub(crate) fn count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
}

/// The `limit` oldest unpinned messages as `(id, linked task)` pairs.
pub(crate) fn oldest_unpinned(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<(MessageId, Option<TaskId>)>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id FROM messages WHERE pinned = 0 ORDER BY created_at, id LIMIT ?1",
    )?;
    stmt.query_map(params![limit as i64], |row| {
        Ok((MessageId(row.get(0)?), opt_parsed_col(row, 1)?))
    })?
    .collect()
}

pub(crate) fn delete(conn: &Connection, id: MessageId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM messages WHERE id = ?1", params![id.0])
}
