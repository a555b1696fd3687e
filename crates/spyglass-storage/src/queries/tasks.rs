// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task rows and their per-transaction metrics.

use rusqlite::{Connection, OptionalExtension, Row, params};
use spyglass_core::network::{ResponseError, TransactionMetrics};
use spyglass_core::types::{BodyRef, Digest, Progress, TaskRecord};
use spyglass_core::{MessageId, SessionId, TaskId, TaskState};

use crate::codec::{
    date_col, format_date, json_col, opt_date_col, opt_json_col, opt_parsed_col, parsed_col,
};

pub(crate) const TASK_COLUMNS: &str = "id, session_id, message_id, task_type, state, created_at, \
     updated_at, label, url, host, method, status_code, response_content_type, original_request, \
     current_request, response, error_code, error_domain, error_description, request_body, \
     request_body_size, response_body, response_body_size, transfer, start_date, duration, \
     redirect_count, is_from_cache, is_mocked, task_description, progress_completed, \
     progress_total, pinned";

fn body_ref(row: &Row<'_>, digest_idx: usize, size: i64) -> rusqlite::Result<Option<BodyRef>> {
    let digest: Option<Digest> = opt_parsed_col(row, digest_idx)?;
    Ok(digest.map(|digest| BodyRef {
        digest,
        size: size.max(0) as u64,
    }))
}

pub(crate) fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let error_code: Option<i64> = row.get(16)?;
    let error = match error_code {
        Some(code) => Some(ResponseError {
            code,
            domain: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
            debug_description: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
        }),
        None => None,
    };
    let request_body_size: i64 = row.get(20)?;
    let response_body_size: i64 = row.get(22)?;
    let progress = match (row.get::<_, Option<i64>>(30)?, row.get::<_, Option<i64>>(31)?) {
        (Some(completed), Some(total)) => Some(Progress { completed, total }),
        _ => None,
    };

    Ok(TaskRecord {
        id: parsed_col(row, 0)?,
        session_id: parsed_col(row, 1)?,
        message_id: row.get::<_, Option<i64>>(2)?.map(MessageId),
        task_type: parsed_col(row, 3)?,
        state: parsed_col(row, 4)?,
        created_at: date_col(row, 5)?,
        updated_at: date_col(row, 6)?,
        label: row.get(7)?,
        url: row.get(8)?,
        host: row.get(9)?,
        method: row.get(10)?,
        status_code: row.get(11)?,
        response_content_type: row.get(12)?,
        original_request: json_col(row, 13)?,
        current_request: opt_json_col(row, 14)?,
        response: opt_json_col(row, 15)?,
        error,
        request_body: body_ref(row, 19, request_body_size)?,
        request_body_size,
        response_body: body_ref(row, 21, response_body_size)?,
        response_body_size,
        transfer: json_col(row, 23)?,
        start_date: opt_date_col(row, 24)?,
        duration: row.get(25)?,
        redirect_count: row.get(26)?,
        is_from_cache: row.get(27)?,
        is_mocked: row.get(28)?,
        task_description: row.get(29)?,
        progress,
        pinned: row.get(32)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn opt_to_json<T: serde::Serialize>(value: Option<&T>) -> rusqlite::Result<Option<String>> {
    value.map(to_json).transpose()
}

/// Writes the full row, replacing any previous version of the task.
pub(crate) fn upsert(conn: &Connection, task: &TaskRecord) -> rusqlite::Result<()> {
    let error = task.error.as_ref();
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO tasks ({TASK_COLUMNS}) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33)"
        ),
        params![
            task.id.to_string(),
            task.session_id.to_string(),
            task.message_id.map(|id| id.0),
            task.task_type.to_string(),
            task.state.to_string(),
            format_date(&task.created_at),
            format_date(&task.updated_at),
            task.label,
            task.url,
            task.host,
            task.method,
            task.status_code,
            task.response_content_type,
            to_json(&task.original_request)?,
            opt_to_json(task.current_request.as_ref())?,
            opt_to_json(task.response.as_ref())?,
            error.map(|e| e.code),
            error.map(|e| e.domain.as_str()),
            error.map(|e| e.debug_description.as_str()),
            task.request_body.map(|b| b.digest.to_hex()),
            task.request_body_size,
            task.response_body.map(|b| b.digest.to_hex()),
            task.response_body_size,
            to_json(&task.transfer)?,
            task.start_date.as_ref().map(format_date),
            task.duration,
            task.redirect_count,
            task.is_from_cache,
            task.is_mocked,
            task.task_description,
            task.progress.map(|p| p.completed),
            task.progress.map(|p| p.total),
            task.pinned,
        ],
    )?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, id: TaskId) -> rusqlite::Result<Option<TaskRecord>> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id.to_string()],
        task_from_row,
    )
    .optional()
}

pub(crate) fn exists(conn: &Connection, id: TaskId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )
}

pub(crate) fn for_session(conn: &Connection, session: SessionId) -> rusqlite::Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE session_id = ?1 ORDER BY created_at, id"
    ))?;
    stmt.query_map(params![session.to_string()], task_from_row)?
        .collect()
}

/// Ids of tasks still in the pending state.
pub(crate) fn pending_ids(conn: &Connection) -> rusqlite::Result<Vec<TaskId>> {
    let mut stmt = conn.prepare("SELECT id FROM tasks WHERE state = ?1")?;
    stmt.query_map(params![TaskState::Pending.to_string()], |row| parsed_col(row, 0))?
        .collect()
}

/// Replaces the task's transactions with `transactions`, in order.
pub(crate) fn replace_transactions(
    conn: &Connection,
    id: TaskId,
    transactions: &[TransactionMetrics],
) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM transactions WHERE task_id = ?1", params![id.to_string()])?;
    let mut stmt = conn.prepare(
        "INSERT INTO transactions (task_id, position, fetch_type, metrics) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, transaction) in transactions.iter().enumerate() {
        stmt.execute(params![
            id.to_string(),
            position as i64,
            transaction.fetch_type.to_string(),
            to_json(transaction)?,
        ])?;
    }
    Ok(())
}

/// The task's transactions in the order they occurred.
pub(crate) fn transactions(conn: &Connection, id: TaskId) -> rusqlite::Result<Vec<TransactionMetrics>> {
    let mut stmt =
        conn.prepare("SELECT metrics FROM transactions WHERE task_id = ?1 ORDER BY position")?;
    stmt.query_map(params![id.to_string()], |row| json_col(row, 0))?
        .collect()
}

/// Body digests referenced by the session's tasks, one entry per reference.
pub(crate) fn body_digests_for_session(
    conn: &Connection,
    session: SessionId,
) -> rusqlite::Result<Vec<Digest>> {
    let mut stmt = conn.prepare(
        "SELECT request_body FROM tasks WHERE session_id = ?1 AND request_body IS NOT NULL
         UNION ALL
         SELECT response_body FROM tasks WHERE session_id = ?1 AND response_body IS NOT NULL",
    )?;
    stmt.query_map(params![session.to_string()], |row| parsed_col(row, 0))?
        .collect()
}

/// Deletes the session's tasks together with their transactions.
pub(crate) fn delete_for_session(conn: &Connection, session: SessionId) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM transactions WHERE task_id IN (SELECT id FROM tasks WHERE session_id = ?1)",
        params![session.to_string()],
    )?;
    conn.execute("DELETE FROM tasks WHERE session_id = ?1", params![session.to_string()])
}

pub(crate) fn count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
}

/// Oldest unpinned tasks that still reference a stored body.
pub(crate) fn oldest_with_bodies(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<TaskRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE pinned = 0 AND (request_body IS NOT NULL OR response_body IS NOT NULL)
         ORDER BY created_at, id LIMIT ?1"
    ))?;
    stmt.query_map(params![limit as i64], task_from_row)?
        .collect()
}

/// Drops the task's body references, keeping the recorded sizes.
pub(crate) fn clear_bodies(conn: &Connection, id: TaskId) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE tasks SET request_body = NULL, response_body = NULL WHERE id = ?1",
        params![id.to_string()],
    )
}

/// Deletes one task and its transactions.
pub(crate) fn delete(conn: &Connection, id: TaskId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM transactions WHERE task_id = ?1", params![id.to_string()])?;
    conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
}
