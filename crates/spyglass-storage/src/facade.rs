// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read side: filtered, ordered, paginated queries and live subscriptions.
//!
//! Queries run on the database's read connection, so on file stores they
//! see the last committed state without waiting behind queued writes.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use spyglass_core::network::TransactionMetrics;
use spyglass_core::types::{LabelCount, MessageRecord, Progress, SessionRecord, TaskRecord};
use spyglass_core::{BodyKind, MessageId, SpyglassError, StoreEvent, TaskId};
use tokio::sync::broadcast;
use tracing::warn;

use crate::content::ContentStore;
use crate::error::{DbError, map_tr_err};
use crate::manifest::StoreInfo;
use crate::predicate::{Entity, Field, Predicate};
use crate::queries::{labels, messages, sessions, tasks};
use crate::store::LogStore;

/// A filtered, ordered page of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Query<E: Entity> {
    pub filter: Predicate<E::Field>,
    order: Vec<(E::Field, bool)>,
    limit: Option<usize>,
    offset: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self {
            filter: Predicate::True,
            order: Vec::new(),
            limit: None,
            offset: 0,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Query<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate<E::Field>) -> Self {
        self.filter = self.filter.and(predicate);
        self
    }

    /// Adds a sort key. Without one, records come oldest first.
    pub fn order_by(mut self, field: E::Field, descending: bool) -> Self {
        self.order.push((field, descending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Page `index` (zero-based) of `size` records.
    pub fn page(self, index: usize, size: usize) -> Self {
        self.offset(index * size).limit(size)
    }

    fn to_sql(&self) -> (String, Vec<rusqlite::types::Value>) {
        let mut sql = format!("SELECT {} FROM {} WHERE ", E::COLUMNS, E::TABLE);
        let mut params = Vec::new();
        self.filter.write_sql(&mut sql, &mut params);

        let mut keys: Vec<String> = self
            .order
            .iter()
            .map(|(field, desc)| {
                format!("{} {}", field.column(), if *desc { "DESC" } else { "ASC" })
            })
            .collect();
        if keys.is_empty() {
            keys.push("created_at ASC".to_string());
        }
        keys.push(format!("{} ASC", E::TIEBREAK));
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));

        // SQLite needs a LIMIT before an OFFSET; -1 means unlimited.
        let limit = self.limit.map_or(-1, |l| l as i64);
        sql.push_str(&format!(" LIMIT {limit} OFFSET {}", self.offset));
        (sql, params)
    }
}

/// Payload of a task body as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyState {
    /// Nothing was captured (no body, or only its size was recorded).
    Absent,
    Available(Vec<u8>),
    /// A body was captured but its blob is missing or corrupted.
    Unreadable,
}

/// A change to the result set of a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<E> {
    Inserted(E),
    Updated(E),
    /// The record changed and no longer matches the filter.
    Removed(E),
    Progress { task_id: TaskId, progress: Progress },
    /// The result set must be fetched again.
    Reset,
}

/// Entities that can be followed through store change events.
pub trait Observable: Entity {
    /// The record an event carries, and whether it was just created.
    fn from_event(event: &StoreEvent) -> Option<(&Self, bool)>;

    /// Progress carried by a lightweight event for this entity, if any.
    fn progress(_event: &StoreEvent) -> Option<(TaskId, Progress)> {
        None
    }
}

impl Observable for MessageRecord {
    fn from_event(event: &StoreEvent) -> Option<(&Self, bool)> {
        match event {
            StoreEvent::MessageCreated(m) => Some((m, true)),
            StoreEvent::MessageUpdated(m) => Some((m, false)),
            _ => None,
        }
    }
}

impl Observable for TaskRecord {
    fn from_event(event: &StoreEvent) -> Option<(&Self, bool)> {
        match event {
            StoreEvent::TaskCreated(t) => Some((t, true)),
            StoreEvent::TaskUpdated(t) | StoreEvent::TaskCompleted(t) => Some((t, false)),
            _ => None,
        }
    }

    fn progress(event: &StoreEvent) -> Option<(TaskId, Progress)> {
        match event {
            StoreEvent::TaskProgressUpdated { task_id, progress } => Some((*task_id, *progress)),
            _ => None,
        }
    }
}

/// Live changes matching a predicate.
pub struct Subscription<E: Observable> {
    filter: Predicate<E::Field>,
    rx: broadcast::Receiver<StoreEvent>,
}

impl<E: Observable> Subscription<E> {
    /// The next change, or `None` once the store has shut down.
    pub async fn next(&mut self) -> Option<Change<E>> {
        loop {
            let event = match self.rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged behind store changes");
                    return Some(Change::Reset);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };
            if let Some(change) = self.map(&event) {
                return Some(change);
            }
        }
    }

    fn map(&self, event: &StoreEvent) -> Option<Change<E>> {
        if matches!(
            event,
            StoreEvent::SessionsRemoved { .. }
                | StoreEvent::Trimmed
                | StoreEvent::Imported { .. }
                | StoreEvent::StoreCleared
        ) {
            return Some(Change::Reset);
        }
        if let Some((task_id, progress)) = E::progress(event) {
            return Some(Change::Progress { task_id, progress });
        }
        let (record, created) = E::from_event(event)?;
        let matched = self.filter.evaluate(record);
        match (created, matched) {
            (true, true) => Some(Change::Inserted(record.clone())),
            (true, false) => None,
            (false, true) => Some(Change::Updated(record.clone())),
            (false, false) => Some(Change::Removed(record.clone())),
        }
    }
}

impl LogStore {
    /// Records matching `query`.
    pub async fn fetch<E: Entity>(&self, query: Query<E>) -> Result<Vec<E>, SpyglassError> {
        query.filter.validate()?;
        let (sql, params) = query.to_sql();
        self.core()
            .db
            .reader()
            .call(move |conn| -> Result<Vec<E>, rusqlite::Error> {
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params_from_iter(params), E::from_row)?
                    .collect()
            })
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    /// Number of records matching `filter`.
    pub async fn count<E: Entity>(&self, filter: Predicate<E::Field>) -> Result<u64, SpyglassError> {
        filter.validate()?;
        let mut sql = format!("SELECT COUNT(*) FROM {} WHERE ", E::TABLE);
        let mut params = Vec::new();
        filter.write_sql(&mut sql, &mut params);
        self.core()
            .db
            .reader()
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(&sql, params_from_iter(params), |row| row.get(0))
            })
            .await
            .map(|n| n.max(0) as u64)
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    /// Follows changes to records matching `filter`.
    pub fn subscribe<E: Observable>(
        &self,
        filter: Predicate<E::Field>,
    ) -> Result<Subscription<E>, SpyglassError> {
        filter.validate()?;
        Ok(Subscription {
            filter,
            rx: self.events(),
        })
    }

    pub async fn message(&self, id: MessageId) -> Result<Option<MessageRecord>, SpyglassError> {
        self.core()
            .db
            .reader()
            .call(move |conn| messages::get(conn, id))
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    pub async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>, SpyglassError> {
        self.core()
            .db
            .reader()
            .call(move |conn| tasks::get(conn, id))
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    /// A task's HTTP exchanges, redirect hops included, in order.
    pub async fn transactions(&self, id: TaskId) -> Result<Vec<TransactionMetrics>, SpyglassError> {
        self.core()
            .db
            .reader()
            .call(move |conn| tasks::transactions(conn, id))
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    /// Distinct message labels with their counts.
    pub async fn labels(&self) -> Result<Vec<LabelCount>, SpyglassError> {
        self.core()
            .db
            .reader()
            .call(|conn| labels::list(conn))
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    pub async fn sessions(&self) -> Result<Vec<SessionRecord>, SpyglassError> {
        self.core()
            .db
            .reader()
            .call(|conn| sessions::list(conn))
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }

    /// The request or response body of a task.
    ///
    /// Fails with [`SpyglassError::UnknownTask`] for an unknown id. A
    /// corrupted blob is reported as [`BodyState::Unreadable`] rather than
    /// as an error.
    pub async fn body(&self, id: TaskId, kind: BodyKind) -> Result<BodyState, SpyglassError> {
        let content = self.core().content.clone();
        let result = self
            .core()
            .db
            .reader()
            .call(move |conn| -> Result<BodyState, DbError> {
                let task = tasks::get(conn, id)?.ok_or(SpyglassError::UnknownTask(id))?;
                let body = match kind {
                    BodyKind::Request => task.request_body,
                    BodyKind::Response => task.response_body,
                };
                let Some(body) = body else {
                    return Ok(BodyState::Absent);
                };
                match content.get(conn, &body.digest) {
                    Ok(Some(bytes)) => Ok(BodyState::Available(bytes)),
                    Ok(None) => {
                        warn!(task = %id, digest = %body.digest, "body blob missing");
                        Ok(BodyState::Unreadable)
                    }
                    Err(DbError::Domain(SpyglassError::CorruptedBlob { .. })) => {
                        Ok(BodyState::Unreadable)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;
        result.map_err(map_tr_err)
    }

    /// Counts and sizes describing the store.
    pub async fn info(&self) -> Result<StoreInfo, SpyglassError> {
        let manifest = self.inner.manifest.lock().await.clone();
        let db_size = self.core().db.size_bytes().await?;
        let (message_count, task_count, session_count, blobs, last_message) = self
            .core()
            .db
            .reader()
            .call(|conn| -> Result<_, rusqlite::Error> {
                let last: Option<String> =
                    conn.query_row("SELECT MAX(created_at) FROM messages", [], |row| row.get(0))?;
                Ok((
                    messages::count(conn)?,
                    tasks::count(conn)?,
                    sessions::list(conn)?.len(),
                    ContentStore::totals(conn)?,
                    last,
                ))
            })
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))?;
        let blob_files = blob_files_size(self.core().content.blobs_dir())?;
        let modified_date = last_message
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(manifest.created_at);

        Ok(StoreInfo {
            store_id: manifest.store_id,
            version: manifest.version,
            creation_date: manifest.created_at,
            modified_date,
            message_count: message_count.max(0) as u64,
            task_count: task_count.max(0) as u64,
            blob_count: blobs.count,
            session_count: session_count as u64,
            total_store_size: db_size + blob_files,
            blobs_size: blobs.size,
            blobs_decompressed_size: blobs.decompressed_size,
            app: Some(self.session().app.clone()),
        })
    }
}

fn blob_files_size(dir: &std::path::Path) -> Result<u64, SpyglassError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut total = 0;
    for entry in entries {
        total += entry?.metadata()?.len();
    }
    Ok(total)
}
