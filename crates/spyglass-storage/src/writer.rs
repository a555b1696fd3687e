// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The store's single writer.
//!
//! Every mutation goes through one bounded FIFO queue drained by one task,
//! and each command runs in its own SQLite transaction on tokio-rusqlite's
//! background thread. Commands are therefore applied exactly in enqueue
//! order, and change events are broadcast only after their transaction has
//! committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use spyglass_config::model::StoreConfig;
use spyglass_core::network::{NetworkResponse, ResponseError, TaskMetrics};
use spyglass_core::types::{
    AppInfo, Metadata, NewMessage, NewTask, Provenance, SessionRecord, TaskCompletion,
    TaskRecord, TaskUpdate,
};
use spyglass_core::{
    BodyKind, Level, MessageId, SessionId, SpyglassError, StoreCommand, StoreEvent, TaskId,
    TaskState,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::content::{BlobGc, ContentStore};
use crate::database::Database;
use crate::error::{DbError, map_tr_err};
use crate::queries::{messages, sessions, tasks};

/// Domain of the error recorded on tasks that were pending when the store
/// was last closed.
pub const INTERRUPTED_DOMAIN: &str = "Spyglass";

/// Result of an applied command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Message(MessageId),
    Done,
}

/// Side effects released once the transaction has committed.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub events: Vec<StoreEvent>,
    pub gc: BlobGc,
}

/// State shared by the writer and the read side.
pub(crate) struct Core {
    pub db: Database,
    pub content: ContentStore,
    pub config: StoreConfig,
    pub default_label: String,
    pub session: SessionRecord,
    pub events: broadcast::Sender<StoreEvent>,
}

/// Runs `f` in a transaction. When it fails the transaction rolls back and
/// blob files written during it are removed.
pub(crate) fn transact<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection, &mut Effects) -> Result<T, DbError>,
) -> Result<(T, Effects), DbError> {
    let tx = conn.transaction()?;
    let mut effects = Effects::default();
    let outcome = f(&tx, &mut effects).and_then(|value| {
        tx.commit()?;
        Ok(value)
    });
    match outcome {
        Ok(value) => Ok((value, effects)),
        Err(e) => {
            effects.gc.rollback();
            Err(e)
        }
    }
}

impl Core {
    /// Applies one command in its own transaction, then purges released
    /// blob files and broadcasts the resulting events.
    pub async fn apply(self: &Arc<Self>, command: StoreCommand) -> Result<Applied, SpyglassError> {
        let core = Arc::clone(self);
        let (applied, effects) = self
            .db
            .connection()
            .call(move |conn| transact(conn, |tx, effects| core.apply_in(tx, command, effects)))
            .await
            .map_err(map_tr_err)?;
        self.release(effects);
        Ok(applied)
    }

    pub fn release(&self, effects: Effects) {
        effects.gc.purge();
        for event in effects.events {
            // No subscribers is not an error.
            let _ = self.events.send(event);
        }
    }

    pub fn apply_in(
        &self,
        conn: &Connection,
        command: StoreCommand,
        effects: &mut Effects,
    ) -> Result<Applied, DbError> {
        match command {
            StoreCommand::AppendMessage(message) => {
                self.ensure_session(conn, message.session_id, message.created_at)?;
                let id = messages::insert(conn, &message, None)?;
                effects
                    .events
                    .push(StoreEvent::MessageCreated(load_message(conn, id)?));
                Ok(Applied::Message(id))
            }
            StoreCommand::BeginTask(task) => self.begin_task(conn, task, effects),
            StoreCommand::UpdateTask { id, update } => self.update_task(conn, id, update, effects),
            StoreCommand::FinishTask { id, completion } => {
                self.finish_task(conn, id, completion, effects)
            }
            StoreCommand::AttachBody { id, kind, bytes } => {
                self.attach_body(conn, id, kind, &bytes, effects)
            }
        }
    }

    /// Records the session on first use. Sessions other than this run's
    /// start at their first record.
    fn ensure_session(
        &self,
        conn: &Connection,
        id: SessionId,
        first_seen: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let record = if id == self.session.id {
            self.session.clone()
        } else {
            SessionRecord {
                id,
                started_at: first_seen,
                app: AppInfo::default(),
            }
        };
        if sessions::ensure(conn, &record)? {
            debug!(session = %id, "session recorded");
        }
        Ok(())
    }

    fn begin_task(
        &self,
        conn: &Connection,
        new: NewTask,
        effects: &mut Effects,
    ) -> Result<Applied, DbError> {
        if let Some(mut task) = tasks::get(conn, new.id)? {
            if task.state.is_terminal() {
                return Err(SpyglassError::TaskAlreadyFinished(new.id).into());
            }
            if new.current_request.is_some() {
                task.current_request = new.current_request;
            }
            if new.label.is_some() {
                task.label = new.label;
            }
            if new.task_description.is_some() {
                task.task_description = new.task_description;
            }
            task.updated_at = Utc::now();
            tasks::upsert(conn, &task)?;
            effects.events.push(StoreEvent::TaskUpdated(task));
            return Ok(Applied::Done);
        }

        self.ensure_session(conn, new.session_id, new.created_at)?;
        let label = new
            .label
            .clone()
            .unwrap_or_else(|| self.default_label.clone());
        let request = &new.original_request;
        let mut metadata = Metadata::new();
        metadata.insert("taskId", new.id.to_string());
        metadata.insert("taskType", new.task_type.to_string());
        if let Some(method) = &request.method {
            metadata.insert("method", method.clone());
        }
        let message = NewMessage {
            session_id: new.session_id,
            created_at: new.created_at,
            level: Level::Debug,
            label: label.clone(),
            text: request.url.clone().unwrap_or_default(),
            metadata,
            provenance: Provenance::default(),
        };
        let message_id = messages::insert(conn, &message, Some(new.id))?;

        let task = TaskRecord {
            id: new.id,
            session_id: new.session_id,
            message_id: Some(message_id),
            task_type: new.task_type,
            state: TaskState::Pending,
            created_at: new.created_at,
            updated_at: new.created_at,
            label: Some(label),
            url: request.url.clone(),
            host: request.host(),
            method: request.method.clone(),
            status_code: None,
            response_content_type: None,
            original_request: new.original_request,
            current_request: new.current_request,
            response: None,
            error: None,
            request_body: None,
            response_body: None,
            request_body_size: 0,
            response_body_size: 0,
            transfer: Default::default(),
            start_date: None,
            duration: None,
            redirect_count: 0,
            is_from_cache: false,
            is_mocked: false,
            task_description: new.task_description,
            progress: None,
            pinned: false,
        };
        tasks::upsert(conn, &task)?;
        effects
            .events
            .push(StoreEvent::MessageCreated(load_message(conn, message_id)?));
        effects.events.push(StoreEvent::TaskCreated(task));
        Ok(Applied::Message(message_id))
    }

    fn update_task(
        &self,
        conn: &Connection,
        id: TaskId,
        update: TaskUpdate,
        effects: &mut Effects,
    ) -> Result<Applied, DbError> {
        let mut task = pending_task(conn, id)?;
        if update.is_empty() {
            return Ok(Applied::Done);
        }
        let progress_only = update.current_request.is_none()
            && update.response.is_none()
            && update.metrics.is_none()
            && update.task_description.is_none();

        if update.current_request.is_some() {
            task.current_request = update.current_request;
        }
        if let Some(response) = update.response {
            set_response(&mut task, response);
        }
        if let Some(metrics) = &update.metrics {
            set_metrics(conn, &mut task, metrics)?;
        }
        if update.progress.is_some() {
            task.progress = update.progress;
        }
        if update.task_description.is_some() {
            task.task_description = update.task_description;
        }
        task.updated_at = Utc::now();
        tasks::upsert(conn, &task)?;

        let event = match (progress_only, task.progress) {
            (true, Some(progress)) => StoreEvent::TaskProgressUpdated {
                task_id: id,
                progress,
            },
            _ => StoreEvent::TaskUpdated(task),
        };
        effects.events.push(event);
        Ok(Applied::Done)
    }

    pub fn finish_task(
        &self,
        conn: &Connection,
        id: TaskId,
        completion: TaskCompletion,
        effects: &mut Effects,
    ) -> Result<Applied, DbError> {
        if completion.state == TaskState::Pending {
            return Err(SpyglassError::InvalidArgument(format!(
                "task {id} cannot finish in the pending state"
            ))
            .into());
        }
        let mut task = pending_task(conn, id)?;
        task.state = completion.state;
        task.error = completion.error;
        if let Some(response) = completion.response {
            set_response(&mut task, response);
        }
        if completion.current_request.is_some() {
            task.current_request = completion.current_request;
        }
        if let Some(metrics) = &completion.metrics {
            set_metrics(conn, &mut task, metrics)?;
        }
        task.progress = None;
        if task.response_body.is_none() && task.response_body_size == 0 {
            task.response_body_size = task.transfer.response_body_bytes_after_decoding;
        }
        if task.request_body.is_none() && task.request_body_size == 0 {
            task.request_body_size = task.transfer.request_body_bytes_before_encoding;
        }
        task.updated_at = Utc::now();
        tasks::upsert(conn, &task)?;

        let promoted = match (task.state, task.message_id) {
            (TaskState::Failure, Some(message_id)) => {
                if messages::set_level(conn, message_id, Level::Error)? > 0 {
                    Some(load_message(conn, message_id)?)
                } else {
                    None
                }
            }
            _ => None,
        };
        effects.events.push(StoreEvent::TaskCompleted(task));
        if let Some(message) = promoted {
            effects.events.push(StoreEvent::MessageUpdated(message));
        }
        Ok(Applied::Done)
    }

    fn attach_body(
        &self,
        conn: &Connection,
        id: TaskId,
        kind: BodyKind,
        bytes: &[u8],
        effects: &mut Effects,
    ) -> Result<Applied, DbError> {
        let mut task = pending_task(conn, id)?;
        let body = if bytes.len() > self.config.response_body_size_limit {
            debug!(task = %id, %kind, size = bytes.len(), "body over size limit, recording size only");
            None
        } else {
            self.content.put(conn, bytes, &mut effects.gc)?
        };
        let size = bytes.len() as i64;
        let previous = match kind {
            BodyKind::Request => {
                task.request_body_size = size;
                std::mem::replace(&mut task.request_body, body)
            }
            BodyKind::Response => {
                task.response_body_size = size;
                std::mem::replace(&mut task.response_body, body)
            }
        };
        if let Some(previous) = previous {
            self.content.release(conn, &previous.digest, &mut effects.gc)?;
        }
        task.updated_at = Utc::now();
        tasks::upsert(conn, &task)?;
        effects.events.push(StoreEvent::TaskUpdated(task));
        Ok(Applied::Done)
    }

    /// Marks every task left pending by a previous run as failed.
    pub fn reconcile(&self, conn: &Connection) -> Result<usize, DbError> {
        let pending = tasks::pending_ids(conn)?;
        let mut effects = Effects::default();
        for id in &pending {
            let error = ResponseError::new(
                -1,
                INTERRUPTED_DOMAIN,
                "Task was interrupted before completion",
            );
            self.finish_task(conn, *id, TaskCompletion::failure(error), &mut effects)?;
        }
        Ok(pending.len())
    }
}

fn load_message(
    conn: &Connection,
    id: MessageId,
) -> Result<spyglass_core::types::MessageRecord, DbError> {
    messages::get(conn, id)?
        .ok_or_else(|| SpyglassError::Internal(format!("message {id} vanished")).into())
}

fn pending_task(conn: &Connection, id: TaskId) -> Result<TaskRecord, DbError> {
    let task = tasks::get(conn, id)?.ok_or(SpyglassError::UnknownTask(id))?;
    if task.state.is_terminal() {
        return Err(SpyglassError::TaskAlreadyFinished(id).into());
    }
    Ok(task)
}

fn set_response(task: &mut TaskRecord, response: NetworkResponse) {
    task.status_code = response.status_code;
    task.response_content_type = response.content_type().map(|c| c.media_type);
    task.response = Some(response);
}

fn set_metrics(conn: &Connection, task: &mut TaskRecord, metrics: &TaskMetrics) -> Result<(), DbError> {
    task.transfer = metrics.total_transfer_size();
    task.start_date = Some(metrics.task_interval.start);
    task.duration = Some(metrics.task_interval.duration);
    task.redirect_count = metrics.redirect_count;
    task.is_from_cache = metrics.is_from_cache();
    tasks::replace_transactions(conn, task.id, &metrics.transactions)?;
    Ok(())
}

type Reply = oneshot::Sender<Result<Applied, SpyglassError>>;

pub(crate) enum Command {
    Apply {
        command: StoreCommand,
        reply: Option<Reply>,
    },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

fn closed() -> SpyglassError {
    SpyglassError::Internal("store is closed".to_string())
}

/// Sending half of the write queue.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    tx: mpsc::Sender<Command>,
}

impl WriteQueue {
    /// Starts the writer task on the current runtime.
    pub fn spawn(core: Arc<Core>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run(core, rx));
        Self { tx }
    }

    /// Queues a command without waiting. Fails when the queue is full or
    /// the writer has stopped.
    pub fn try_enqueue(&self, command: StoreCommand) -> Result<(), SpyglassError> {
        self.tx
            .try_send(Command::Apply {
                command,
                reply: None,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("write queue is full, dropping command");
                    SpyglassError::Internal("write queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => closed(),
            })
    }

    /// Queues a command and waits until it has been applied.
    pub async fn submit(&self, command: StoreCommand) -> Result<Applied, SpyglassError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Apply {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())?
    }

    /// Waits until every command queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), SpyglassError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Drains the queue and stops the writer.
    pub async fn shutdown(&self) -> Result<(), SpyglassError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done))
            .await
            .map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }
}

async fn run(core: Arc<Core>, mut rx: mpsc::Receiver<Command>) {
    let mut stopped = None;
    while let Some(command) = rx.recv().await {
        match command {
            Command::Apply { command, reply } => {
                let task_id = command.task_id();
                let result = core.apply(command).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, task = ?task_id, "store command failed");
                        }
                    }
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown(done) => {
                // Commands already queued are still applied.
                rx.close();
                stopped = Some(done);
            }
        }
    }
    debug!("store writer stopped");
    if let Some(done) = stopped {
        let _ = done.send(());
    }
}
