// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The store handle: opening, closing, writes and maintenance.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use spyglass_config::model::StoreConfig;
use spyglass_core::types::{
    AppInfo, NewMessage, NewTask, SessionRecord, TaskCompletion, TaskUpdate,
};
use spyglass_core::{
    BodyKind, EventSink, MessageId, SessionId, SpyglassError, StoreCommand, StoreEvent, TaskId,
};
use tempfile::TempDir;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::content::{BlobGc, ContentStore};
use crate::database::Database;
use crate::error::{DbError, map_tr_err};
use crate::manifest::{BLOBS_DIR, DATABASE_FILE, Manifest, check_importable};
use crate::queries::{labels, messages, sessions, tasks};
use crate::writer::{Applied, Core, Effects, WriteQueue, transact};

/// Capacity of the change-event channel. Subscribers that fall further
/// behind than this see a reset.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How a store is opened.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Create the store if the directory holds none.
    pub create: bool,
    /// Run the retention sweep on open when one is due.
    pub sweep: bool,
    /// Reject writes and skip migrations and reconciliation.
    pub read_only: bool,
    /// Identity recorded with this run's session.
    pub app: AppInfo,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create: true,
            sweep: true,
            read_only: false,
            app: AppInfo::default(),
        }
    }
}

impl StoreOptions {
    pub fn read_only() -> Self {
        Self {
            create: false,
            sweep: false,
            read_only: true,
            app: AppInfo::default(),
        }
    }
}

pub(crate) struct Inner {
    pub core: Arc<Core>,
    queue: Option<WriteQueue>,
    pub dir: PathBuf,
    pub manifest: Mutex<Manifest>,
    _temp: Option<TempDir>,
}

/// A handle to an open log store. Cheap to clone; all clones share one
/// writer.
#[derive(Clone)]
pub struct LogStore {
    pub(crate) inner: Arc<Inner>,
}

impl LogStore {
    /// Opens the store in `dir`.
    ///
    /// Fails with [`SpyglassError::StorageUnreadable`] when the directory
    /// holds no store and `options.create` is false, or when the database
    /// cannot be opened.
    pub async fn open(
        dir: impl AsRef<Path>,
        config: &StoreConfig,
        options: StoreOptions,
    ) -> Result<Self, SpyglassError> {
        let dir = dir.as_ref();
        let db_path = dir.join(DATABASE_FILE);
        let exists = db_path.exists();
        if !exists && (!options.create || options.read_only) {
            return Err(SpyglassError::StorageUnreadable(format!(
                "no store at {}",
                dir.display()
            )));
        }
        fs::create_dir_all(dir.join(BLOBS_DIR))?;

        let manifest = match Manifest::load(dir) {
            Ok(manifest) => {
                check_importable(&manifest.version)?;
                manifest
            }
            Err(e) if options.read_only => return Err(e),
            Err(e) => {
                if exists {
                    warn!(error = %e, "store manifest missing, writing a new one");
                }
                let manifest = Manifest::new();
                manifest.save(dir)?;
                manifest
            }
        };

        let db = Database::open(&db_path, config.wal_mode, options.read_only).await?;
        let store = Self::assemble(db, dir.to_path_buf(), None, config, manifest, &options).await?;
        info!(path = %dir.display(), read_only = options.read_only, "store opened");

        if options.sweep && !options.read_only && store.sweep_due(config).await {
            if let Err(e) = store.sweep().await {
                warn!(error = %e, "retention sweep failed");
            }
        }
        Ok(store)
    }

    /// Opens a private store whose database lives in memory and whose blob
    /// files live in a temporary directory removed on drop.
    pub async fn in_memory(config: &StoreConfig) -> Result<Self, SpyglassError> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().to_path_buf();
        fs::create_dir_all(dir.join(BLOBS_DIR))?;
        let manifest = Manifest::new();
        manifest.save(&dir)?;
        let db = Database::open_in_memory().await?;
        Self::assemble(db, dir, Some(temp), config, manifest, &StoreOptions::default()).await
    }

    async fn assemble(
        db: Database,
        dir: PathBuf,
        temp: Option<TempDir>,
        config: &StoreConfig,
        manifest: Manifest,
        options: &StoreOptions,
    ) -> Result<Self, SpyglassError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let core = Arc::new(Core {
            db,
            content: ContentStore::new(dir.join(BLOBS_DIR), config.inline_limit, config.blob_compression),
            config: config.clone(),
            default_label: "network".to_string(),
            session: SessionRecord {
                id: SessionId::new(),
                started_at: Utc::now(),
                app: options.app.clone(),
            },
            events,
        });

        let queue = if options.read_only {
            None
        } else {
            let reconcile = Arc::clone(&core);
            let interrupted = core
                .db
                .connection()
                .call(move |conn| -> Result<usize, DbError> {
                    let tx = conn.transaction()?;
                    let count = reconcile.reconcile(&tx)?;
                    tx.commit()?;
                    Ok(count)
                })
                .await
                .map_err(map_tr_err)?;
            if interrupted > 0 {
                info!(count = interrupted, "marked interrupted tasks as failed");
            }
            Some(WriteQueue::spawn(Arc::clone(&core), config.write_queue_capacity))
        };

        Ok(Self {
            inner: Arc::new(Inner {
                core,
                queue,
                dir,
                manifest: Mutex::new(manifest),
                _temp: temp,
            }),
        })
    }

    /// Directory holding the store files.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.core.config
    }

    /// The session this handle attributes new records to.
    pub fn session(&self) -> &SessionRecord {
        &self.inner.core.session
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.queue.is_none()
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.inner.core
    }

    fn queue(&self) -> Result<&WriteQueue, SpyglassError> {
        self.inner
            .queue
            .as_ref()
            .ok_or_else(|| SpyglassError::InvalidArgument("store is open read-only".to_string()))
    }

    /// Receives every change applied from now on.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.core.events.subscribe()
    }

    /// Queues `command` and waits for it to be applied.
    pub async fn submit(&self, command: StoreCommand) -> Result<Applied, SpyglassError> {
        self.queue()?.submit(command).await
    }

    pub async fn append_message(&self, message: NewMessage) -> Result<MessageId, SpyglassError> {
        match self.submit(StoreCommand::AppendMessage(message)).await? {
            Applied::Message(id) => Ok(id),
            Applied::Done => Err(SpyglassError::Internal(
                "append did not yield a message id".to_string(),
            )),
        }
    }

    /// Creates the task with its linked message. Calling it again for a
    /// pending task merges the new fields instead.
    pub async fn begin_task(&self, task: NewTask) -> Result<(), SpyglassError> {
        self.submit(StoreCommand::BeginTask(task)).await.map(drop)
    }

    pub async fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<(), SpyglassError> {
        self.submit(StoreCommand::UpdateTask { id, update })
            .await
            .map(drop)
    }

    pub async fn finish_task(
        &self,
        id: TaskId,
        completion: TaskCompletion,
    ) -> Result<(), SpyglassError> {
        self.submit(StoreCommand::FinishTask { id, completion })
            .await
            .map(drop)
    }

    pub async fn attach_body(
        &self,
        id: TaskId,
        kind: BodyKind,
        bytes: Vec<u8>,
    ) -> Result<(), SpyglassError> {
        self.submit(StoreCommand::AttachBody { id, kind, bytes })
            .await
            .map(drop)
    }

    /// Waits until everything queued so far has been applied.
    pub async fn flush(&self) -> Result<(), SpyglassError> {
        match &self.inner.queue {
            Some(queue) => queue.flush().await,
            None => Ok(()),
        }
    }

    /// Drains the write queue, stops the writer and checkpoints the
    /// database. Other clones of the handle stop accepting writes.
    pub async fn close(self) -> Result<(), SpyglassError> {
        if let Some(queue) = &self.inner.queue {
            queue.shutdown().await?;
        }
        self.inner
            .core
            .db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            })
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))?;
        debug!(path = %self.inner.dir.display(), "store closed");
        Ok(())
    }

    /// Runs `f` on the database thread inside a transaction, after every
    /// queued write has been applied, then releases its effects.
    pub(crate) async fn maintain<T, F>(&self, f: F) -> Result<T, SpyglassError>
    where
        T: Send + 'static,
        F: FnOnce(&Core, &rusqlite::Connection, &mut Effects) -> Result<T, DbError> + Send + 'static,
    {
        self.queue()?;
        self.flush().await?;
        let core = Arc::clone(self.core());
        let (value, effects) = self
            .core()
            .db
            .connection()
            .call(move |conn| transact(conn, |tx, effects| f(&core, tx, effects)))
            .await
            .map_err(map_tr_err)?;
        self.core().release(effects);
        Ok(value)
    }

    /// Pins or unpins a message and the task linked to it.
    pub async fn set_pinned(&self, id: MessageId, pinned: bool) -> Result<(), SpyglassError> {
        self.maintain(move |_, conn, effects| {
            if messages::set_pinned(conn, id, pinned)? == 0 {
                return Err(SpyglassError::InvalidArgument(format!("no message {id}")).into());
            }
            if let Some(message) = messages::get(conn, id)? {
                if let Some(task_id) = message.task_id
                    && let Some(task) = tasks::get(conn, task_id)?
                {
                    effects.events.push(StoreEvent::TaskUpdated(task));
                }
                effects.events.push(StoreEvent::MessageUpdated(message));
            }
            Ok(())
        })
        .await
    }

    /// Deletes the sessions with everything recorded in them, releasing
    /// their bodies.
    pub async fn remove_sessions(&self, ids: Vec<SessionId>) -> Result<(), SpyglassError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.maintain(move |core, conn, effects| {
            remove_sessions_in(core, conn, &ids, &mut effects.gc)?;
            effects.events.push(StoreEvent::SessionsRemoved { ids });
            Ok(())
        })
        .await
    }

    /// Deletes every record and blob.
    pub async fn remove_all(&self) -> Result<(), SpyglassError> {
        self.maintain(|core, conn, effects| {
            conn.execute_batch(
                "DELETE FROM transactions;
                 DELETE FROM tasks;
                 DELETE FROM messages;
                 DELETE FROM labels;
                 DELETE FROM sessions;",
            )?;
            core.content.clear(conn, &mut effects.gc)?;
            effects.events.push(StoreEvent::StoreCleared);
            Ok(())
        })
        .await?;
        info!("store cleared");
        Ok(())
    }
}

/// Cascade delete of whole sessions. Labels are rebuilt afterwards.
pub(crate) fn remove_sessions_in(
    core: &Core,
    conn: &rusqlite::Connection,
    ids: &[SessionId],
    gc: &mut BlobGc,
) -> Result<(), DbError> {
    for id in ids {
        for digest in tasks::body_digests_for_session(conn, *id)? {
            core.content.release(conn, &digest, gc)?;
        }
        tasks::delete_for_session(conn, *id)?;
        messages::delete_for_session(conn, *id)?;
        sessions::delete(conn, *id)?;
    }
    labels::rebuild(conn)?;
    debug!(count = ids.len(), "sessions removed");
    Ok(())
}

impl EventSink for LogStore {
    fn session_id(&self) -> SessionId {
        self.inner.core.session.id
    }

    fn enqueue(&self, command: StoreCommand) -> Result<(), SpyglassError> {
        self.queue()?.try_enqueue(command)
    }

    fn body_size_limit(&self) -> usize {
        self.inner.core.config.response_body_size_limit
    }
}
