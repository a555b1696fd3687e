// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retention sweep: age-based session removal, then size-based trimming of
//! messages and blobs.

use chrono::{Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use spyglass_config::model::StoreConfig;
use spyglass_core::{SpyglassError, StoreEvent};
use tracing::{debug, info};

use crate::codec::format_date;
use crate::content::{BlobGc, ContentStore};
use crate::error::DbError;
use crate::queries::{labels, messages, sessions, tasks};
use crate::store::{LogStore, remove_sessions_in};
use crate::writer::Core;

/// Size trimming never leaves fewer messages than this.
const MIN_MESSAGES_TO_TRIM: i64 = 10;

/// Tasks examined per step while trimming blobs.
const BLOB_TRIM_BATCH: usize = 64;

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed_sessions: usize,
    pub removed_messages: usize,
    pub released_bodies: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self == &SweepReport::default()
    }
}

impl LogStore {
    /// Applies the retention policy from the store configuration.
    pub async fn sweep(&self) -> Result<SweepReport, SpyglassError> {
        let current = self.session().id;
        let report = self
            .maintain(move |core, conn, effects| {
                let mut report = SweepReport::default();

                let cutoff = Utc::now() - Duration::seconds(core.config.max_age_secs as i64);
                let expired: Vec<_> = sessions::started_before(conn, &format_date(&cutoff))?
                    .into_iter()
                    .filter(|id| *id != current)
                    .collect();
                if !expired.is_empty() {
                    remove_sessions_in(core, conn, &expired, &mut effects.gc)?;
                    report.removed_sessions = expired.len();
                    effects
                        .events
                        .push(StoreEvent::SessionsRemoved { ids: expired });
                }

                report.removed_messages = trim_messages(core, conn, &mut effects.gc)?;
                report.released_bodies = trim_blobs(&core.content, &core.config, conn, &mut effects.gc)?;
                if report.removed_messages > 0 || report.released_bodies > 0 {
                    effects.events.push(StoreEvent::Trimmed);
                }
                Ok(report)
            })
            .await?;

        let mut manifest = self.inner.manifest.lock().await;
        manifest.last_sweep_date = Some(Utc::now());
        manifest.save(self.dir())?;

        if report.is_empty() {
            debug!("sweep found nothing to remove");
        } else {
            info!(
                sessions = report.removed_sessions,
                messages = report.removed_messages,
                bodies = report.released_bodies,
                "sweep complete"
            );
        }
        Ok(report)
    }

    pub(crate) async fn sweep_due(&self, config: &StoreConfig) -> bool {
        let manifest = self.inner.manifest.lock().await;
        match manifest.last_sweep_date {
            None => true,
            Some(last) => {
                Utc::now() - last >= Duration::seconds(config.sweep_interval_secs as i64)
            }
        }
    }
}

/// Database bytes in use, excluding free pages.
fn used_bytes(conn: &Connection) -> rusqlite::Result<u64> {
    let used: i64 = conn.query_row(
        "SELECT (page_count - freelist_count) * page_size
         FROM pragma_page_count(), pragma_freelist_count(), pragma_page_size()",
        [],
        |row| row.get(0),
    )?;
    Ok(used.max(0) as u64)
}

/// Removes the oldest messages, with their tasks, when the database is over
/// its size limit. Keeps the newest `trim_ratio` share.
fn trim_messages(core: &Core, conn: &Connection, gc: &mut BlobGc) -> Result<usize, DbError> {
    if used_bytes(conn)? <= core.config.size_limit {
        return Ok(0);
    }
    let count = messages::count(conn)?;
    if count <= MIN_MESSAGES_TO_TRIM {
        return Ok(0);
    }
    let keep = (count as f64 * core.config.trim_ratio).ceil() as i64;
    let remove = (count - keep).max(0) as usize;
    let victims = messages::oldest_unpinned(conn, remove)?;
    for (id, task_id) in &victims {
        if let Some(task_id) = task_id
            && let Some(task) = tasks::get(conn, *task_id)?
        {
            for body in [task.request_body, task.response_body].into_iter().flatten() {
                core.content.release(conn, &body.digest, gc)?;
            }
            tasks::delete(conn, *task_id)?;
        }
        messages::delete(conn, *id)?;
    }
    labels::rebuild(conn)?;
    Ok(victims.len())
}

/// Releases bodies of the oldest tasks while blobs exceed their budget,
/// until they fit in `trim_ratio` of it.
fn trim_blobs(
    content: &ContentStore,
    config: &StoreConfig,
    conn: &Connection,
    gc: &mut BlobGc,
) -> Result<usize, DbError> {
    let limit = config.blob_size_limit();
    if ContentStore::totals(conn)?.size <= limit {
        return Ok(0);
    }
    let target = (limit as f64 * config.trim_ratio) as u64;
    let mut released = 0;
    loop {
        let batch = tasks::oldest_with_bodies(conn, BLOB_TRIM_BATCH)?;
        if batch.is_empty() {
            break;
        }
        for task in batch {
            for body in [task.request_body, task.response_body].into_iter().flatten() {
                content.release(conn, &body.digest, gc)?;
                released += 1;
            }
            tasks::clear_bodies(conn, task.id)?;
            if ContentStore::totals(conn)?.size <= target {
                return Ok(released);
            }
        }
    }
    Ok(released)
}
