// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Archive export and import.
//!
//! An archive holds `logs.sqlite` (a consistent copy of the database,
//! optionally narrowed to some sessions), one `blobs/<digest>` entry per
//! blob that lives outside the database, `info.json` and `manifest.json`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::backup::Backup;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::Serialize;
use spyglass_archive::{AccessMode, Archive, CompressionMethod};
use spyglass_core::types::{Digest, MessageId};
use spyglass_core::{SessionId, SpyglassError, StoreEvent};
use tracing::{debug, info, warn};

use crate::content::{BlobGc, ContentStore, decode_payload};
use crate::error::{DbError, map_tr_err};
use crate::manifest::{
    BLOBS_DIR, DATABASE_FILE, INFO_FILE, MANIFEST_FILE, Manifest, SCHEMA_VERSION, StoreInfo,
    check_importable,
};
use crate::queries::{labels, messages, sessions, tasks};
use crate::store::LogStore;

/// Pages copied per backup step.
const BACKUP_PAGES_PER_STEP: std::ffi::c_int = 256;

/// What to export.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Only these sessions; all when `None`.
    pub sessions: Option<Vec<SessionId>>,
}

/// What an import copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub sessions: usize,
    /// Sessions already present in the store.
    pub skipped_sessions: usize,
    pub messages: usize,
    pub tasks: usize,
    /// Bodies whose blob was missing or failed verification.
    pub unreadable_bodies: usize,
}

struct Snapshot {
    info: StoreInfo,
    file_blobs: Vec<Digest>,
}

impl LogStore {
    /// Writes the store, or a subset of its sessions, to a new archive at
    /// `dest`. Fails with [`SpyglassError::UnwritableArchive`] when `dest`
    /// already exists.
    pub async fn export(
        &self,
        dest: impl AsRef<Path>,
        options: ExportOptions,
    ) -> Result<StoreInfo, SpyglassError> {
        let dest = dest.as_ref().to_path_buf();
        if dest.exists() {
            return Err(SpyglassError::UnwritableArchive(format!(
                "destination {} already exists",
                dest.display()
            )));
        }
        self.flush().await?;

        let staging = tempfile::tempdir()?;
        let copy_path = staging.path().join(DATABASE_FILE);
        let mut manifest = self.inner.manifest.lock().await.clone();
        manifest.version = SCHEMA_VERSION.to_string();
        let base_info = self.info().await?;

        let target = copy_path.clone();
        let snapshot = self
            .core()
            .db
            .connection()
            .call(move |conn| -> Result<Snapshot, DbError> {
                let mut dst = Connection::open(&target)?;
                Backup::new(conn, &mut dst)?.run_to_completion(
                    BACKUP_PAGES_PER_STEP,
                    Duration::from_millis(0),
                    None,
                )?;
                narrow(&dst, options.sessions.as_deref())?;
                let info = summarize(&dst, base_info)?;
                let file_blobs = file_blobs(&dst)?;
                dst.execute_batch("VACUUM")?;
                Ok(Snapshot { info, file_blobs })
            })
            .await
            .map_err(map_tr_err)?;

        let blobs_dir = self.core().content.blobs_dir().to_path_buf();
        let info = snapshot.info.clone();
        tokio::task::spawn_blocking(move || {
            write_archive(&dest, &copy_path, &blobs_dir, &snapshot, &manifest)
        })
        .await
        .map_err(|e| SpyglassError::Internal(format!("export task failed: {e}")))??;
        drop(staging);

        info!(
            messages = info.message_count,
            tasks = info.task_count,
            blobs = info.blob_count,
            "store exported"
        );
        Ok(info)
    }

    /// Copies every session of the archive at `source` that the store does
    /// not already hold.
    pub async fn import(&self, source: impl AsRef<Path>) -> Result<ImportReport, SpyglassError> {
        let source = source.as_ref().to_path_buf();
        let staging = tempfile::tempdir()?;
        let copy_path = staging.path().join(DATABASE_FILE);

        let extract_to = copy_path.clone();
        let archive = tokio::task::spawn_blocking(move || -> Result<Archive, SpyglassError> {
            let archive = Archive::open(&source, AccessMode::Read)?;
            let info = archive.read_path(INFO_FILE)?.ok_or_else(|| {
                SpyglassError::StorageUnreadable(format!("{} has no {INFO_FILE}", source.display()))
            })?;
            let info: StoreInfo = serde_json::from_slice(&info).map_err(|e| {
                SpyglassError::StorageUnreadable(format!("{INFO_FILE}: {e}"))
            })?;
            check_importable(&info.version)?;

            let entry = archive.get(DATABASE_FILE).cloned().ok_or_else(|| {
                SpyglassError::StorageUnreadable(format!(
                    "{} has no {DATABASE_FILE}",
                    source.display()
                ))
            })?;
            let mut out = BufWriter::new(File::create(&extract_to)?);
            archive.extract(&entry, &mut out, spyglass_archive::DEFAULT_BUFFER_SIZE)?;
            out.flush()?;
            Ok(archive)
        })
        .await
        .map_err(|e| SpyglassError::Internal(format!("import task failed: {e}")))??;

        let (report, imported) = self
            .maintain(move |core, conn, effects| {
                let src = Connection::open_with_flags(&copy_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
                let (report, imported) =
                    copy_sessions(&core.content, &src, conn, &archive, &mut effects.gc)?;
                if !imported.is_empty() {
                    labels::rebuild(conn)?;
                    effects.events.push(StoreEvent::Imported {
                        ids: imported.clone(),
                    });
                }
                Ok((report, imported))
            })
            .await?;
        drop(staging);

        info!(
            sessions = imported.len(),
            skipped = report.skipped_sessions,
            messages = report.messages,
            tasks = report.tasks,
            "archive imported"
        );
        Ok(report)
    }
}

/// Deletes everything outside `keep` from the copy, then drops blobs no
/// remaining task references and recounts the rest.
fn narrow(conn: &Connection, keep: Option<&[SessionId]>) -> rusqlite::Result<()> {
    if let Some(keep) = keep {
        let all = sessions::list(conn)?;
        for session in all.iter().filter(|s| !keep.contains(&s.id)) {
            tasks::delete_for_session(conn, session.id)?;
            messages::delete_for_session(conn, session.id)?;
            sessions::delete(conn, session.id)?;
        }
        labels::rebuild(conn)?;
    }
    conn.execute_batch(
        "DELETE FROM blobs WHERE digest NOT IN (
             SELECT request_body FROM tasks WHERE request_body IS NOT NULL
             UNION SELECT response_body FROM tasks WHERE response_body IS NOT NULL);
         UPDATE blobs SET link_count =
             (SELECT COUNT(*) FROM tasks WHERE request_body = blobs.digest)
             + (SELECT COUNT(*) FROM tasks WHERE response_body = blobs.digest);",
    )
}

fn summarize(conn: &Connection, base: StoreInfo) -> rusqlite::Result<StoreInfo> {
    let blobs = ContentStore::totals(conn)?;
    let sessions = sessions::list(conn)?.len() as u64;
    Ok(StoreInfo {
        version: SCHEMA_VERSION.to_string(),
        modified_date: Utc::now(),
        message_count: messages::count(conn)?.max(0) as u64,
        task_count: tasks::count(conn)?.max(0) as u64,
        blob_count: blobs.count,
        session_count: sessions,
        blobs_size: blobs.size,
        blobs_decompressed_size: blobs.decompressed_size,
        ..base
    })
}

fn file_blobs(conn: &Connection) -> rusqlite::Result<Vec<Digest>> {
    let mut stmt = conn.prepare("SELECT digest FROM blobs WHERE inline_data IS NULL")?;
    stmt.query_map([], |row| crate::codec::parsed_col(row, 0))?
        .collect()
}

fn write_archive(
    dest: &Path,
    database: &Path,
    blobs_dir: &Path,
    snapshot: &Snapshot,
    manifest: &Manifest,
) -> Result<(), SpyglassError> {
    let mut archive = Archive::create(dest)?;
    archive.add_entry(
        DATABASE_FILE,
        File::open(database)?,
        CompressionMethod::Deflate,
        spyglass_archive::DEFAULT_BUFFER_SIZE,
    )?;
    for digest in &snapshot.file_blobs {
        let path = blobs_dir.join(digest.to_hex());
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                warn!(digest = %digest, error = %e, "blob file missing, not exported");
                continue;
            }
        };
        // Payloads are already compressed by the content store.
        archive.add_entry(
            &format!("{BLOBS_DIR}/{}", digest.to_hex()),
            file,
            CompressionMethod::Stored,
            spyglass_archive::DEFAULT_BUFFER_SIZE,
        )?;
    }
    archive.add_bytes(
        INFO_FILE,
        &serde_json::to_vec_pretty(&snapshot.info)?,
        CompressionMethod::Deflate,
    )?;
    archive.add_bytes(
        MANIFEST_FILE,
        &serde_json::to_vec_pretty(manifest)?,
        CompressionMethod::Deflate,
    )?;
    archive.close()?;
    debug!(path = %dest.display(), "archive written");
    Ok(())
}

/// Reads a body's original bytes from the source database or the archive.
fn source_payload(
    src: &Connection,
    archive: &Archive,
    digest: &Digest,
) -> Result<Option<Vec<u8>>, SpyglassError> {
    let row = src
        .query_row(
            "SELECT decompressed_size, inline_data, is_uncompressed FROM blobs WHERE digest = ?1",
            params![digest.to_hex()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<Vec<u8>>>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )
        .optional()
        .map_err(SpyglassError::storage)?;
    let Some((decompressed_size, inline, is_uncompressed)) = row else {
        return Ok(None);
    };
    let payload = match inline {
        Some(payload) => payload,
        None => match archive.read_path(&format!("{BLOBS_DIR}/{}", digest.to_hex()))? {
            Some(payload) => payload,
            None => return Ok(None),
        },
    };
    decode_payload(digest, payload, is_uncompressed, decompressed_size.max(0) as u64).map(Some)
}

fn copy_sessions(
    content: &ContentStore,
    src: &Connection,
    dst: &Connection,
    archive: &Archive,
    gc: &mut BlobGc,
) -> Result<(ImportReport, Vec<SessionId>), DbError> {
    let mut report = ImportReport::default();
    let mut imported = Vec::new();

    for session in sessions::list(src)? {
        if !sessions::ensure(dst, &session)? {
            report.skipped_sessions += 1;
            continue;
        }
        let mut message_ids: HashMap<MessageId, MessageId> = HashMap::new();
        for message in messages::for_session(src, session.id)? {
            let new_id = messages::insert_record(dst, &message)?;
            message_ids.insert(message.id, new_id);
            report.messages += 1;
        }

        for mut task in tasks::for_session(src, session.id)? {
            if tasks::exists(dst, task.id)? {
                continue;
            }
            task.message_id = task.message_id.and_then(|id| message_ids.get(&id).copied());
            for body in [&mut task.request_body, &mut task.response_body] {
                let Some(reference) = *body else { continue };
                let payload = match source_payload(src, archive, &reference.digest) {
                    Ok(payload) => payload,
                    Err(e) if e.is_per_item() => {
                        warn!(task = %task.id, error = %e, "body not imported");
                        None
                    }
                    Err(e) => return Err(e.into()),
                };
                *body = match payload {
                    Some(bytes) => content.put(dst, &bytes, gc)?,
                    None => {
                        report.unreadable_bodies += 1;
                        None
                    }
                };
            }
            tasks::upsert(dst, &task)?;
            tasks::replace_transactions(dst, task.id, &tasks::transactions(src, task.id)?)?;
            report.tasks += 1;
        }
        imported.push(session.id);
        report.sessions += 1;
    }
    Ok((report, imported))
}

