// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through one tokio-rusqlite connection. File
//! stores in WAL mode also get a read-only connection for queries, so reads
//! never queue behind writes. Do NOT create additional Connection instances
//! for writes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OpenFlags;
use spyglass_core::SpyglassError;
use tracing::debug;

use crate::error::{DbError, map_sqlite_err, map_tr_err};
use crate::migrations::run_migrations;
use crate::predicate::register_functions;

/// Handle to the store database.
pub struct Database {
    conn: tokio_rusqlite::Connection,
    reader: Option<tokio_rusqlite::Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database file, apply PRAGMAs and run
    /// migrations. Read-only handles skip migrations.
    pub async fn open(path: &Path, wal_mode: bool, read_only: bool) -> Result<Self, SpyglassError> {
        let conn = if read_only {
            tokio_rusqlite::Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .await
        } else {
            tokio_rusqlite::Connection::open(path).await
        }
        .map_err(|e| SpyglassError::StorageUnreadable(format!("{}: {e}", path.display())))?;

        let mut db = Self {
            conn,
            reader: None,
            path: Some(path.to_path_buf()),
        };
        db.prepare(wal_mode && !read_only, !read_only)
            .await
            .map_err(|e| SpyglassError::StorageUnreadable(format!("{}: {e}", path.display())))?;
        // WAL readers see the last commit without taking the write lock.
        if wal_mode && !read_only {
            db.reader = Some(open_reader(path).await?);
        }
        debug!(path = %path.display(), read_only, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database with the full schema.
    pub async fn open_in_memory() -> Result<Self, SpyglassError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))?;
        let db = Self {
            conn,
            reader: None,
            path: None,
        };
        db.prepare(false, true).await?;
        Ok(db)
    }

    async fn prepare(&self, wal_mode: bool, migrate: bool) -> Result<(), SpyglassError> {
        self.conn
            .call(move |conn| -> Result<(), DbError> {
                conn.busy_timeout(Duration::from_secs(5))?;
                if wal_mode {
                    let mode: String = conn.pragma_update_and_check(
                        None,
                        "journal_mode",
                        "WAL",
                        |row| row.get(0),
                    )?;
                    debug!(mode = %mode, "journal mode set");
                    conn.pragma_update(None, "synchronous", "NORMAL")?;
                }
                register_functions(conn)?;
                if migrate {
                    run_migrations(conn)?;
                }
                // Fails with NOTADB on a file that is not a SQLite database.
                conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                    row.get::<_, i64>(0)
                })?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Returns a reference to the writer connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// The connection queries should use: the read-only one when the store
    /// has it, the writer otherwise.
    pub fn reader(&self) -> &tokio_rusqlite::Connection {
        self.reader.as_ref().unwrap_or(&self.conn)
    }

    /// Database file path; `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size of the database in bytes (pages in use times page size).
    pub async fn size_bytes(&self) -> Result<u64, SpyglassError> {
        self.reader()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .map(|size| size.max(0) as u64)
            .map_err(map_sqlite_err)
    }

    /// Checkpoint the WAL and close the connections.
    pub async fn close(self) -> Result<(), SpyglassError> {
        if let Some(reader) = self.reader {
            reader
                .close()
                .await
                .map_err(|e| SpyglassError::storage(e.to_string()))?;
        }
        if self.path.is_some() {
            self.conn
                .call(|conn| -> Result<(), rusqlite::Error> {
                    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
                    Ok(())
                })
                .await
                .map_err(map_sqlite_err)?;
            debug!("WAL checkpoint complete");
        }
        self.conn
            .close()
            .await
            .map_err(|e| SpyglassError::storage(e.to_string()))
    }
}

async fn open_reader(path: &Path) -> Result<tokio_rusqlite::Connection, SpyglassError> {
    let reader = tokio_rusqlite::Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .await
    .map_err(|e| SpyglassError::StorageUnreadable(format!("{}: {e}", path.display())))?;
    reader
        .call(|conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(Duration::from_secs(5))?;
            register_functions(conn)
        })
        .await
        .map_err(map_sqlite_err)?;
    Ok(reader)
}
