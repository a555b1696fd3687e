// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Content Store: deduplicated, compressed, reference-counted payloads.
//!
//! Payloads are addressed by the SHA-1 of their uncompressed bytes. The
//! first `put` of a digest stores the payload; later ones only bump
//! `link_count`. Every operation runs on the database thread, so two
//! concurrent puts of the same digest can never both write the payload.
//!
//! Files of released blobs are removed only after the enclosing transaction
//! commits, and files written for new blobs are removed if it rolls back
//! (see [`BlobGc`]). Neither outcome leaves a row and its file out of step.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha1::{Digest as _, Sha1};
use spyglass_core::types::BodyRef;
use spyglass_core::{Digest, SpyglassError};
use tracing::{debug, warn};

use crate::error::DbError;

/// Compressed output is kept while smaller than this multiple of the input.
const COMPRESSION_KEEP_RATIO: f64 = 1.1;

/// Upper bound on the buffer reserved from a recorded decompressed size.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// SHA-1 of `bytes`.
pub fn digest_of(bytes: &[u8]) -> Digest {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Digest(hasher.finalize().into())
}

/// Restores a stored payload and verifies it against `digest`.
pub(crate) fn decode_payload(
    digest: &Digest,
    payload: Vec<u8>,
    is_uncompressed: bool,
    decompressed_size: u64,
) -> Result<Vec<u8>, SpyglassError> {
    let corrupted = || SpyglassError::CorruptedBlob { digest: *digest };
    let bytes = if is_uncompressed {
        payload
    } else {
        let hint = decompressed_size
            .min((payload.len() as u64).saturating_mul(4))
            .min(MAX_PREALLOCATION);
        let mut out = Vec::with_capacity(hint as usize);
        // One byte past the recorded size is enough to detect a mismatch.
        ZlibDecoder::new(payload.as_slice())
            .take(decompressed_size.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|_| corrupted())?;
        out
    };
    if bytes.len() as u64 != decompressed_size || digest_of(&bytes) != *digest {
        warn!(digest = %digest, "blob failed verification");
        return Err(corrupted());
    }
    Ok(bytes)
}

/// Bookkeeping row of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobInfo {
    pub digest: Digest,
    /// Bytes occupied on disk or inline.
    pub size: u64,
    pub decompressed_size: u64,
    pub link_count: i64,
    pub is_inline: bool,
    pub is_uncompressed: bool,
}

/// Aggregate blob statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BlobTotals {
    pub count: u64,
    pub size: u64,
    pub decompressed_size: u64,
}

/// A blob's payload exactly as stored.
#[derive(Debug, Clone)]
pub(crate) struct StoredBlob {
    pub info: BlobInfo,
    pub payload: Vec<u8>,
}

/// Blob files whose fate depends on how the enclosing transaction ends.
#[derive(Debug, Default)]
#[must_use = "call purge() after commit or rollback() after a failure"]
pub(crate) struct BlobGc {
    /// Files of released blobs, deleted after commit.
    released: Vec<PathBuf>,
    /// Files written for new blobs, deleted on rollback.
    written: Vec<PathBuf>,
}

impl BlobGc {
    /// The transaction committed: released files go.
    pub fn purge(self) {
        remove_files(self.released);
    }

    /// The transaction rolled back: files written for it go.
    pub fn rollback(self) {
        remove_files(self.written);
    }
}

fn remove_files(paths: Vec<PathBuf>) {
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "blob file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove blob file"),
        }
    }
}

/// Payload storage policy plus the directory holding large payloads.
#[derive(Debug, Clone)]
pub struct ContentStore {
    blobs_dir: PathBuf,
    inline_limit: usize,
    compression: bool,
}

impl ContentStore {
    pub fn new(blobs_dir: impl Into<PathBuf>, inline_limit: usize, compression: bool) -> Self {
        Self {
            blobs_dir: blobs_dir.into(),
            inline_limit,
            compression,
        }
    }

    pub fn blobs_dir(&self) -> &Path {
        &self.blobs_dir
    }

    pub(crate) fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_dir.join(digest.to_hex())
    }

    /// Stores `bytes` (or adds a reference to an identical stored payload).
    /// Empty payloads are not stored and yield `None`. A newly written file
    /// is recorded on `gc` so a rollback can remove it.
    pub(crate) fn put(
        &self,
        conn: &Connection,
        bytes: &[u8],
        gc: &mut BlobGc,
    ) -> Result<Option<BodyRef>, DbError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let digest = digest_of(bytes);
        let key = digest.to_hex();

        let bumped = conn.execute(
            "UPDATE blobs SET link_count = link_count + 1 WHERE digest = ?1",
            params![key],
        )?;
        if bumped == 0 {
            let (payload, is_uncompressed) = self.encode(bytes)?;
            let inline = payload.len() <= self.inline_limit;
            if !inline {
                self.write_file(&digest, &payload)?;
                gc.written.push(self.blob_path(&digest));
            }
            conn.execute(
                "INSERT INTO blobs (digest, size, decompressed_size, link_count, inline_data, is_uncompressed)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)",
                params![
                    key,
                    payload.len() as i64,
                    bytes.len() as i64,
                    inline.then_some(payload.as_slice()),
                    is_uncompressed,
                ],
            )?;
            debug!(digest = %digest, size = bytes.len(), stored = payload.len(), inline, "blob stored");
        }

        Ok(Some(BodyRef {
            digest,
            size: bytes.len() as u64,
        }))
    }

    /// The original payload, `None` when no blob has this digest.
    ///
    /// A payload that fails to decompress, or whose bytes no longer hash to
    /// `digest`, is reported as [`SpyglassError::CorruptedBlob`].
    pub(crate) fn get(&self, conn: &Connection, digest: &Digest) -> Result<Option<Vec<u8>>, DbError> {
        let Some(stored) = self.stored(conn, digest)? else {
            return Ok(None);
        };
        let bytes = decode_payload(
            digest,
            stored.payload,
            stored.info.is_uncompressed,
            stored.info.decompressed_size,
        )?;
        Ok(Some(bytes))
    }

    /// The payload as stored (possibly compressed), for export.
    pub(crate) fn stored(&self, conn: &Connection, digest: &Digest) -> Result<Option<StoredBlob>, DbError> {
        let row = conn
            .query_row(
                "SELECT size, decompressed_size, link_count, inline_data, is_uncompressed
                 FROM blobs WHERE digest = ?1",
                params![digest.to_hex()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<Vec<u8>>>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((size, decompressed_size, link_count, inline_data, is_uncompressed)) = row else {
            return Ok(None);
        };

        let is_inline = inline_data.is_some();
        let payload = match inline_data {
            Some(data) => data,
            None => fs::read(self.blob_path(digest)).map_err(|e| {
                warn!(digest = %digest, error = %e, "blob file unreadable");
                SpyglassError::CorruptedBlob { digest: *digest }
            })?,
        };
        Ok(Some(StoredBlob {
            info: BlobInfo {
                digest: *digest,
                size: size.max(0) as u64,
                decompressed_size: decompressed_size.max(0) as u64,
                link_count,
                is_inline,
                is_uncompressed,
            },
            payload,
        }))
    }

    /// Drops one reference. At zero the row is deleted and its file queued
    /// on `gc`. Releasing an unknown digest is a no-op.
    pub(crate) fn release(&self, conn: &Connection, digest: &Digest, gc: &mut BlobGc) -> Result<(), DbError> {
        let key = digest.to_hex();
        let remaining: Option<i64> = conn
            .query_row(
                "UPDATE blobs SET link_count = link_count - 1 WHERE digest = ?1 RETURNING link_count",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(remaining) = remaining
            && remaining <= 0
        {
            let inline: bool = conn.query_row(
                "DELETE FROM blobs WHERE digest = ?1 RETURNING inline_data IS NOT NULL",
                params![key],
                |row| row.get(0),
            )?;
            if !inline {
                gc.released.push(self.blob_path(digest));
            }
            debug!(digest = %digest, "blob released");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn info(&self, conn: &Connection, digest: &Digest) -> Result<Option<BlobInfo>, DbError> {
        let info = conn
            .query_row(
                "SELECT size, decompressed_size, link_count, inline_data IS NOT NULL, is_uncompressed
                 FROM blobs WHERE digest = ?1",
                params![digest.to_hex()],
                |row| {
                    Ok(BlobInfo {
                        digest: *digest,
                        size: row.get::<_, i64>(0)?.max(0) as u64,
                        decompressed_size: row.get::<_, i64>(1)?.max(0) as u64,
                        link_count: row.get(2)?,
                        is_inline: row.get(3)?,
                        is_uncompressed: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    pub(crate) fn totals(conn: &Connection) -> rusqlite::Result<BlobTotals> {
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0), COALESCE(SUM(decompressed_size), 0) FROM blobs",
            [],
            |row| {
                Ok(BlobTotals {
                    count: row.get::<_, i64>(0)?.max(0) as u64,
                    size: row.get::<_, i64>(1)?.max(0) as u64,
                    decompressed_size: row.get::<_, i64>(2)?.max(0) as u64,
                })
            },
        )
    }

    /// Deletes every blob row and queues every blob file.
    pub(crate) fn clear(&self, conn: &Connection, gc: &mut BlobGc) -> Result<(), DbError> {
        let mut stmt = conn.prepare("SELECT digest FROM blobs WHERE inline_data IS NULL")?;
        let digests = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for hex in digests {
            gc.released.push(self.blobs_dir.join(hex));
        }
        conn.execute("DELETE FROM blobs", [])?;
        Ok(())
    }

    fn encode(&self, bytes: &[u8]) -> io::Result<(Vec<u8>, bool)> {
        if self.compression {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            let compressed = encoder.finish()?;
            if (compressed.len() as f64) < bytes.len() as f64 * COMPRESSION_KEEP_RATIO {
                return Ok((compressed, false));
            }
        }
        Ok((bytes.to_vec(), true))
    }

    fn write_file(&self, digest: &Digest, payload: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.blobs_dir)?;
        let path = self.blob_path(digest);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &path)
    }
}
