// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Spyglass capture engine.

use thiserror::Error;

use crate::types::{Digest, TaskId};

/// The error type shared by every Spyglass crate.
///
/// Variants map onto the failure classes callers need to tell apart: store
/// access, per-item corruption, caller protocol misuse, archive I/O and
/// import compatibility.
#[derive(Debug, Error)]
pub enum SpyglassError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// The store is missing or cannot be opened as a Spyglass store.
    #[error("store unreadable: {0}")]
    StorageUnreadable(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Filesystem errors outside the database.
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A stored blob could not be decompressed or failed its digest check.
    #[error("blob {digest} is corrupted")]
    CorruptedBlob { digest: Digest },

    /// An archive entry failed its CRC-32 check or has an inconsistent header.
    #[error("archive entry `{path}` is corrupted")]
    CorruptedEntry { path: String },

    /// A task mutation referenced an id the store has never seen.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// A task mutation arrived after the task reached a terminal state.
    #[error("task {0} already finished")]
    TaskAlreadyFinished(TaskId),

    /// An archive was produced by an incompatible store schema.
    #[error("unsupported schema version {found} (supported: {supported})")]
    UnsupportedSchemaVersion { found: String, supported: String },

    /// The archive is not open for writing, or the destination already exists.
    #[error("archive is not writable: {0}")]
    UnwritableArchive(String),

    /// The underlying archive file is truncated or cannot be read.
    #[error("archive is unreadable: {0}")]
    UnreadableArchive(String),

    /// No end-of-central-directory record was found.
    #[error("file is not an archive")]
    NotAnArchive,

    /// A caller supplied a zero or otherwise unusable buffer size.
    #[error("invalid buffer size: {0}")]
    InvalidBufferSize(usize),

    /// A query predicate referenced a field or value the entity does not support.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpyglassError {
    /// Wrap any backend error as [`SpyglassError::Storage`].
    pub fn storage(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SpyglassError::Storage {
            source: source.into(),
        }
    }

    /// Returns true for errors that affect a single item rather than the whole store.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            SpyglassError::CorruptedBlob { .. } | SpyglassError::CorruptedEntry { .. }
        )
    }
}

impl From<serde_json::Error> for SpyglassError {
    fn from(e: serde_json::Error) -> Self {
        SpyglassError::storage(e)
    }
}
