// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error plumbing between rusqlite closures and [`SpyglassError`].

use spyglass_core::SpyglassError;

/// Error type of closures run on the database thread. Lets `?` lift both
/// rusqlite failures and domain errors.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Domain(#[from] SpyglassError),
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Domain(e.into())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Domain(e.into())
    }
}

impl From<DbError> for SpyglassError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(e) => SpyglassError::storage(e),
            DbError::Domain(e) => e,
        }
    }
}

/// Convert a tokio-rusqlite error into SpyglassError.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<DbError>) -> SpyglassError {
    match e {
        tokio_rusqlite::Error::Error(inner) => inner.into(),
        other => SpyglassError::storage(other.to_string()),
    }
}

/// Convert a tokio-rusqlite error carrying a plain rusqlite error.
pub(crate) fn map_sqlite_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> SpyglassError {
    SpyglassError::storage(e.to_string())
}
