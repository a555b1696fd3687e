// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent store for captured logs and network tasks.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single
//! writer fed by a bounded FIFO queue, a deduplicating Content Store for
//! request and response bodies, typed predicate queries with live
//! subscriptions, a retention sweep, and archive export and import.

mod codec;
pub mod content;
pub mod database;
mod error;
pub mod export;
pub mod facade;
pub mod manifest;
pub mod migrations;
pub mod predicate;
pub(crate) mod queries;
pub mod store;
pub mod sweep;
pub mod writer;

pub use content::{BlobInfo, BlobTotals, ContentStore, digest_of};
pub use database::Database;
pub use export::{ExportOptions, ImportReport};
pub use facade::{BodyState, Change, Observable, Query, Subscription};
pub use manifest::{Manifest, SCHEMA_VERSION, StoreInfo};
pub use predicate::{Entity, Field, MessageField, Predicate, TaskField, Value};
pub use store::{LogStore, StoreOptions};
pub use sweep::SweepReport;
pub use writer::Applied;
