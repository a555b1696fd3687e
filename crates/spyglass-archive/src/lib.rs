// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Portable archive codec for Spyglass store exports.
//!
//! The container is a ZIP-compatible subset: local file headers followed by
//! entry data, a central directory, and an end-of-central-directory record.
//! Entries are stored raw or with raw deflate. Every entry carries a CRC-32
//! of its uncompressed bytes which is verified on extraction.
//!
//! Readers locate the end-of-central-directory record by scanning backwards
//! through a bounded trailing window, so archives may carry a trailing
//! comment or appended bytes.

pub mod archive;
pub mod entry;
mod records;

pub use archive::{AccessMode, Archive, DEFAULT_BUFFER_SIZE};
pub use entry::{CompressionMethod, Entry};
