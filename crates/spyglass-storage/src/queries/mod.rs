// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row-level operations on store entities.
//!
//! Every function takes a borrowed `rusqlite::Connection` and runs on the
//! database thread, inside whatever transaction the caller holds.

pub(crate) mod labels;
pub(crate) mod messages;
pub(crate) mod sessions;
pub(crate) mod tasks;
