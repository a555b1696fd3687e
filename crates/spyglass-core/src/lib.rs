// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Spyglass capture engine.
//!
//! This crate provides the error taxonomy, identifiers, the log and network
//! domain model, store change events, and the trait seams that connect the
//! capture layer to the host networking stack and to the event store.

pub mod error;
pub mod event;
pub mod network;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::SpyglassError;
pub use event::StoreEvent;
pub use types::{
    BodyKind, BodyRef, Digest, Level, MessageId, SessionId, TaskId, TaskState, TaskType,
};

pub use traits::{EventSink, SessionDelegate, StoreCommand};
