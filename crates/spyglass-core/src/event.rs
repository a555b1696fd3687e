// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change notifications emitted after each applied store mutation.

use serde::Serialize;

use crate::types::{MessageRecord, Progress, SessionId, TaskId, TaskRecord};

/// A change applied to the store, in application order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    MessageCreated(MessageRecord),
    MessageUpdated(MessageRecord),
    TaskCreated(TaskRecord),
    TaskUpdated(TaskRecord),
    TaskProgressUpdated { task_id: TaskId, progress: Progress },
    TaskCompleted(TaskRecord),
    SessionsRemoved { ids: Vec<SessionId> },
    /// The retention sweep removed old records outside whole sessions.
    Trimmed,
    /// Sessions were copied in from an archive.
    Imported { ids: Vec<SessionId> },
    StoreCleared,
}

impl StoreEvent {
    /// The task the event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            StoreEvent::TaskCreated(t) | StoreEvent::TaskUpdated(t) | StoreEvent::TaskCompleted(t) => {
                Some(t.id)
            }
            StoreEvent::TaskProgressUpdated { task_id, .. } => Some(*task_id),
            StoreEvent::MessageCreated(m) | StoreEvent::MessageUpdated(m) => m.task_id,
            _ => None,
        }
    }
}
