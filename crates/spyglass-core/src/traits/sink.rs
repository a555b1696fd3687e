// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Write-side seam used by the capture layer.

use crate::error::SpyglassError;
use crate::types::{BodyKind, NewMessage, NewTask, SessionId, TaskCompletion, TaskId, TaskUpdate};

/// A store mutation, applied in enqueue order by the store's writer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    AppendMessage(NewMessage),
    BeginTask(NewTask),
    UpdateTask {
        id: TaskId,
        update: TaskUpdate,
    },
    FinishTask {
        id: TaskId,
        completion: TaskCompletion,
    },
    AttachBody {
        id: TaskId,
        kind: BodyKind,
        bytes: Vec<u8>,
    },
}

impl StoreCommand {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            StoreCommand::AppendMessage(_) => None,
            StoreCommand::BeginTask(task) => Some(task.id),
            StoreCommand::UpdateTask { id, .. }
            | StoreCommand::FinishTask { id, .. }
            | StoreCommand::AttachBody { id, .. } => Some(*id),
        }
    }
}

/// Destination for fire-and-forget store mutations.
///
/// `enqueue` must not block: it is called from networking callback threads.
/// An error means the command was not queued (for example, the store is
/// closed); it never reports the outcome of applying the command.
pub trait EventSink: Send + Sync {
    /// Session new records are attributed to.
    fn session_id(&self) -> SessionId;

    fn enqueue(&self, command: StoreCommand) -> Result<(), SpyglassError>;

    /// Largest body the sink keeps. Producers stop buffering a body once it
    /// grows past this.
    fn body_size_limit(&self) -> usize {
        usize::MAX
    }
}
