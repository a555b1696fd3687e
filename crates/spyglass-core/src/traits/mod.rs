// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the capture layer, the host networking stack and the store.

pub mod delegate;
pub mod sink;

pub use delegate::{
    Capabilities, Capability, DataDelegate, DownloadDelegate, LifecycleDelegate,
    MetricsDelegate, NetworkTask, RedirectDelegate, ResponseDelegate, ResponseDisposition,
    SessionDelegate, TaskIdentity, UploadDelegate,
};
pub use sink::{EventSink, StoreCommand};
