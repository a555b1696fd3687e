// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delegate surface of the host networking stack.
//!
//! Optional callbacks are grouped into capability traits. A delegate
//! advertises a group by returning `Some(self)` from the matching `as_*`
//! accessor on [`SessionDelegate`]; the stack only invokes groups a delegate
//! advertises. Wrappers snapshot the wrapped delegate's [`Capabilities`]
//! once, so forwarding decisions never depend on runtime introspection.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::network::{NetworkRequest, NetworkResponse, ResponseError, TaskMetrics};
use crate::types::TaskType;

/// Identity the networking stack assigns to one of its task objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskIdentity(pub u64);

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TaskSnapshot {
    current_request: Option<NetworkRequest>,
    response: Option<NetworkResponse>,
}

/// A task object owned by the networking stack.
///
/// Observers only ever hold it through `Weak` references, so dropping the
/// last `Arc` is how the stack signals the task is gone.
#[derive(Debug)]
pub struct NetworkTask {
    identity: TaskIdentity,
    task_type: TaskType,
    original_request: Option<NetworkRequest>,
    task_description: Option<String>,
    snapshot: RwLock<TaskSnapshot>,
}

impl NetworkTask {
    pub fn new(
        identity: TaskIdentity,
        task_type: TaskType,
        original_request: Option<NetworkRequest>,
    ) -> Self {
        Self {
            identity,
            task_type,
            snapshot: RwLock::new(TaskSnapshot {
                current_request: original_request.clone(),
                response: None,
            }),
            original_request,
            task_description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.task_description = Some(description.into());
        self
    }

    pub fn identity(&self) -> TaskIdentity {
        self.identity
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn original_request(&self) -> Option<&NetworkRequest> {
        self.original_request.as_ref()
    }

    pub fn task_description(&self) -> Option<&str> {
        self.task_description.as_deref()
    }

    pub fn current_request(&self) -> Option<NetworkRequest> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_request
            .clone()
    }

    pub fn response(&self) -> Option<NetworkResponse> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .response
            .clone()
    }

    pub fn set_current_request(&self, request: NetworkRequest) {
        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .current_request = Some(request);
    }

    pub fn set_response(&self, response: NetworkResponse) {
        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .response = Some(response);
    }
}

/// What the stack should do after a response head arrives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseDisposition {
    #[default]
    Allow,
    Cancel,
    BecomeDownload,
}

/// Task creation and completion.
pub trait LifecycleDelegate: Send + Sync {
    fn did_create_task(&self, _task: &Arc<NetworkTask>) {}

    fn did_complete(&self, _task: &Arc<NetworkTask>, _error: Option<&ResponseError>) {}
}

/// Incremental response body delivery.
pub trait DataDelegate: Send + Sync {
    fn did_receive_data(&self, task: &Arc<NetworkTask>, data: &[u8]);
}

/// Response head decisions.
pub trait ResponseDelegate: Send + Sync {
    fn did_receive_response(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
    ) -> ResponseDisposition;
}

/// Final task metrics.
pub trait MetricsDelegate: Send + Sync {
    fn did_finish_collecting_metrics(&self, task: &Arc<NetworkTask>, metrics: &TaskMetrics);
}

/// HTTP redirects. Returning `None` stops the redirect.
pub trait RedirectDelegate: Send + Sync {
    fn will_perform_redirection(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
        new_request: NetworkRequest,
    ) -> Option<NetworkRequest>;
}

/// Upload progress.
pub trait UploadDelegate: Send + Sync {
    fn did_send_body_data(
        &self,
        task: &Arc<NetworkTask>,
        bytes_sent: i64,
        total_bytes_sent: i64,
        total_bytes_expected: i64,
    );
}

/// Download completion and progress.
pub trait DownloadDelegate: Send + Sync {
    fn did_finish_downloading(&self, _task: &Arc<NetworkTask>, _location: &Path) {}

    fn did_write_data(
        &self,
        _task: &Arc<NetworkTask>,
        _bytes_written: i64,
        _total_bytes_written: i64,
        _total_bytes_expected: i64,
    ) {
    }
}

/// One optional callback group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    Lifecycle,
    Data,
    Response,
    Metrics,
    Redirect,
    Upload,
    Download,
}

impl Capability {
    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of [`Capability`] groups.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub fn empty() -> Self {
        Capabilities(0)
    }

    pub fn all() -> Self {
        Capability::iter().collect()
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::empty(), Capabilities::with)
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A session delegate: any subset of the capability groups.
pub trait SessionDelegate: Send + Sync {
    fn as_lifecycle(&self) -> Option<&dyn LifecycleDelegate> {
        None
    }

    fn as_data(&self) -> Option<&dyn DataDelegate> {
        None
    }

    fn as_response(&self) -> Option<&dyn ResponseDelegate> {
        None
    }

    fn as_metrics(&self) -> Option<&dyn MetricsDelegate> {
        None
    }

    fn as_redirect(&self) -> Option<&dyn RedirectDelegate> {
        None
    }

    fn as_upload(&self) -> Option<&dyn UploadDelegate> {
        None
    }

    fn as_download(&self) -> Option<&dyn DownloadDelegate> {
        None
    }

    /// The groups this delegate answers to.
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        let present = [
            (Capability::Lifecycle, self.as_lifecycle().is_some()),
            (Capability::Data, self.as_data().is_some()),
            (Capability::Response, self.as_response().is_some()),
            (Capability::Metrics, self.as_metrics().is_some()),
            (Capability::Redirect, self.as_redirect().is_some()),
            (Capability::Upload, self.as_upload().is_some()),
            (Capability::Download, self.as_download().is_some()),
        ];
        for (capability, is_present) in present {
            if is_present {
                caps = caps.with(capability);
            }
        }
        caps
    }

    fn responds_to(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DataOnly;

    impl DataDelegate for DataOnly {
        fn did_receive_data(&self, _task: &Arc<NetworkTask>, _data: &[u8]) {}
    }

    impl SessionDelegate for DataOnly {
        fn as_data(&self) -> Option<&dyn DataDelegate> {
            Some(self)
        }
    }

    #[test]
    fn capabilities_reflect_accessors() {
        let caps = DataOnly.capabilities();
        assert!(caps.contains(Capability::Data));
        assert!(!caps.contains(Capability::Redirect));
        assert_eq!(caps.iter().count(), 1);
    }

    #[test]
    fn capability_set_algebra() {
        let all = Capabilities::all();
        assert_eq!(all.iter().count(), 7);
        let some = Capabilities::empty().with(Capability::Metrics) | Capabilities::empty().with(Capability::Upload);
        assert!(some.contains(Capability::Metrics));
        assert!(some.contains(Capability::Upload));
        assert!(!some.contains(Capability::Data));
        assert_eq!(format!("{some:?}"), "{Metrics, Upload}");
    }

    #[test]
    fn network_task_snapshot_updates() {
        let request = NetworkRequest::new("https://example.com/a");
        let task = NetworkTask::new(TaskIdentity(1), TaskType::Data, Some(request.clone()));
        assert_eq!(task.current_request(), Some(request));
        task.set_current_request(NetworkRequest::new("https://example.com/b"));
        task.set_response(NetworkResponse::new(200));
        assert_eq!(
            task.current_request().and_then(|r| r.url).as_deref(),
            Some("https://example.com/b")
        );
        assert_eq!(task.response().and_then(|r| r.status_code), Some(200));
    }
}
