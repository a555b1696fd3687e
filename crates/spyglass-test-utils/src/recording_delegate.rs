// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording session delegate for deterministic testing.
//!
//! `RecordingDelegate` answers to exactly the capability groups it was built
//! with and records every callback it receives, so tests can assert what a
//! wrapping delegate forwarded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use spyglass_core::network::{NetworkRequest, NetworkResponse, ResponseError, TaskMetrics};
use spyglass_core::traits::delegate::{
    Capabilities, Capability, DataDelegate, DownloadDelegate, LifecycleDelegate, MetricsDelegate,
    NetworkTask, RedirectDelegate, ResponseDelegate, ResponseDisposition, SessionDelegate,
    TaskIdentity, UploadDelegate,
};

/// One callback received by a [`RecordingDelegate`].
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateCall {
    Created(TaskIdentity),
    Completed {
        task: TaskIdentity,
        error: Option<ResponseError>,
    },
    Data {
        task: TaskIdentity,
        len: usize,
    },
    Response {
        task: TaskIdentity,
        status: Option<i32>,
    },
    Metrics(TaskIdentity),
    Redirect {
        task: TaskIdentity,
        to: Option<String>,
    },
    SentBody {
        task: TaskIdentity,
        total: i64,
    },
    FinishedDownloading {
        task: TaskIdentity,
        location: PathBuf,
    },
    WroteData {
        task: TaskIdentity,
        total: i64,
    },
}

/// A session delegate with a configurable capability set.
pub struct RecordingDelegate {
    capabilities: Capabilities,
    calls: Arc<Mutex<Vec<DelegateCall>>>,
    follow_redirects: bool,
    disposition: ResponseDisposition,
}

impl RecordingDelegate {
    /// A delegate answering to `capabilities`.
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            calls: Arc::new(Mutex::new(Vec::new())),
            follow_redirects: true,
            disposition: ResponseDisposition::Allow,
        }
    }

    /// A delegate answering to every group.
    pub fn full() -> Self {
        Self::new(Capabilities::all())
    }

    /// Refuse every redirect.
    pub fn refusing_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Answer response heads with `disposition`.
    pub fn with_disposition(mut self, disposition: ResponseDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// Get all callbacks received so far.
    pub fn calls(&self) -> Vec<DelegateCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get the count of callbacks received.
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn record(&self, call: DelegateCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn answers(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

impl SessionDelegate for RecordingDelegate {
    fn as_lifecycle(&self) -> Option<&dyn LifecycleDelegate> {
        self.answers(Capability::Lifecycle)
            .then_some(self as &dyn LifecycleDelegate)
    }

    fn as_data(&self) -> Option<&dyn DataDelegate> {
        self.answers(Capability::Data).then_some(self as &dyn DataDelegate)
    }

    fn as_response(&self) -> Option<&dyn ResponseDelegate> {
        self.answers(Capability::Response)
            .then_some(self as &dyn ResponseDelegate)
    }

    fn as_metrics(&self) -> Option<&dyn MetricsDelegate> {
        self.answers(Capability::Metrics)
            .then_some(self as &dyn MetricsDelegate)
    }

    fn as_redirect(&self) -> Option<&dyn RedirectDelegate> {
        self.answers(Capability::Redirect)
            .then_some(self as &dyn RedirectDelegate)
    }

    fn as_upload(&self) -> Option<&dyn UploadDelegate> {
        self.answers(Capability::Upload)
            .then_some(self as &dyn UploadDelegate)
    }

    fn as_download(&self) -> Option<&dyn DownloadDelegate> {
        self.answers(Capability::Download)
            .then_some(self as &dyn DownloadDelegate)
    }
}

impl LifecycleDelegate for RecordingDelegate {
    fn did_create_task(&self, task: &Arc<NetworkTask>) {
        self.record(DelegateCall::Created(task.identity()));
    }

    fn did_complete(&self, task: &Arc<NetworkTask>, error: Option<&ResponseError>) {
        self.record(DelegateCall::Completed {
            task: task.identity(),
            error: error.cloned(),
        });
    }
}

impl DataDelegate for RecordingDelegate {
    fn did_receive_data(&self, task: &Arc<NetworkTask>, data: &[u8]) {
        self.record(DelegateCall::Data {
            task: task.identity(),
            len: data.len(),
        });
    }
}

impl ResponseDelegate for RecordingDelegate {
    fn did_receive_response(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
    ) -> ResponseDisposition {
        self.record(DelegateCall::Response {
            task: task.identity(),
            status: response.status_code,
        });
        self.disposition
    }
}

impl MetricsDelegate for RecordingDelegate {
    fn did_finish_collecting_metrics(&self, task: &Arc<NetworkTask>, _metrics: &TaskMetrics) {
        self.record(DelegateCall::Metrics(task.identity()));
    }
}

impl RedirectDelegate for RecordingDelegate {
    fn will_perform_redirection(
        &self,
        task: &Arc<NetworkTask>,
        _response: &NetworkResponse,
        new_request: NetworkRequest,
    ) -> Option<NetworkRequest> {
        self.record(DelegateCall::Redirect {
            task: task.identity(),
            to: new_request.url.clone(),
        });
        self.follow_redirects.then_some(new_request)
    }
}

impl UploadDelegate for RecordingDelegate {
    fn did_send_body_data(
        &self,
        task: &Arc<NetworkTask>,
        _bytes_sent: i64,
        total_bytes_sent: i64,
        _total_bytes_expected: i64,
    ) {
        self.record(DelegateCall::SentBody {
            task: task.identity(),
            total: total_bytes_sent,
        });
    }
}

impl DownloadDelegate for RecordingDelegate {
    fn did_finish_downloading(&self, task: &Arc<NetworkTask>, location: &Path) {
        self.record(DelegateCall::FinishedDownloading {
            task: task.identity(),
            location: location.to_path_buf(),
        });
    }

    fn did_write_data(
        &self,
        task: &Arc<NetworkTask>,
        _bytes_written: i64,
        total_bytes_written: i64,
        _total_bytes_expected: i64,
    ) {
        self.record(DelegateCall::WroteData {
            task: task.identity(),
            total: total_bytes_written,
        });
    }
}
