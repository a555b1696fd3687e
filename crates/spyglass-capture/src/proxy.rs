// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability-preserving proxy over an application's session delegate.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use spyglass_core::TaskType;
use spyglass_core::network::{NetworkRequest, NetworkResponse, ResponseError, TaskMetrics};
use spyglass_core::traits::delegate::{
    Capabilities, Capability, DataDelegate, DownloadDelegate, LifecycleDelegate, MetricsDelegate,
    NetworkTask, RedirectDelegate, ResponseDelegate, ResponseDisposition, SessionDelegate,
    UploadDelegate,
};
use tracing::trace;

use crate::logger::NetworkLogger;

/// Groups the proxy always answers to, whatever it wraps.
pub fn intercepted() -> Capabilities {
    [
        Capability::Lifecycle,
        Capability::Data,
        Capability::Metrics,
        Capability::Redirect,
        Capability::Upload,
        Capability::Download,
    ]
    .into_iter()
    .collect()
}

/// A drop-in replacement for the application's delegate.
///
/// Every callback is recorded through the [`NetworkLogger`] and then handed
/// to the wrapped delegate when, and only when, the wrapped delegate
/// advertised that group at construction time. Groups the proxy does not
/// intercept are advertised only if the wrapped delegate has them, so the
/// stack's capability checks see the same answers they would without the
/// proxy.
pub struct ProxyDelegate {
    logger: Arc<NetworkLogger>,
    inner: Option<Arc<dyn SessionDelegate>>,
    forwarded: Capabilities,
}

impl fmt::Debug for ProxyDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDelegate")
            .field("forwarded", &self.forwarded)
            .field("logger", &self.logger)
            .finish()
    }
}

impl ProxyDelegate {
    pub fn new(logger: Arc<NetworkLogger>, delegate: Option<Arc<dyn SessionDelegate>>) -> Self {
        let forwarded = delegate
            .as_ref()
            .map(|d| d.capabilities())
            .unwrap_or_default();
        Self {
            logger,
            inner: delegate,
            forwarded,
        }
    }

    pub fn logger(&self) -> &Arc<NetworkLogger> {
        &self.logger
    }

    pub fn wrapped(&self) -> Option<&Arc<dyn SessionDelegate>> {
        self.inner.as_ref()
    }

    /// The wrapped delegate's groups, as captured at construction.
    pub fn forwarded(&self) -> Capabilities {
        self.forwarded
    }

    fn target(&self, capability: Capability) -> Option<&dyn SessionDelegate> {
        if self.forwarded.contains(capability) {
            self.inner.as_deref()
        } else {
            None
        }
    }
}

impl SessionDelegate for ProxyDelegate {
    fn as_lifecycle(&self) -> Option<&dyn LifecycleDelegate> {
        Some(self)
    }

    fn as_data(&self) -> Option<&dyn DataDelegate> {
        Some(self)
    }

    fn as_response(&self) -> Option<&dyn ResponseDelegate> {
        self.forwarded
            .contains(Capability::Response)
            .then_some(self as &dyn ResponseDelegate)
    }

    fn as_metrics(&self) -> Option<&dyn MetricsDelegate> {
        Some(self)
    }

    fn as_redirect(&self) -> Option<&dyn RedirectDelegate> {
        Some(self)
    }

    fn as_upload(&self) -> Option<&dyn UploadDelegate> {
        Some(self)
    }

    fn as_download(&self) -> Option<&dyn DownloadDelegate> {
        Some(self)
    }

    fn capabilities(&self) -> Capabilities {
        intercepted() | self.forwarded
    }
}

impl LifecycleDelegate for ProxyDelegate {
    fn did_create_task(&self, task: &Arc<NetworkTask>) {
        self.logger.log_task_created(task);
        if let Some(d) = self.target(Capability::Lifecycle).and_then(|d| d.as_lifecycle()) {
            d.did_create_task(task);
        }
    }

    fn did_complete(&self, task: &Arc<NetworkTask>, error: Option<&ResponseError>) {
        self.logger.log_completion(task, error);
        if let Some(d) = self.target(Capability::Lifecycle).and_then(|d| d.as_lifecycle()) {
            d.did_complete(task, error);
        }
    }
}

impl DataDelegate for ProxyDelegate {
    fn did_receive_data(&self, task: &Arc<NetworkTask>, data: &[u8]) {
        self.logger.log_data(task, data);
        if let Some(d) = self.target(Capability::Data).and_then(|d| d.as_data()) {
            d.did_receive_data(task, data);
        }
    }
}

impl ResponseDelegate for ProxyDelegate {
    fn did_receive_response(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
    ) -> ResponseDisposition {
        self.logger.log_response(task, response);
        self.target(Capability::Response)
            .and_then(|d| d.as_response())
            .map(|d| d.did_receive_response(task, response))
            .unwrap_or_default()
    }
}

impl MetricsDelegate for ProxyDelegate {
    fn did_finish_collecting_metrics(&self, task: &Arc<NetworkTask>, metrics: &TaskMetrics) {
        self.logger.log_metrics(task, metrics);
        if let Some(d) = self.target(Capability::Metrics).and_then(|d| d.as_metrics()) {
            d.did_finish_collecting_metrics(task, metrics);
        }
    }
}

impl RedirectDelegate for ProxyDelegate {
    /// Asks the wrapped delegate first; without one the redirect is
    /// followed. Only followed redirects are recorded as hops.
    fn will_perform_redirection(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
        new_request: NetworkRequest,
    ) -> Option<NetworkRequest> {
        let decision = match self.target(Capability::Redirect).and_then(|d| d.as_redirect()) {
            Some(d) => d.will_perform_redirection(task, response, new_request),
            None => Some(new_request),
        };
        match &decision {
            Some(request) => self.logger.log_redirect(task, response, request),
            None => trace!(task = %task.identity(), "redirect refused by delegate"),
        }
        decision
    }
}

impl UploadDelegate for ProxyDelegate {
    fn did_send_body_data(
        &self,
        task: &Arc<NetworkTask>,
        bytes_sent: i64,
        total_bytes_sent: i64,
        total_bytes_expected: i64,
    ) {
        if task.task_type() == TaskType::Upload {
            self.logger
                .log_progress(task, total_bytes_sent, total_bytes_expected);
        }
        if let Some(d) = self.target(Capability::Upload).and_then(|d| d.as_upload()) {
            d.did_send_body_data(task, bytes_sent, total_bytes_sent, total_bytes_expected);
        }
    }
}

impl DownloadDelegate for ProxyDelegate {
    fn did_finish_downloading(&self, task: &Arc<NetworkTask>, location: &Path) {
        trace!(task = %task.identity(), location = %location.display(), "did finish downloading");
        if let Some(d) = self.target(Capability::Download).and_then(|d| d.as_download()) {
            d.did_finish_downloading(task, location);
        }
    }

    fn did_write_data(
        &self,
        task: &Arc<NetworkTask>,
        bytes_written: i64,
        total_bytes_written: i64,
        total_bytes_expected: i64,
    ) {
        self.logger
            .log_progress(task, total_bytes_written, total_bytes_expected);
        if let Some(d) = self.target(Capability::Download).and_then(|d| d.as_download()) {
            d.did_write_data(task, bytes_written, total_bytes_written, total_bytes_expected);
        }
    }
}
