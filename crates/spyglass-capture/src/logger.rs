// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns networking lifecycle callbacks into store commands.
//!
//! Every entry point is infallible from the caller's point of view: failures
//! to queue a command or to read a request body are logged and dropped so
//! observation never disturbs the host's networking.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use chrono::Utc;
use spyglass_config::model::CaptureConfig;
use spyglass_core::network::{
    DateInterval, FetchType, NetworkRequest, NetworkResponse, ResponseError, TaskMetrics,
    TransactionMetrics,
};
use spyglass_core::traits::delegate::NetworkTask;
use spyglass_core::types::{
    Metadata, NewMessage, NewTask, Progress, Provenance, TaskCompletion, TaskUpdate,
};
use spyglass_core::{BodyKind, EventSink, Level, SpyglassError, StoreCommand, TaskId, TaskType};
use tracing::{debug, trace, warn};

use crate::filter::CaptureFilter;
use crate::redact::Redactor;
use crate::tracker::{EvictionReason, Evicted, TaskContext, TaskTracker};

/// Error domain of failures the capture layer records itself.
pub const CAPTURE_ERROR_DOMAIN: &str = "SpyglassCapture";

/// Error domain of decoding failures reported through
/// [`NetworkLogger::log_decoding`].
pub const DECODING_ERROR_DOMAIN: &str = "DecodingError";

/// A complete exchange recorded in one call with [`NetworkLogger::log_task`].
#[derive(Debug, Clone)]
pub struct LoggedTask {
    pub task_type: TaskType,
    pub request: NetworkRequest,
    pub response: Option<NetworkResponse>,
    pub error: Option<ResponseError>,
    pub response_body: Vec<u8>,
    pub metrics: Option<TaskMetrics>,
    pub task_description: Option<String>,
}

impl LoggedTask {
    pub fn new(request: NetworkRequest) -> Self {
        Self {
            task_type: TaskType::Data,
            request,
            response: None,
            error: None,
            response_body: Vec::new(),
            metrics: None,
            task_description: None,
        }
    }

    pub fn with_response(mut self, response: NetworkResponse, body: impl Into<Vec<u8>>) -> Self {
        self.response = Some(response);
        self.response_body = body.into();
        self
    }

    pub fn with_error(mut self, error: ResponseError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_metrics(mut self, metrics: TaskMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Records networking tasks into an [`EventSink`].
pub struct NetworkLogger {
    sink: Arc<dyn EventSink>,
    config: CaptureConfig,
    filter: CaptureFilter,
    redactor: Redactor,
    tracker: TaskTracker,
}

impl fmt::Debug for NetworkLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkLogger")
            .field("session", &self.sink.session_id())
            .field("label", &self.config.label)
            .field("tracked", &self.tracker.len())
            .finish()
    }
}

impl NetworkLogger {
    /// Fails only when a filter or redaction pattern does not compile.
    pub fn new(sink: Arc<dyn EventSink>, config: CaptureConfig) -> Result<Self, SpyglassError> {
        let invalid = |e: regex::Error| SpyglassError::Config(format!("capture pattern: {e}"));
        let filter = CaptureFilter::from_config(&config).map_err(invalid)?;
        let redactor = Redactor::from_config(&config).map_err(invalid)?;
        Ok(Self {
            sink,
            tracker: TaskTracker::new(config.max_tracked_tasks),
            config,
            filter,
            redactor,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Number of tasks currently awaiting completion.
    pub fn tracked_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Store id assigned to `task`, if it is being tracked.
    pub fn task_id(&self, task: &Arc<NetworkTask>) -> Option<TaskId> {
        self.tracker.task_id(task)
    }

    /// Appends a plain log message attributed to the caller's location.
    #[track_caller]
    pub fn log_message(&self, level: Level, label: &str, text: impl Into<String>, metadata: Metadata) {
        let caller = Location::caller();
        let message = NewMessage::new(self.sink.session_id(), level, label, text)
            .with_metadata(metadata)
            .with_provenance(Provenance::new(caller.file(), "", caller.line()));
        self.send(StoreCommand::AppendMessage(message));
    }

    /// Starts tracking `task` and records its creation. Later callbacks
    /// register unseen tasks on their own, so calling this is optional.
    pub fn log_task_created(&self, task: &Arc<NetworkTask>) {
        if self.track(task).is_some() {
            trace!(task = %task.identity(), url = ?task.original_request().and_then(|r| r.url.as_deref()), "did create task");
        }
    }

    pub fn log_response(&self, task: &Arc<NetworkTask>, response: &NetworkResponse) {
        let Some(task_id) = self.track(task) else {
            return;
        };
        self.tracker
            .with(task, |ctx| ctx.response = Some(response.clone()));
        let mut response = response.clone();
        self.redactor.response(&mut response);
        trace!(task = %task.identity(), status = ?response.status_code, "did receive response");
        self.send(StoreCommand::UpdateTask {
            id: task_id,
            update: TaskUpdate {
                response: Some(response),
                ..TaskUpdate::default()
            },
        });
    }

    /// Appends a chunk of the response body. A body that grows past the
    /// sink's limit is discarded and no longer buffered.
    pub fn log_data(&self, task: &Arc<NetworkTask>, data: &[u8]) {
        if self.track(task).is_none() || !self.config.capture_response_bodies {
            return;
        }
        let limit = self.sink.body_size_limit();
        self.tracker.with(task, |ctx| {
            if ctx.data_overflowed {
                return;
            }
            if ctx.data.len().saturating_add(data.len()) > limit {
                debug!(task = %ctx.task_id, limit, "response body over limit, not buffering");
                ctx.data = Vec::new();
                ctx.data_overflowed = true;
                return;
            }
            ctx.data.extend_from_slice(data);
        });
    }

    pub fn log_progress(&self, task: &Arc<NetworkTask>, completed: i64, total: i64) {
        let Some(task_id) = self.track(task) else {
            return;
        };
        self.send(StoreCommand::UpdateTask {
            id: task_id,
            update: TaskUpdate {
                progress: Some(Progress { completed, total }),
                ..TaskUpdate::default()
            },
        });
    }

    /// Keeps the final metrics until the task completes.
    pub fn log_metrics(&self, task: &Arc<NetworkTask>, metrics: &TaskMetrics) {
        if self.track(task).is_none() {
            return;
        }
        self.tracker
            .with(task, |ctx| ctx.metrics = Some(metrics.clone()));
    }

    /// Records a followed redirect: the finished hop becomes a transaction
    /// of the task and `new_request` its current request.
    pub fn log_redirect(
        &self,
        task: &Arc<NetworkTask>,
        response: &NetworkResponse,
        new_request: &NetworkRequest,
    ) {
        let Some(task_id) = self.track(task) else {
            return;
        };
        let metrics = self.tracker.with(task, |ctx| {
            let request = ctx
                .current_request
                .take()
                .or_else(|| task.current_request())
                .or_else(|| task.original_request().cloned());
            if let Some(request) = request {
                let mut hop = TransactionMetrics::new(FetchType::NetworkLoad, request);
                hop.response = Some(response.clone());
                ctx.hops.push(hop);
            }
            ctx.redirect_count += 1;
            ctx.current_request = Some(new_request.clone());
            hop_metrics(ctx)
        });
        let Some(mut metrics) = metrics else {
            return;
        };
        let mut current = new_request.clone();
        self.redactor.request(&mut current);
        self.redactor.metrics(&mut metrics);
        debug!(task = %task.identity(), hops = metrics.redirect_count, to = ?current.url, "redirect");
        self.send(StoreCommand::UpdateTask {
            id: task_id,
            update: TaskUpdate {
                current_request: Some(current),
                metrics: Some(metrics),
                ..TaskUpdate::default()
            },
        });
    }

    /// Records the transport outcome. A successful transport is held back
    /// when the logger waits for decoding; a failed one always completes.
    pub fn log_completion(&self, task: &Arc<NetworkTask>, error: Option<&ResponseError>) {
        if error.is_none() && self.config.wait_for_decoding {
            if self.track(task).is_some() {
                self.tracker.with(task, |ctx| ctx.awaiting_decoding = true);
                trace!(task = %task.identity(), "transport done, waiting for decoding");
            }
            return;
        }
        self.complete(task, error.cloned());
    }

    /// Completes a task after the caller decoded its response. A decoding
    /// error fails the task.
    pub fn log_decoding<T, E: fmt::Display>(&self, task: &Arc<NetworkTask>, result: &Result<T, E>) {
        let error = result
            .as_ref()
            .err()
            .map(|e| ResponseError::new(-1, DECODING_ERROR_DOMAIN, e.to_string()));
        self.complete(task, error);
    }

    /// Records a finished exchange without a live task object. Returns the
    /// store id, or `None` when the filter rejects the request.
    pub fn log_task(&self, logged: LoggedTask) -> Option<TaskId> {
        if !self.filter.allows(logged.request.url.as_deref()) {
            return None;
        }
        let task_id = TaskId::new();
        self.begin(task_id, logged.task_type, &logged.request, logged.task_description);

        if self.config.capture_response_bodies && !logged.response_body.is_empty() {
            let body = self.redactor.body(&logged.response_body).into_owned();
            self.send(StoreCommand::AttachBody {
                id: task_id,
                kind: BodyKind::Response,
                bytes: body,
            });
        }
        let mut response = logged.response;
        if let Some(response) = &mut response {
            self.redactor.response(response);
        }
        let mut metrics = logged.metrics;
        if let Some(metrics) = &mut metrics {
            self.redactor.metrics(metrics);
        }
        self.send(StoreCommand::FinishTask {
            id: task_id,
            completion: TaskCompletion::from_outcome(response, logged.error, metrics),
        });
        Some(task_id)
    }

    /// Finishes every tracked task whose task object was dropped without a
    /// completion callback.
    pub fn sweep_dropped(&self) -> usize {
        let dropped = self.tracker.remove_dropped();
        let count = dropped.len();
        self.finish_evicted(dropped);
        count
    }

    /// Store id of `task`, registering it (and recording its creation) on
    /// first sight. `None` when the task is filtered out, has no request,
    /// or already completed or was evicted.
    fn track(&self, task: &Arc<NetworkTask>) -> Option<TaskId> {
        if let Some(task_id) = self.tracker.task_id(task) {
            return Some(task_id);
        }
        let request = task.original_request()?;
        if !self.filter.allows(request.url.as_deref()) {
            trace!(task = %task.identity(), url = ?request.url, "task filtered out");
            return None;
        }
        let Some(tracked) = self.tracker.track(task, |task_id| {
            self.begin(
                task_id,
                task.task_type(),
                request,
                task.task_description().map(str::to_string),
            );
        }) else {
            trace!(task = %task.identity(), "callback after completion ignored");
            return None;
        };
        self.finish_evicted(tracked.evicted);
        Some(tracked.task_id)
    }

    /// Enqueues task creation followed by the request body.
    fn begin(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        request: &NetworkRequest,
        task_description: Option<String>,
    ) {
        let mut original = request.clone();
        self.redactor.request(&mut original);
        let mut new = NewTask::new(task_id, self.sink.session_id(), task_type, original);
        new.label = Some(self.config.label.clone());
        new.task_description = task_description;
        self.send(StoreCommand::BeginTask(new));

        if !self.config.capture_request_bodies {
            return;
        }
        let Some(body) = &request.body else {
            return;
        };
        match body.read_all() {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => {
                let bytes = self.redactor.body(&bytes).into_owned();
                self.send(StoreCommand::AttachBody {
                    id: task_id,
                    kind: BodyKind::Request,
                    bytes,
                });
            }
            Err(e) => warn!(task = %task_id, error = %e, "failed to read request body"),
        }
    }

    fn complete(&self, task: &Arc<NetworkTask>, error: Option<ResponseError>) {
        if self.track(task).is_none() {
            return;
        }
        let Some(ctx) = self.tracker.remove(task) else {
            return;
        };
        trace!(task = %task.identity(), error = ?error, "did complete");
        self.finish(ctx, Some(task), error);
    }

    fn finish_evicted(&self, evicted: Vec<Evicted>) {
        for Evicted { context, reason } in evicted {
            let description = match reason {
                EvictionReason::Capacity => "Task was evicted from the capture table before completion",
                EvictionReason::Dropped => "Task was released before completion",
            };
            debug!(task = %context.task_id, ?reason, "finishing untracked task");
            let task = context.task.upgrade();
            let error = ResponseError::new(-1, CAPTURE_ERROR_DOMAIN, description);
            self.finish(context, task.as_ref(), Some(error));
        }
    }

    /// Enqueues the response body, then the terminal state.
    fn finish(&self, ctx: TaskContext, task: Option<&Arc<NetworkTask>>, error: Option<ResponseError>) {
        let task_id = ctx.task_id;
        if self.config.capture_response_bodies && !ctx.data.is_empty() {
            let body = self.redactor.body(&ctx.data).into_owned();
            self.send(StoreCommand::AttachBody {
                id: task_id,
                kind: BodyKind::Response,
                bytes: body,
            });
        }

        let mut response = task.and_then(|t| t.response()).or(ctx.response.clone());
        if let Some(response) = &mut response {
            self.redactor.response(response);
        }
        let mut metrics = final_metrics(&ctx);
        if let Some(metrics) = &mut metrics {
            self.redactor.metrics(metrics);
        }
        let mut current_request = task
            .and_then(|t| t.current_request())
            .or(ctx.current_request);
        if let Some(request) = &mut current_request {
            self.redactor.request(request);
        }

        let mut completion = TaskCompletion::from_outcome(response, error, metrics);
        completion.current_request = current_request;
        self.send(StoreCommand::FinishTask {
            id: task_id,
            completion,
        });
    }

    fn send(&self, command: StoreCommand) {
        if let Err(e) = self.sink.enqueue(command) {
            warn!(error = %e, "dropping capture event");
        }
    }
}

/// Metrics describing the redirect hops recorded so far.
fn hop_metrics(ctx: &TaskContext) -> TaskMetrics {
    TaskMetrics {
        task_interval: DateInterval {
            start: ctx.created_at,
            duration: elapsed_secs(ctx),
        },
        redirect_count: ctx.redirect_count,
        transactions: ctx.hops.clone(),
    }
}

/// Metrics reported by the stack, or the recorded hops when it reported
/// none. The redirect count never drops below the hops observed.
fn final_metrics(ctx: &TaskContext) -> Option<TaskMetrics> {
    match &ctx.metrics {
        Some(metrics) => {
            let mut metrics = metrics.clone();
            if metrics.transactions.is_empty() {
                metrics.transactions = ctx.hops.clone();
            }
            metrics.redirect_count = metrics.redirect_count.max(ctx.redirect_count);
            Some(metrics)
        }
        None if ctx.hops.is_empty() => None,
        None => Some(hop_metrics(ctx)),
    }
}

fn elapsed_secs(ctx: &TaskContext) -> f64 {
    (Utc::now() - ctx.created_at).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use spyglass_core::network::RequestBody;
    use spyglass_core::traits::delegate::TaskIdentity;
    use spyglass_core::{SessionId, TaskState};

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        session: SessionId,
        commands: Mutex<Vec<StoreCommand>>,
        closed: bool,
        body_limit: Option<usize>,
    }

    impl EventSink for RecordingSink {
        fn session_id(&self) -> SessionId {
            self.session
        }

        fn enqueue(&self, command: StoreCommand) -> Result<(), SpyglassError> {
            if self.closed {
                return Err(SpyglassError::Internal("store is closed".into()));
            }
            self.commands.lock().unwrap().push(command);
            Ok(())
        }

        fn body_size_limit(&self) -> usize {
            self.body_limit.unwrap_or(usize::MAX)
        }
    }

    impl RecordingSink {
        fn kinds(&self) -> Vec<&'static str> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|c| match c {
                    StoreCommand::AppendMessage(_) => "message",
                    StoreCommand::BeginTask(_) => "begin",
                    StoreCommand::UpdateTask { .. } => "update",
                    StoreCommand::FinishTask { .. } => "finish",
                    StoreCommand::AttachBody { kind: BodyKind::Request, .. } => "request-body",
                    StoreCommand::AttachBody { kind: BodyKind::Response, .. } => "response-body",
                })
                .collect()
        }

        fn completions(&self) -> Vec<(TaskId, TaskCompletion)> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    StoreCommand::FinishTask { id, completion } => Some((*id, completion.clone())),
                    _ => None,
                })
                .collect()
        }

        fn completion(&self) -> TaskCompletion {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .find_map(|c| match c {
                    StoreCommand::FinishTask { completion, .. } => Some(completion.clone()),
                    _ => None,
                })
                .unwrap()
        }
    }

    fn logger(configure: impl FnOnce(&mut CaptureConfig)) -> (Arc<RecordingSink>, NetworkLogger) {
        let sink = Arc::new(RecordingSink::default());
        let mut config = CaptureConfig::default();
        configure(&mut config);
        let logger = NetworkLogger::new(sink.clone(), config).unwrap();
        (sink, logger)
    }

    fn task(identity: u64, request: NetworkRequest) -> Arc<NetworkTask> {
        Arc::new(NetworkTask::new(TaskIdentity(identity), TaskType::Data, Some(request)))
    }

    #[test]
    fn lifecycle_enqueues_in_order() {
        let (sink, logger) = logger(|_| {});
        let request = NetworkRequest::new("https://example.com/upload")
            .with_method("POST")
            .with_body(RequestBody::Data(b"payload".to_vec()));
        let t = task(1, request);
        logger.log_task_created(&t);
        logger.log_response(&t, &NetworkResponse::new(200));
        logger.log_data(&t, b"{\"a\":");
        logger.log_data(&t, b"1}");
        t.set_response(NetworkResponse::new(200));
        logger.log_completion(&t, None);

        assert_eq!(
            sink.kinds(),
            vec!["begin", "request-body", "update", "response-body", "finish"]
        );
        assert_eq!(sink.completion().state, TaskState::Success);
        assert_eq!(logger.tracked_tasks(), 0);
    }

    #[test]
    fn first_callback_registers_unseen_task() {
        let (sink, logger) = logger(|_| {});
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_data(&t, b"x");
        logger.log_completion(&t, None);
        assert_eq!(sink.kinds(), vec!["begin", "response-body", "finish"]);
    }

    #[test]
    fn cancellation_is_a_failure() {
        let (sink, logger) = logger(|_| {});
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_task_created(&t);
        logger.log_completion(&t, Some(&ResponseError::cancelled()));
        let completion = sink.completion();
        assert_eq!(completion.state, TaskState::Failure);
        assert_eq!(completion.error.unwrap().code, -999);
    }

    #[test]
    fn waiting_for_decoding_defers_completion() {
        let (sink, logger) = logger(|c| c.wait_for_decoding = true);
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_task_created(&t);
        logger.log_completion(&t, None);
        assert_eq!(sink.kinds(), vec!["begin"]);
        assert_eq!(logger.tracked_tasks(), 1);

        logger.log_decoding::<(), _>(&t, &Err("missing field `id`"));
        let completion = sink.completion();
        assert_eq!(completion.state, TaskState::Failure);
        let error = completion.error.unwrap();
        assert_eq!(error.domain, DECODING_ERROR_DOMAIN);
        assert!(error.debug_description.contains("missing field"));
    }

    #[test]
    fn transport_failure_completes_without_waiting() {
        let (sink, logger) = logger(|c| c.wait_for_decoding = true);
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_completion(&t, Some(&ResponseError::new(-1009, "NetworkError", "offline")));
        assert_eq!(sink.kinds(), vec!["begin", "finish"]);
    }

    #[test]
    fn filtered_tasks_produce_nothing() {
        let (sink, logger) = logger(|c| c.excluded_hosts = vec!["*.internal".into()]);
        let t = task(1, NetworkRequest::new("https://metrics.internal/push"));
        logger.log_task_created(&t);
        logger.log_data(&t, b"x");
        logger.log_completion(&t, None);
        assert!(sink.kinds().is_empty());
        assert_eq!(logger.tracked_tasks(), 0);
    }

    #[test]
    fn redirects_accumulate_hops() {
        let (sink, logger) = logger(|_| {});
        let t = task(1, NetworkRequest::new("http://example.com/a"));
        logger.log_task_created(&t);
        let moved = NetworkResponse::new(301).with_header("Location", "https://example.com/a");
        let secure = NetworkRequest::new("https://example.com/a");
        logger.log_redirect(&t, &moved, &secure);
        t.set_current_request(secure);
        let found = NetworkResponse::new(302).with_header("Location", "https://example.com/b");
        let next = NetworkRequest::new("https://example.com/b");
        logger.log_redirect(&t, &found, &next);
        t.set_current_request(next);
        logger.log_completion(&t, None);

        let completion = sink.completion();
        let metrics = completion.metrics.unwrap();
        assert_eq!(metrics.redirect_count, 2);
        assert_eq!(metrics.transactions.len(), 2);
        assert_eq!(
            metrics.transactions[1].request.url.as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(
            completion.current_request.and_then(|r| r.url).as_deref(),
            Some("https://example.com/b")
        );
    }

    #[test]
    fn sensitive_values_never_reach_the_sink() {
        let (sink, logger) = logger(|c| {
            c.sensitive_headers = vec!["Authorization".into()];
            c.sensitive_data_fields = vec!["password".into()];
        });
        let request = NetworkRequest::new("https://example.com/login")
            .with_header("Authorization", "Bearer secret")
            .with_body(RequestBody::Data(br#"{"password":"hunter2"}"#.to_vec()));
        let t = task(1, request);
        logger.log_task_created(&t);
        let debug = format!("{:?}", sink.commands.lock().unwrap());
        assert!(!debug.contains("Bearer secret"));
        let commands = sink.commands.lock().unwrap();
        let body = commands
            .iter()
            .find_map(|c| match c {
                StoreCommand::AttachBody { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!String::from_utf8_lossy(&body).contains("hunter2"));
    }

    #[test]
    fn dropped_tasks_are_finished_as_failures() {
        let (sink, logger) = logger(|_| {});
        {
            let t = task(1, NetworkRequest::new("https://example.com"));
            logger.log_task_created(&t);
        }
        assert_eq!(logger.sweep_dropped(), 1);
        let completion = sink.completion();
        assert_eq!(completion.state, TaskState::Failure);
        assert_eq!(completion.error.unwrap().domain, CAPTURE_ERROR_DOMAIN);
    }

    #[test]
    fn log_task_records_a_finished_exchange() {
        let (sink, logger) = logger(|_| {});
        let logged = LoggedTask::new(NetworkRequest::new("https://example.com/users"))
            .with_response(NetworkResponse::new(404), b"not found".to_vec());
        assert!(logger.log_task(logged).is_some());
        assert_eq!(sink.kinds(), vec!["begin", "response-body", "finish"]);
        assert_eq!(sink.completion().state, TaskState::Failure);
    }

    #[test]
    fn log_message_records_caller_location() {
        let (sink, logger) = logger(|_| {});
        logger.log_message(Level::Info, "app", "hello", Metadata::new());
        let commands = sink.commands.lock().unwrap();
        let StoreCommand::AppendMessage(message) = &commands[0] else {
            panic!("expected a message");
        };
        assert_eq!(message.provenance.file, "logger.rs");
        assert!(message.provenance.line > 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn enqueue_failures_are_logged_and_swallowed() {
        let sink = Arc::new(RecordingSink {
            closed: true,
            ..RecordingSink::default()
        });
        let logger = NetworkLogger::new(sink, CaptureConfig::default()).unwrap();
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_task_created(&t);
        logger.log_completion(&t, None);
        assert!(logs_contain("dropping capture event"));
    }

    #[test]
    fn late_completion_of_an_evicted_task_is_ignored() {
        let (sink, logger) = logger(|c| c.max_tracked_tasks = 1);
        let first = task(1, NetworkRequest::new("https://example.com/first"));
        let second = task(2, NetworkRequest::new("https://example.com/second"));
        logger.log_task_created(&first);
        logger.log_task_created(&second);
        let second_id = logger.task_id(&second).unwrap();

        logger.log_data(&first, b"late");
        logger.log_completion(&first, None);
        assert_eq!(logger.task_id(&second), Some(second_id));

        second.set_response(NetworkResponse::new(200));
        logger.log_completion(&second, None);

        assert_eq!(sink.kinds(), vec!["begin", "begin", "finish", "finish"]);
        let completions = sink.completions();
        assert_eq!(completions[0].1.state, TaskState::Failure);
        assert_eq!(completions[0].1.error.as_ref().unwrap().domain, CAPTURE_ERROR_DOMAIN);
        assert_eq!(completions[1].0, second_id);
        assert_eq!(completions[1].1.state, TaskState::Success);
        assert_eq!(logger.tracked_tasks(), 0);
    }

    #[test]
    fn callbacks_after_completion_do_not_reopen_the_task() {
        let (sink, logger) = logger(|_| {});
        let t = task(1, NetworkRequest::new("https://example.com"));
        logger.log_task_created(&t);
        logger.log_completion(&t, None);
        logger.log_progress(&t, 1, 1);
        logger.log_completion(&t, None);
        assert_eq!(sink.kinds(), vec!["begin", "finish"]);
        assert_eq!(logger.tracked_tasks(), 0);
    }

    #[test]
    fn response_bodies_past_the_sink_limit_are_not_buffered() {
        let sink = Arc::new(RecordingSink {
            body_limit: Some(8),
            ..RecordingSink::default()
        });
        let logger = NetworkLogger::new(sink.clone(), CaptureConfig::default()).unwrap();
        let t = task(1, NetworkRequest::new("https://example.com/large"));
        logger.log_data(&t, b"12345");
        logger.log_data(&t, b"67890");
        logger.log_data(&t, b"x");
        logger.tracker.with(&t, |ctx| {
            assert!(ctx.data.is_empty());
            assert!(ctx.data_overflowed);
        });
        logger.log_completion(&t, None);
        assert_eq!(sink.kinds(), vec!["begin", "finish"]);

        let small = task(2, NetworkRequest::new("https://example.com/small"));
        logger.log_data(&small, b"12345678");
        logger.log_completion(&small, None);
        assert_eq!(sink.kinds()[2..], ["begin", "response-body", "finish"]);
    }

    #[test]
    fn invalid_patterns_are_config_errors() {
        let sink = Arc::new(RecordingSink::default());
        let config = CaptureConfig {
            regex: true,
            excluded_urls: vec!["(".into()],
            ..CaptureConfig::default()
        };
        let err = NetworkLogger::new(sink, config).unwrap_err();
        assert!(matches!(err, SpyglassError::Config(_)));
    }
}
