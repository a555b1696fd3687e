// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end capture tests: a proxy delegate driven the way a networking
//! stack drives it, writing into a real store.

use std::path::Path;
use std::sync::Arc;

use spyglass_capture::proxy::intercepted;
use spyglass_capture::{LoggedTask, NetworkLogger, ProxyDelegate, StoreLayer};
use spyglass_config::model::CaptureConfig;
use spyglass_core::network::{NetworkRequest, ResponseError};
use spyglass_core::traits::delegate::{
    Capabilities, Capability, NetworkTask, ResponseDisposition, SessionDelegate, TaskIdentity,
};
use spyglass_core::types::{MessageRecord, TaskRecord};
use spyglass_core::{BodyKind, EventSink, Level, TaskId, TaskState, TaskType};
use spyglass_storage::{BodyState, LogStore, MessageField, Predicate, Query, TaskField};
use spyglass_test_utils::fixtures::{
    data_task, download_task, json_body, json_response, metrics_for, redirect_response,
    upload_task, users_body,
};
use spyglass_test_utils::{DelegateCall, RecordingDelegate, TestHarness};
use tracing_subscriber::layer::SubscriberExt;

fn logger(store: &LogStore, config: CaptureConfig) -> Arc<NetworkLogger> {
    let sink: Arc<dyn EventSink> = Arc::new(store.clone());
    Arc::new(NetworkLogger::new(sink, config).unwrap())
}

fn proxy(store: &LogStore, wrapped: Option<Arc<dyn SessionDelegate>>) -> ProxyDelegate {
    ProxyDelegate::new(logger(store, CaptureConfig::default()), wrapped)
}

/// Drives a successful data task through the proxy the way the stack would.
fn run_success(proxy: &ProxyDelegate, task: &Arc<NetworkTask>, body: &[u8]) -> TaskId {
    let lifecycle = proxy.as_lifecycle().unwrap();
    lifecycle.did_create_task(task);
    let task_id = proxy.logger().task_id(task).unwrap();
    let response = json_response(200);
    task.set_response(response.clone());
    if let Some(r) = proxy.as_response() {
        r.did_receive_response(task, &response);
    }
    let data = proxy.as_data().unwrap();
    for chunk in body.chunks(100) {
        data.did_receive_data(task, chunk);
    }
    let request = task.original_request().cloned().unwrap();
    proxy
        .as_metrics()
        .unwrap()
        .did_finish_collecting_metrics(task, &metrics_for(&request, &response, body.len() as i64));
    lifecycle.did_complete(task, None);
    task_id
}

async fn stored(store: &LogStore, id: TaskId) -> TaskRecord {
    store.flush().await.unwrap();
    store.task(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn proxy_advertises_wrapped_groups_plus_its_own() {
    let harness = TestHarness::new().await.unwrap();
    let wrapped_caps = Capabilities::empty()
        .with(Capability::Data)
        .with(Capability::Response);
    let wrapped: Arc<dyn SessionDelegate> = Arc::new(RecordingDelegate::new(wrapped_caps));
    let with_response = proxy(&harness.store, Some(wrapped));
    assert_eq!(with_response.capabilities(), intercepted() | wrapped_caps);
    assert!(with_response.responds_to(Capability::Response));
    assert_eq!(with_response.forwarded(), wrapped_caps);

    let bare = proxy(&harness.store, None);
    assert_eq!(bare.capabilities(), intercepted());
    assert!(!bare.responds_to(Capability::Response));
    assert!(bare.as_response().is_none());
}

#[tokio::test]
async fn callbacks_reach_only_the_groups_the_wrapped_delegate_has() {
    let harness = TestHarness::new().await.unwrap();
    let recorder = Arc::new(RecordingDelegate::new(
        Capabilities::empty().with(Capability::Data),
    ));
    let proxy = proxy(&harness.store, Some(recorder.clone()));
    let task = data_task(1, "https://api.example.com/users");
    let body = json_body(250);
    let id = run_success(&proxy, &task, &body);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls
        .iter()
        .all(|c| matches!(c, DelegateCall::Data { task: TaskIdentity(1), .. })));

    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.response_body_size, 250);
}

#[tokio::test]
async fn fully_capable_delegate_sees_every_callback() {
    let harness = TestHarness::new().await.unwrap();
    let recorder = Arc::new(RecordingDelegate::full().with_disposition(ResponseDisposition::BecomeDownload));
    let proxy = proxy(&harness.store, Some(recorder.clone()));
    let task = data_task(2, "https://api.example.com/feed");

    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let disposition = proxy
        .as_response()
        .unwrap()
        .did_receive_response(&task, &json_response(200));
    assert_eq!(disposition, ResponseDisposition::BecomeDownload);
    proxy.as_data().unwrap().did_receive_data(&task, b"[]");
    proxy.as_lifecycle().unwrap().did_complete(&task, None);

    let calls = recorder.calls();
    assert_eq!(calls[0], DelegateCall::Created(TaskIdentity(2)));
    assert_eq!(
        calls[1],
        DelegateCall::Response {
            task: TaskIdentity(2),
            status: Some(200)
        }
    );
    assert_eq!(
        calls.last(),
        Some(&DelegateCall::Completed {
            task: TaskIdentity(2),
            error: None
        })
    );
}

#[tokio::test]
async fn captured_body_is_stored_verbatim() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);
    let task = data_task(3, "https://api.example.com/users");
    let body = json_body(512);
    let id = run_success(&proxy, &task, &body);

    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.status_code, Some(200));
    assert_eq!(record.host.as_deref(), Some("api.example.com"));
    assert_eq!(record.label.as_deref(), Some("network"));
    assert_eq!(
        harness.store.body(id, BodyKind::Response).await.unwrap(),
        BodyState::Available(body)
    );
    assert_eq!(proxy.logger().tracked_tasks(), 0);
}

#[tokio::test]
async fn binary_and_empty_bodies_are_tolerated() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);

    let binary: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    let id = run_success(&proxy, &data_task(4, "https://cdn.example.com/blob"), &binary);
    assert_eq!(
        harness.store.body(id, BodyKind::Response).await.unwrap(),
        BodyState::Available(binary)
    );

    let empty = run_success(&proxy, &data_task(5, "https://cdn.example.com/empty"), &[]);
    let record = stored(&harness.store, empty).await;
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(
        harness.store.body(empty, BodyKind::Response).await.unwrap(),
        BodyState::Absent
    );
}

#[tokio::test]
async fn cancelled_task_is_finished_as_failure() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);
    let task = data_task(6, "https://api.example.com/slow");
    let lifecycle = proxy.as_lifecycle().unwrap();
    lifecycle.did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();
    lifecycle.did_complete(&task, Some(&ResponseError::cancelled()));

    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.error.map(|e| e.code), Some(-999));
}

#[tokio::test]
async fn task_without_completion_fails_after_restart() {
    let mut harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);
    let task = data_task(7, "https://api.example.com/never");
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();
    harness.store.flush().await.unwrap();
    assert_eq!(
        harness.store.task(id).await.unwrap().unwrap().state,
        TaskState::Pending
    );

    drop(proxy);
    harness.restart().await.unwrap();
    let record = harness.store.task(id).await.unwrap().unwrap();
    assert_eq!(record.state, TaskState::Failure);
}

#[tokio::test]
async fn redirect_hops_are_queryable_transactions() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);
    let task = data_task(8, "http://example.com/old");
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();

    let redirect = proxy.as_redirect().unwrap();
    let hop = redirect.will_perform_redirection(
        &task,
        &redirect_response(301, "https://example.com/old"),
        NetworkRequest::new("https://example.com/old"),
    );
    let hop = hop.unwrap();
    task.set_current_request(hop.clone());
    let hop = redirect
        .will_perform_redirection(
            &task,
            &redirect_response(302, "https://example.com/new"),
            NetworkRequest::new("https://example.com/new"),
        )
        .unwrap();
    task.set_current_request(hop);
    task.set_response(json_response(200));
    proxy.as_data().unwrap().did_receive_data(&task, b"{}");
    proxy.as_lifecycle().unwrap().did_complete(&task, None);

    let record = stored(&harness.store, id).await;
    assert_eq!(record.redirect_count, 2);
    assert_eq!(
        record.current_request.and_then(|r| r.url).as_deref(),
        Some("https://example.com/new")
    );
    let transactions = harness.store.transactions(id).await.unwrap();
    let statuses: Vec<Option<i32>> = transactions
        .iter()
        .map(|t| t.response.as_ref().and_then(|r| r.status_code))
        .collect();
    assert_eq!(statuses, vec![Some(301), Some(302)]);
}

#[tokio::test]
async fn refused_redirect_is_not_a_hop() {
    let harness = TestHarness::new().await.unwrap();
    let recorder = Arc::new(RecordingDelegate::full().refusing_redirects());
    let proxy = proxy(&harness.store, Some(recorder.clone()));
    let task = data_task(9, "https://example.com/moved");
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();

    let decision = proxy.as_redirect().unwrap().will_perform_redirection(
        &task,
        &redirect_response(302, "https://elsewhere.example.com/"),
        NetworkRequest::new("https://elsewhere.example.com/"),
    );
    assert!(decision.is_none());
    task.set_response(redirect_response(302, "https://elsewhere.example.com/"));
    proxy.as_lifecycle().unwrap().did_complete(&task, None);

    let record = stored(&harness.store, id).await;
    assert_eq!(record.redirect_count, 0);
    assert_eq!(record.status_code, Some(302));
    assert!(recorder
        .calls()
        .iter()
        .any(|c| matches!(c, DelegateCall::Redirect { .. })));
}

#[tokio::test]
async fn upload_records_request_body_and_progress() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = proxy(&harness.store, None);
    let body = users_body(3);
    let task = upload_task(10, "https://api.example.com/users", body.clone());
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();
    let total = body.len() as i64;
    proxy
        .as_upload()
        .unwrap()
        .did_send_body_data(&task, total / 2, total / 2, total);
    harness.store.flush().await.unwrap();
    let progress = harness.store.task(id).await.unwrap().unwrap().progress;
    assert_eq!(progress.map(|p| (p.completed, p.total)), Some((total / 2, total)));

    task.set_response(json_response(201));
    proxy.as_lifecycle().unwrap().did_complete(&task, None);
    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.request_body_size, total);
    assert_eq!(
        harness.store.body(id, BodyKind::Request).await.unwrap(),
        BodyState::Available(body)
    );
}

#[tokio::test]
async fn download_progress_is_forwarded_and_recorded() {
    let harness = TestHarness::new().await.unwrap();
    let recorder = Arc::new(RecordingDelegate::new(
        Capabilities::empty().with(Capability::Download),
    ));
    let proxy = proxy(&harness.store, Some(recorder.clone()));
    let task = download_task(11, "https://cdn.example.com/archive.zip");
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    let id = proxy.logger().task_id(&task).unwrap();

    let download = proxy.as_download().unwrap();
    download.did_write_data(&task, 1024, 1024, 4096);
    download.did_finish_downloading(&task, Path::new("/tmp/archive.zip"));
    harness.store.flush().await.unwrap();
    let record = harness.store.task(id).await.unwrap().unwrap();
    assert_eq!(record.progress.map(|p| p.completed), Some(1024));
    assert_eq!(
        recorder.calls(),
        vec![
            DelegateCall::WroteData {
                task: TaskIdentity(11),
                total: 1024
            },
            DelegateCall::FinishedDownloading {
                task: TaskIdentity(11),
                location: "/tmp/archive.zip".into()
            },
        ]
    );
}

#[tokio::test]
async fn redaction_applies_before_storage() {
    let harness = TestHarness::new().await.unwrap();
    let config = CaptureConfig {
        sensitive_headers: vec!["Authorization".into()],
        sensitive_query_items: vec!["api_key".into()],
        sensitive_data_fields: vec!["password".into()],
        ..CaptureConfig::default()
    };
    let proxy = ProxyDelegate::new(logger(&harness.store, config), None);
    let body = users_body(2);
    let request = NetworkRequest::new("https://api.example.com/users?api_key=k3y&page=1")
        .with_method("GET")
        .with_header("Authorization", "Bearer t0ken");
    let task = Arc::new(NetworkTask::new(
        TaskIdentity(12),
        TaskType::Data,
        Some(request),
    ));
    let id = run_success(&proxy, &task, &body);

    let record = stored(&harness.store, id).await;
    assert_eq!(record.original_request.headers["Authorization"], "<private>");
    let url = record.original_request.url.unwrap();
    assert!(!url.contains("k3y"));
    assert!(url.contains("page=1"));
    let BodyState::Available(stored_body) = harness.store.body(id, BodyKind::Response).await.unwrap()
    else {
        panic!("expected a stored body");
    };
    let text = String::from_utf8(stored_body).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(text.contains("user1"));
}

#[tokio::test]
async fn excluded_hosts_are_not_recorded() {
    let harness = TestHarness::new().await.unwrap();
    let config = CaptureConfig {
        excluded_hosts: vec!["*.analytics.example.com".into()],
        ..CaptureConfig::default()
    };
    let proxy = ProxyDelegate::new(logger(&harness.store, config), None);
    let task = data_task(13, "https://eu.analytics.example.com/collect");
    proxy.as_lifecycle().unwrap().did_create_task(&task);
    assert!(proxy.logger().task_id(&task).is_none());
    proxy.as_lifecycle().unwrap().did_complete(&task, None);
    harness.store.flush().await.unwrap();
    assert_eq!(harness.store.count::<TaskRecord>(Predicate::True).await.unwrap(), 0);
}

#[tokio::test]
async fn decoding_failure_fails_the_task() {
    let harness = TestHarness::new().await.unwrap();
    let config = CaptureConfig {
        wait_for_decoding: true,
        ..CaptureConfig::default()
    };
    let logger = logger(&harness.store, config);
    let proxy = ProxyDelegate::new(logger.clone(), None);
    let task = data_task(14, "https://api.example.com/repo");
    let id = run_success(&proxy, &task, br#"{"id":1296269}"#);
    harness.store.flush().await.unwrap();
    assert_eq!(
        harness.store.task(id).await.unwrap().unwrap().state,
        TaskState::Pending
    );

    let decoded = serde_json::from_slice::<Vec<String>>(br#"{"id":1296269}"#);
    logger.log_decoding(&task, &decoded);
    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.status_code, Some(200));
}

#[tokio::test]
async fn concurrent_tasks_are_all_recorded() {
    let harness = TestHarness::new().await.unwrap();
    let proxy = Arc::new(proxy(&harness.store, None));
    let threads: Vec<_> = (0..8u64)
        .map(|worker| {
            let proxy = Arc::clone(&proxy);
            std::thread::spawn(move || {
                for i in 0..10u64 {
                    let identity = worker * 100 + i;
                    let task = data_task(identity, &format!("https://api.example.com/{identity}"));
                    run_success(&proxy, &task, &json_body(64));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    harness.store.flush().await.unwrap();

    let succeeded = harness
        .store
        .count::<TaskRecord>(Predicate::eq(TaskField::State, TaskState::Success))
        .await
        .unwrap();
    assert_eq!(succeeded, 80);
    let pending = harness
        .store
        .fetch(Query::<TaskRecord>::new().filter(Predicate::eq(TaskField::State, TaskState::Pending)))
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn manual_log_task_records_an_exchange() {
    let harness = TestHarness::new().await.unwrap();
    let logger = logger(&harness.store, CaptureConfig::default());
    let request = NetworkRequest::new("https://api.example.com/users");
    let response = json_response(500);
    let logged = LoggedTask::new(request.clone())
        .with_response(response.clone(), b"{\"error\":true}".to_vec())
        .with_metrics(metrics_for(&request, &response, 14));
    let id = logger.log_task(logged).unwrap();

    let record = stored(&harness.store, id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.status_code, Some(500));
    assert_eq!(record.response_body_size, 14);
    assert_eq!(harness.store.transactions(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn tracing_events_are_stored_as_messages() {
    let harness = TestHarness::new().await.unwrap();
    let sink: Arc<dyn EventSink> = Arc::new(harness.store.clone());
    let subscriber = tracing_subscriber::registry().with(StoreLayer::new(sink));
    tracing::subscriber::with_default(subscriber, || {
        tracing::error!(target: "payments", order = 42, "charge declined");
    });
    harness.store.flush().await.unwrap();

    let messages = harness
        .store
        .fetch(Query::<MessageRecord>::new().filter(Predicate::eq(MessageField::Label, "payments")))
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, Level::Error);
    assert_eq!(messages[0].text, "charge declined");
    assert_eq!(messages[0].metadata.get("order"), Some("42"));
    assert_eq!(messages[0].session_id, harness.store.session_id());
}
