// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sample networking values for tests.

use std::sync::Arc;

use chrono::{Duration, Utc};
use spyglass_core::TaskType;
use spyglass_core::network::{
    DateInterval, FetchType, NetworkRequest, NetworkResponse, RequestBody, TaskMetrics,
    TransactionMetrics, TransactionTiming, TransferSize,
};
use spyglass_core::traits::delegate::{NetworkTask, TaskIdentity};

/// A GET data task for `url`.
pub fn data_task(identity: u64, url: &str) -> Arc<NetworkTask> {
    Arc::new(NetworkTask::new(
        TaskIdentity(identity),
        TaskType::Data,
        Some(NetworkRequest::new(url)),
    ))
}

/// A POST upload task carrying `body` inline.
pub fn upload_task(identity: u64, url: &str, body: Vec<u8>) -> Arc<NetworkTask> {
    let request = NetworkRequest::new(url)
        .with_method("POST")
        .with_header("Content-Type", "application/json")
        .with_body(RequestBody::Data(body));
    Arc::new(NetworkTask::new(
        TaskIdentity(identity),
        TaskType::Upload,
        Some(request),
    ))
}

/// A download task for `url`.
pub fn download_task(identity: u64, url: &str) -> Arc<NetworkTask> {
    Arc::new(NetworkTask::new(
        TaskIdentity(identity),
        TaskType::Download,
        Some(NetworkRequest::new(url)),
    ))
}

/// A JSON response head with the given status.
pub fn json_response(status: i32) -> NetworkResponse {
    NetworkResponse::new(status)
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_header("Cache-Control", "no-store")
}

/// A redirect response pointing at `location`.
pub fn redirect_response(status: i32, location: &str) -> NetworkResponse {
    NetworkResponse::new(status).with_header("Location", location)
}

/// A JSON array body of exactly `len` bytes (`len >= 2`).
pub fn json_body(len: usize) -> Vec<u8> {
    let len = len.max(2);
    let mut body = Vec::with_capacity(len);
    body.push(b'[');
    let mut value = 0u32;
    while body.len() < len - 1 {
        let item = if body.len() == 1 {
            format!("{value}")
        } else {
            format!(",{value}")
        };
        if body.len() + item.len() > len - 1 {
            break;
        }
        body.extend_from_slice(item.as_bytes());
        value += 1;
    }
    while body.len() < len - 1 {
        body.push(b' ');
    }
    body.push(b']');
    body
}

/// JSON `{"users":[...]}` listing `count` users.
pub fn users_body(count: usize) -> Vec<u8> {
    let users: Vec<serde_json::Value> = (0..count)
        .map(|i| serde_json::json!({ "id": i, "name": format!("user{i}"), "password": "hunter2" }))
        .collect();
    serde_json::to_vec(&serde_json::json!({ "users": users })).unwrap_or_default()
}

/// Metrics of a single network load of `request` answered with `response`.
pub fn metrics_for(request: &NetworkRequest, response: &NetworkResponse, body_len: i64) -> TaskMetrics {
    let start = Utc::now() - Duration::milliseconds(250);
    let mut transaction = TransactionMetrics::new(FetchType::NetworkLoad, request.clone());
    transaction.response = Some(response.clone());
    transaction.network_protocol = Some("h2".to_string());
    transaction.timing = TransactionTiming {
        fetch_start: Some(start),
        domain_lookup_start: Some(start),
        domain_lookup_end: Some(start + Duration::milliseconds(20)),
        connect_start: Some(start + Duration::milliseconds(20)),
        connect_end: Some(start + Duration::milliseconds(80)),
        request_start: Some(start + Duration::milliseconds(80)),
        request_end: Some(start + Duration::milliseconds(90)),
        response_start: Some(start + Duration::milliseconds(200)),
        response_end: Some(start + Duration::milliseconds(250)),
        ..TransactionTiming::default()
    };
    transaction.transfer_size = TransferSize {
        request_header_bytes_sent: 120,
        response_header_bytes_received: 310,
        response_body_bytes_received: body_len,
        response_body_bytes_after_decoding: body_len,
        ..TransferSize::default()
    };
    TaskMetrics {
        task_interval: DateInterval {
            start,
            duration: 0.25,
        },
        redirect_count: 0,
        transactions: vec![transaction],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_has_exact_length_and_parses() {
        for len in [2, 3, 17, 512, 4096] {
            let body = json_body(len);
            assert_eq!(body.len(), len);
            let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert!(parsed.is_array());
        }
    }

    #[test]
    fn metrics_fixture_is_a_single_network_load() {
        let request = NetworkRequest::new("https://api.example.com/users");
        let metrics = metrics_for(&request, &json_response(200), 512);
        assert_eq!(metrics.transactions.len(), 1);
        assert_eq!(metrics.total_transfer_size().response_body_bytes_received, 512);
        assert!(!metrics.is_from_cache());
    }
}
