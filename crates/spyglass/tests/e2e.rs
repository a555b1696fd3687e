// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the `spyglass` binary.
//!
//! Each test captures traffic into an isolated TestHarness store, closes it,
//! and then drives the compiled binary against the store directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use spyglass_capture::{NetworkLogger, ProxyDelegate};
use spyglass_core::traits::delegate::SessionDelegate;
use spyglass_core::types::Metadata;
use spyglass_core::{EventSink, Level};
use spyglass_test_utils::TestHarness;
use spyglass_test_utils::fixtures::{data_task, json_body, json_response};

fn spyglass() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_spyglass"))
}

/// Runs the binary with an empty configuration file so host settings do
/// not leak into the test.
fn run(harness: &TestHarness, args: &[&str]) -> Output {
    let config = harness.scratch_path("spyglass.toml");
    if !config.exists() {
        std::fs::write(&config, "").unwrap();
    }
    Command::new(spyglass())
        .arg("--config")
        .arg(&config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn run_ok(harness: &TestHarness, args: &[&str]) -> String {
    let output = run(harness, args);
    assert!(
        output.status.success(),
        "spyglass {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

/// Records two successful tasks sharing one body, a failed one and a few
/// messages, then closes the store.
async fn populated() -> TestHarness {
    let harness = TestHarness::new().await.unwrap();
    let sink: Arc<dyn EventSink> = Arc::new(harness.store.clone());
    let logger = Arc::new(NetworkLogger::new(sink, harness.config.capture.clone()).unwrap());
    let proxy = ProxyDelegate::new(Arc::clone(&logger), None);

    let body = json_body(40_000);
    for (identity, url, status) in [
        (1, "https://api.example.com/users", 200),
        (2, "https://api.example.com/users?page=2", 200),
        (3, "https://cdn.example.com/missing.png", 404),
    ] {
        let task = data_task(identity, url);
        let lifecycle = proxy.as_lifecycle().unwrap();
        lifecycle.did_create_task(&task);
        task.set_response(json_response(status));
        proxy.as_data().unwrap().did_receive_data(&task, &body);
        lifecycle.did_complete(&task, None);
    }
    logger.log_message(Level::Error, "auth", "token expired", Metadata::new());
    logger.log_message(Level::Info, "auth", "signed in", Metadata::new());

    harness.store.flush().await.unwrap();
    harness.store.clone().close().await.unwrap();
    harness
}

#[tokio::test]
async fn info_reports_counts_as_json() {
    let harness = populated().await;
    let out = run_ok(&harness, &["--store", path(harness.store_dir()), "info", "--json"]);
    let info: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(info["task_count"], 3);
    // Three network messages plus two logged by hand.
    assert_eq!(info["message_count"], 5);
    assert_eq!(info["blob_count"], 1);
    assert_eq!(info["sessions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn query_filters_tasks_and_messages() {
    let harness = populated().await;
    let store = path(harness.store_dir());

    let out = run_ok(
        &harness,
        &["--store", store, "query", "tasks", "--state", "failure", "--json"],
    );
    let lines: Vec<serde_json::Value> = out
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["status_code"], 404);

    let out = run_ok(
        &harness,
        &["--store", store, "query", "messages", "--label", "auth", "--level", "error"],
    );
    assert_eq!(out.lines().count(), 1);
    assert!(out.contains("token expired"));
}

#[tokio::test]
async fn export_then_import_into_a_fresh_store() {
    let harness = populated().await;
    let archive = harness.scratch_path("capture.spyglass");
    let fresh = harness.scratch_path("fresh");

    run_ok(
        &harness,
        &["--store", path(harness.store_dir()), "export", path(&archive)],
    );
    assert!(archive.exists());

    run_ok(&harness, &["--store", path(&fresh), "import", path(&archive)]);
    let out = run_ok(&harness, &["--store", path(&fresh), "info", "--json"]);
    let info: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(info["task_count"], 3);
    assert_eq!(info["message_count"], 5);
    assert_eq!(info["blob_count"], 1);

    // Importing the same archive again copies nothing new.
    run_ok(&harness, &["--store", path(&fresh), "import", path(&archive)]);
    let out = run_ok(&harness, &["--store", path(&fresh), "info", "--json"]);
    let again: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(again["task_count"], 3);
}

#[tokio::test]
async fn export_refuses_to_overwrite() {
    let harness = populated().await;
    let archive = harness.scratch_path("taken.spyglass");
    std::fs::write(&archive, b"keep me").unwrap();

    let output = run(
        &harness,
        &["--store", path(harness.store_dir()), "export", path(&archive)],
    );
    assert!(!output.status.success());
    assert_eq!(std::fs::read(&archive).unwrap(), b"keep me");
}

#[tokio::test]
async fn import_rejects_a_non_archive() {
    let harness = populated().await;
    let bogus = harness.scratch_path("bogus.spyglass");
    std::fs::write(&bogus, b"definitely not an archive").unwrap();

    let output = run(
        &harness,
        &["--store", path(harness.store_dir()), "import", path(&bogus)],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("spyglass:"));
}

#[tokio::test]
async fn missing_store_is_an_error_for_readers() {
    let harness = TestHarness::new().await.unwrap();
    let nowhere = harness.scratch_path("nowhere");
    let output = run(&harness, &["--store", path(&nowhere), "info"]);
    assert!(!output.status.success());
    assert!(!nowhere.exists());
}

#[tokio::test]
async fn remove_all_then_sweep_leaves_an_empty_store() {
    let harness = populated().await;
    let store = path(harness.store_dir());

    run_ok(&harness, &["--store", store, "remove", "--all"]);
    run_ok(&harness, &["--store", store, "sweep"]);
    let out = run_ok(&harness, &["--store", store, "info", "--json"]);
    let info: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(info["task_count"], 0);
    assert_eq!(info["message_count"], 0);
    assert_eq!(info["blob_count"], 0);
}

#[tokio::test]
async fn invalid_config_is_reported() {
    let harness = TestHarness::new().await.unwrap();
    let config = harness.scratch_path("broken.toml");
    std::fs::write(&config, "[store]\ntrim_ratoi = 0.5\n").unwrap();

    let output = Command::new(spyglass())
        .arg("--config")
        .arg(&config)
        .args(["--store", path(harness.store_dir()), "info"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("trim_ratio"));
}
