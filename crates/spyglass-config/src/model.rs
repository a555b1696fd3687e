// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Spyglass capture engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level Spyglass configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SpyglassConfig {
    /// Store location, retention and blob settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Network capture settings.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Diagnostic log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store location, retention and Content Store settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store directory holding `logs.sqlite`, `blobs/` and `manifest.json`.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Size above which the retention sweep trims messages, in bytes.
    #[serde(default = "default_size_limit")]
    pub size_limit: u64,

    /// Fraction of `size_limit` the blob store may occupy.
    #[serde(default = "default_ratio")]
    pub expected_blob_ratio: f64,

    /// Fraction of data kept when a sweep has to trim.
    #[serde(default = "default_ratio")]
    pub trim_ratio: f64,

    /// Sessions older than this are removed by the sweep.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Minimum time between automatic sweeps on open.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Payloads up to this size are kept inside the database.
    #[serde(default = "default_inline_limit")]
    pub inline_limit: usize,

    #[serde(default = "default_true")]
    pub blob_compression: bool,

    /// Bodies larger than this are not captured.
    #[serde(default = "default_body_size_limit")]
    pub response_body_size_limit: usize,

    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Commands buffered ahead of the writer before fire-and-forget
    /// enqueues start being dropped.
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            size_limit: default_size_limit(),
            expected_blob_ratio: default_ratio(),
            trim_ratio: default_ratio(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            inline_limit: default_inline_limit(),
            blob_compression: true,
            response_body_size_limit: default_body_size_limit(),
            wal_mode: true,
            write_queue_capacity: default_write_queue_capacity(),
        }
    }
}

impl StoreConfig {
    /// Blob store budget derived from `size_limit` and `expected_blob_ratio`.
    pub fn blob_size_limit(&self) -> u64 {
        (self.size_limit as f64 * self.expected_blob_ratio) as u64
    }
}

fn default_store_path() -> String {
    dirs::data_local_dir()
        .map(|d| d.join("spyglass").join("store"))
        .unwrap_or_else(|| PathBuf::from("spyglass-store"))
        .display()
        .to_string()
}

fn default_size_limit() -> u64 {
    256 * 1024 * 1024
}

fn default_ratio() -> f64 {
    0.7
}

fn default_max_age_secs() -> u64 {
    14 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_inline_limit() -> usize {
    16 * 1024
}

fn default_body_size_limit() -> usize {
    8 * 1024 * 1024
}

fn default_write_queue_capacity() -> usize {
    65_536
}

fn default_true() -> bool {
    true
}

/// Network capture configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Label of the messages linked to captured tasks.
    #[serde(default = "default_label")]
    pub label: String,

    /// Hold task completion until the caller reports the decoding outcome.
    #[serde(default)]
    pub wait_for_decoding: bool,

    /// Cap on tasks tracked at once; the oldest is evicted beyond it.
    #[serde(default = "default_max_tracked_tasks")]
    pub max_tracked_tasks: usize,

    #[serde(default)]
    pub included_hosts: Vec<String>,

    #[serde(default)]
    pub excluded_hosts: Vec<String>,

    #[serde(default)]
    pub included_urls: Vec<String>,

    #[serde(default)]
    pub excluded_urls: Vec<String>,

    /// Treat host and URL patterns as regular expressions instead of
    /// wildcards (`*`, `?`).
    #[serde(default)]
    pub regex: bool,

    /// Header names whose values are replaced with `<private>`. Case-insensitive.
    #[serde(default)]
    pub sensitive_headers: Vec<String>,

    /// Query item names whose values are replaced with `<private>`.
    #[serde(default)]
    pub sensitive_query_items: Vec<String>,

    /// JSON body fields whose values are replaced with `<private>`.
    #[serde(default)]
    pub sensitive_data_fields: Vec<String>,

    #[serde(default = "default_true")]
    pub capture_request_bodies: bool,

    #[serde(default = "default_true")]
    pub capture_response_bodies: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            wait_for_decoding: false,
            max_tracked_tasks: default_max_tracked_tasks(),
            included_hosts: Vec::new(),
            excluded_hosts: Vec::new(),
            included_urls: Vec::new(),
            excluded_urls: Vec::new(),
            regex: false,
            sensitive_headers: Vec::new(),
            sensitive_query_items: Vec::new(),
            sensitive_data_fields: Vec::new(),
            capture_request_bodies: true,
            capture_response_bodies: true,
        }
    }
}

fn default_label() -> String {
    "network".to_string()
}

fn default_max_tracked_tasks() -> usize {
    4096
}

/// Diagnostic log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
