// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` opens a file-backed store in a temporary directory with
//! the retention sweep disabled, so tests control exactly what the store
//! holds. The directory is removed when the harness is dropped.

use std::path::{Path, PathBuf};

use spyglass_config::model::{CaptureConfig, SpyglassConfig, StoreConfig};
use spyglass_core::SpyglassError;
use spyglass_core::types::AppInfo;
use spyglass_storage::{LogStore, StoreOptions};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    store: StoreConfig,
    capture: CaptureConfig,
    app: AppInfo,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            store: StoreConfig::default(),
            capture: CaptureConfig::default(),
            app: AppInfo {
                name: Some("spyglass-tests".to_string()),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                build: None,
            },
        }
    }

    /// Replace the store settings.
    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Keep payloads up to `limit` bytes inside the database.
    pub fn with_inline_limit(mut self, limit: usize) -> Self {
        self.store.inline_limit = limit;
        self
    }

    /// Capture settings handed to loggers built on top of the harness.
    pub fn with_capture_config(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }

    /// Build the harness, creating and opening the store.
    pub async fn build(self) -> Result<TestHarness, SpyglassError> {
        let temp_dir = tempfile::TempDir::new()?;
        let store_dir = temp_dir.path().join("store");
        let mut store_config = self.store;
        store_config.path = store_dir.display().to_string();

        let store = LogStore::open(&store_dir, &store_config, options(&self.app)).await?;
        let config = SpyglassConfig {
            store: store_config,
            capture: self.capture,
            ..SpyglassConfig::default()
        };

        Ok(TestHarness {
            store,
            config,
            app: self.app,
            store_dir,
            temp_dir,
        })
    }
}

fn options(app: &AppInfo) -> StoreOptions {
    StoreOptions {
        sweep: false,
        app: app.clone(),
        ..StoreOptions::default()
    }
}

/// A store in a temporary directory plus the configuration it was opened with.
pub struct TestHarness {
    /// The open store.
    pub store: LogStore,
    /// Configuration with `store.path` pointing at the temporary store.
    pub config: SpyglassConfig,
    app: AppInfo,
    store_dir: PathBuf,
    /// Temp directory kept alive for cleanup on drop.
    temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default settings.
    pub async fn new() -> Result<Self, SpyglassError> {
        Self::builder().build().await
    }

    /// Directory of the store.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// A path inside the temporary directory that does not exist yet.
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Closes the store and opens it again, as a new process run would.
    /// Tasks left pending are reconciled by the reopen.
    pub async fn restart(&mut self) -> Result<(), SpyglassError> {
        self.store.clone().close().await?;
        self.store = LogStore::open(&self.store_dir, &self.config.store, options(&self.app)).await?;
        Ok(())
    }
}
