// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Spyglass integration tests.
//!
//! Provides a temporary-store harness, network fixtures, and a recording
//! session delegate for fast, deterministic tests without a real
//! networking stack.
//!
//! # Components
//!
//! - [`TestHarness`] - A store in a temporary directory, removed on drop
//! - [`RecordingDelegate`] - A session delegate with a chosen capability set
//!   that records every callback it receives
//! - [`fixtures`] - Sample tasks, responses, bodies and metrics

pub mod fixtures;
pub mod harness;
pub mod recording_delegate;

pub use harness::TestHarness;
pub use recording_delegate::{DelegateCall, RecordingDelegate};
