// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network capture for the Spyglass capture engine.
//!
//! [`NetworkLogger`] converts networking lifecycle callbacks into store
//! commands, applying the configured host/URL filters and redaction.
//! [`ProxyDelegate`] wraps an application's own session delegate so every
//! callback is observed without changing what the application sees.
//! [`StoreLayer`] records the application's `tracing` events as messages.
//!
//! ```ignore
//! let logger = Arc::new(NetworkLogger::new(store.clone(), config.capture.clone())?);
//! let delegate = ProxyDelegate::new(logger, Some(app_delegate));
//! ```

pub mod bridge;
pub mod filter;
pub mod logger;
pub mod proxy;
pub mod redact;
pub mod tracker;

pub use bridge::StoreLayer;
pub use filter::CaptureFilter;
pub use logger::{LoggedTask, NetworkLogger};
pub use proxy::ProxyDelegate;
pub use redact::Redactor;
