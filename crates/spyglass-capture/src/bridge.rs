// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `tracing` layer that records application log events as store messages.
//!
//! Each event becomes a [`StoreCommand::AppendMessage`]: the event level maps
//! onto [`Level`], the target becomes the label, the `message` field becomes
//! the text and every other field lands in the metadata. Events emitted by
//! Spyglass itself are skipped so the store's own diagnostics never feed back
//! into it.

use std::fmt;
use std::sync::Arc;

use spyglass_core::types::{Metadata, NewMessage, Provenance};
use spyglass_core::{EventSink, Level, StoreCommand};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const OWN_TARGET_PREFIX: &str = "spyglass";

/// Forwards `tracing` events into an [`EventSink`].
///
/// ```ignore
/// use tracing_subscriber::layer::SubscriberExt;
/// let subscriber = tracing_subscriber::registry().with(StoreLayer::new(store.clone()));
/// tracing::subscriber::set_global_default(subscriber)?;
/// ```
pub struct StoreLayer {
    sink: Arc<dyn EventSink>,
}

impl StoreLayer {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }
}

impl fmt::Debug for StoreLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLayer")
            .field("session", &self.sink.session_id())
            .finish()
    }
}

impl<S> Layer<S> for StoreLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if meta.target().starts_with(OWN_TARGET_PREFIX) {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = NewMessage::new(
            self.sink.session_id(),
            level_of(meta.level()),
            meta.target(),
            visitor.message.unwrap_or_default(),
        )
        .with_metadata(visitor.fields)
        .with_provenance(Provenance::new(
            meta.file().unwrap_or_default(),
            meta.module_path().unwrap_or_default(),
            meta.line().unwrap_or_default(),
        ));
        // Reporting a failure here would re-enter the subscriber.
        let _ = self.sink.enqueue(StoreCommand::AppendMessage(message));
    }
}

fn level_of(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::TRACE => Level::Trace,
        tracing::Level::DEBUG => Level::Debug,
        tracing::Level::INFO => Level::Info,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::ERROR => Level::Error,
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Metadata,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}
