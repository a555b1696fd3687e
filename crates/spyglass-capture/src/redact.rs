// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redaction of sensitive headers, query items and JSON body fields before
//! anything reaches the store.

use std::borrow::Cow;
use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;
use spyglass_config::model::CaptureConfig;
use spyglass_config::pattern;
use spyglass_core::network::{Headers, NetworkRequest, NetworkResponse, TaskMetrics};
use url::Url;

/// Replacement for every redacted value.
pub const PRIVATE: &str = "<private>";

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    headers: Vec<Regex>,
    /// Lowercased.
    query_items: HashSet<String>,
    data_fields: HashSet<String>,
}

impl Redactor {
    pub fn from_config(config: &CaptureConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            headers: pattern::compile_all(&config.sensitive_headers, config.regex)?,
            query_items: config
                .sensitive_query_items
                .iter()
                .map(|name| name.to_ascii_lowercase())
                .collect(),
            data_fields: config.sensitive_data_fields.iter().cloned().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.query_items.is_empty() && self.data_fields.is_empty()
    }

    pub fn request(&self, request: &mut NetworkRequest) {
        self.redact_headers(&mut request.headers);
        if let Some(url) = request.url.as_deref()
            && let Some(redacted) = self.redact_query(url)
        {
            request.url = Some(redacted);
        }
    }

    pub fn response(&self, response: &mut NetworkResponse) {
        self.redact_headers(&mut response.headers);
    }

    pub fn metrics(&self, metrics: &mut TaskMetrics) {
        for transaction in &mut metrics.transactions {
            self.request(&mut transaction.request);
            if let Some(response) = &mut transaction.response {
                self.response(response);
            }
        }
    }

    /// Replaces sensitive fields of a JSON body at any depth. Bodies that
    /// are not JSON pass through unchanged.
    pub fn body<'a>(&self, body: &'a [u8]) -> Cow<'a, [u8]> {
        if self.data_fields.is_empty() {
            return Cow::Borrowed(body);
        }
        let Ok(mut json) = serde_json::from_slice::<Value>(body) else {
            return Cow::Borrowed(body);
        };
        if !self.redact_value(&mut json) {
            return Cow::Borrowed(body);
        }
        match serde_json::to_vec(&json) {
            Ok(bytes) => Cow::Owned(bytes),
            Err(_) => Cow::Borrowed(body),
        }
    }

    fn redact_headers(&self, headers: &mut Headers) {
        if self.headers.is_empty() {
            return;
        }
        for (name, value) in headers.iter_mut() {
            if self.headers.iter().any(|re| re.is_match(name)) {
                *value = PRIVATE.to_string();
            }
        }
    }

    /// Rewritten URL, or `None` when nothing in it is sensitive.
    fn redact_query(&self, raw: &str) -> Option<String> {
        if self.query_items.is_empty() {
            return None;
        }
        let mut url = Url::parse(raw).ok()?;
        if url.query().is_none() {
            return None;
        }
        let mut changed = false;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(name, value)| {
                if self.query_items.contains(&name.to_ascii_lowercase()) {
                    changed = true;
                    (name.into_owned(), PRIVATE.to_string())
                } else {
                    (name.into_owned(), value.into_owned())
                }
            })
            .collect();
        if !changed {
            return None;
        }
        url.query_pairs_mut().clear().extend_pairs(pairs);
        Some(url.into())
    }

    fn redact_value(&self, value: &mut Value) -> bool {
        match value {
            Value::Object(object) => {
                let mut changed = false;
                for (key, field) in object.iter_mut() {
                    if self.data_fields.contains(key) {
                        *field = Value::String(PRIVATE.to_string());
                        changed = true;
                    } else {
                        changed |= self.redact_value(field);
                    }
                }
                changed
            }
            Value::Array(items) => items
                .iter_mut()
                .fold(false, |changed, item| self.redact_value(item) | changed),
            _ => false,
        }
    }
}
