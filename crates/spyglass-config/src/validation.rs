// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.

use crate::diagnostic::ConfigError;
use crate::model::SpyglassConfig;
use crate::pattern;

fn ratio_in_range(name: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(ConfigError::Validation {
            message: format!("{name} must be in (0, 1], got {value}"),
        });
    }
}

fn positive(name: &str, value: u64, errors: &mut Vec<ConfigError>) {
    if value == 0 {
        errors.push(ConfigError::Validation {
            message: format!("{name} must be greater than zero"),
        });
    }
}

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure rather than stopping at the first.
pub fn validate_config(config: &SpyglassConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let store = &config.store;

    if store.path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "store.path must not be empty".to_string(),
        });
    }

    ratio_in_range("store.expected_blob_ratio", store.expected_blob_ratio, &mut errors);
    ratio_in_range("store.trim_ratio", store.trim_ratio, &mut errors);
    positive("store.size_limit", store.size_limit, &mut errors);
    positive("store.max_age_secs", store.max_age_secs, &mut errors);
    positive(
        "store.response_body_size_limit",
        store.response_body_size_limit as u64,
        &mut errors,
    );
    positive(
        "store.write_queue_capacity",
        store.write_queue_capacity as u64,
        &mut errors,
    );

    let capture = &config.capture;
    if capture.label.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "capture.label must not be empty".to_string(),
        });
    }
    positive(
        "capture.max_tracked_tasks",
        capture.max_tracked_tasks as u64,
        &mut errors,
    );

    let pattern_lists = [
        ("capture.included_hosts", &capture.included_hosts),
        ("capture.excluded_hosts", &capture.excluded_hosts),
        ("capture.included_urls", &capture.included_urls),
        ("capture.excluded_urls", &capture.excluded_urls),
    ];
    for (name, patterns) in pattern_lists {
        for p in patterns {
            if let Err(e) = pattern::compile(p, capture.regex) {
                errors.push(ConfigError::Validation {
                    message: format!("{name} pattern `{p}` is invalid: {e}"),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
