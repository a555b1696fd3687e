// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./spyglass.toml` > `~/.config/spyglass/spyglass.toml` >
//! `/etc/spyglass/spyglass.toml` with environment variable overrides via `SPYGLASS_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::SpyglassConfig;

pub const SYSTEM_CONFIG_FILE: &str = "/etc/spyglass/spyglass.toml";
pub const LOCAL_CONFIG_FILE: &str = "spyglass.toml";

/// `~/.config/spyglass/spyglass.toml` on Linux, platform equivalent elsewhere.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("spyglass").join(LOCAL_CONFIG_FILE))
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/spyglass/spyglass.toml` (system-wide)
/// 3. `~/.config/spyglass/spyglass.toml` (user XDG config)
/// 4. `./spyglass.toml` (local directory)
/// 5. `SPYGLASS_*` environment variables
pub fn load_config() -> Result<SpyglassConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<SpyglassConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SpyglassConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SpyglassConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SpyglassConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SpyglassConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_FILE))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// Environment provider with explicit section mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `SPYGLASS_STORE_SIZE_LIMIT` must map to `store.size_limit`,
/// not `store.size.limit`.
fn env_provider() -> Env {
    Env::prefixed("SPYGLASS_").map(|key| {
        let mapped = key
            .as_str()
            .replacen("store_", "store.", 1)
            .replacen("capture_", "capture.", 1)
            .replacen("logging_", "logging.", 1);
        mapped.into()
    })
}
