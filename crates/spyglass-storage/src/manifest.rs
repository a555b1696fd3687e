// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store identity and versioning, persisted as `manifest.json`.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use spyglass_core::SpyglassError;
use spyglass_core::types::AppInfo;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DATABASE_FILE: &str = "logs.sqlite";
pub const BLOBS_DIR: &str = "blobs";
pub const INFO_FILE: &str = "info.json";

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "3.6.0";

/// Schema versions whose archives can be imported.
pub const IMPORTABLE_VERSIONS: &str = ">=3.1.0, <4.0.0";

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub store_id: Uuid,
    pub version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_sweep_date: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            store_id: Uuid::new_v4(),
            version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            last_sweep_date: None,
        }
    }

    pub fn load(dir: &Path) -> Result<Self, SpyglassError> {
        let path = dir.join(MANIFEST_FILE);
        let raw = fs::read(&path)
            .map_err(|e| SpyglassError::StorageUnreadable(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&raw)
            .map_err(|e| SpyglassError::StorageUnreadable(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, dir: &Path) -> Result<(), SpyglassError> {
        let path = dir.join(MANIFEST_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks that a store or archive written with `found` can be read.
pub fn check_importable(found: &str) -> Result<(), SpyglassError> {
    let unsupported = || SpyglassError::UnsupportedSchemaVersion {
        found: found.to_string(),
        supported: IMPORTABLE_VERSIONS.to_string(),
    };
    let version = Version::parse(found).map_err(|_| unsupported())?;
    let req = VersionReq::parse(IMPORTABLE_VERSIONS)
        .map_err(|e| SpyglassError::Internal(format!("version requirement: {e}")))?;
    if req.matches(&version) {
        Ok(())
    } else {
        Err(unsupported())
    }
}

/// A summary of a store, also written into archives as `info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_id: Uuid,
    pub version: String,
    pub creation_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub message_count: u64,
    pub task_count: u64,
    pub blob_count: u64,
    pub session_count: u64,
    /// Database plus blob files, in bytes.
    pub total_store_size: u64,
    pub blobs_size: u64,
    pub blobs_decompressed_size: u64,
    #[serde(default)]
    pub app: Option<AppInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_roundtrips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::new();
        manifest.save(dir.path()).unwrap();
        assert_eq!(Manifest::load(dir.path()).unwrap(), manifest);
    }

    #[test]
    fn missing_manifest_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(SpyglassError::StorageUnreadable(_))
        ));
    }

    #[test]
    fn importable_range() {
        assert!(check_importable(SCHEMA_VERSION).is_ok());
        assert!(check_importable("3.1.0").is_ok());
        assert!(matches!(
            check_importable("2.0.0"),
            Err(SpyglassError::UnsupportedSchemaVersion { .. })
        ));
        assert!(check_importable("4.0.0").is_err());
        assert!(check_importable("garbage").is_err());
    }
}
