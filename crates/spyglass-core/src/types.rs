// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifiers and stored entity types shared across the workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::error::SpyglassError;
use crate::network::{NetworkRequest, NetworkResponse, ResponseError, TaskMetrics, TransferSize};

/// Identifier of one application run. Time-ordered (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = SpyglassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|e| SpyglassError::InvalidArgument(format!("session id `{s}`: {e}")))
    }
}

/// Identifier of one network task. Stable for the task's whole lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = SpyglassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|e| SpyglassError::InvalidArgument(format!("task id `{s}`: {e}")))
    }
}

/// Row identifier of a stored message. Storage-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// SHA-1 digest of a blob's uncompressed bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 20]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = SpyglassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 20];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| SpyglassError::InvalidArgument(format!("digest `{s}`: {e}")))?;
        Ok(Digest(out))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Log severity, ordered from least to most severe.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 7] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Notice,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    /// Numeric rank persisted in the database (1 = trace .. 7 = critical).
    pub fn rank(self) -> i64 {
        match self {
            Level::Trace => 1,
            Level::Debug => 2,
            Level::Info => 3,
            Level::Notice => 4,
            Level::Warning => 5,
            Level::Error => 6,
            Level::Critical => 7,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Level> {
        Level::ALL.into_iter().find(|l| l.rank() == rank)
    }
}

/// Kind of network operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Data,
    Download,
    Upload,
    Stream,
    #[strum(serialize = "websocket")]
    #[serde(rename = "websocket")]
    WebSocket,
}

/// Lifecycle state of a task: `pending -> {success, failure}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Pending)
    }
}

/// Which body of a task a payload belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    Request,
    Response,
}

/// Where a log call originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub file: String,
    pub function: String,
    pub line: u32,
}

impl Provenance {
    /// Keeps only the last path component of `file`.
    pub fn new(file: &str, function: &str, line: u32) -> Self {
        let file = file.rsplit(['/', '\\']).next().unwrap_or(file);
        Self {
            file: file.to_string(),
            function: function.to_string(),
            line,
        }
    }
}

/// Ordered key-value metadata with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(Vec<(String, String)>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing the value in place if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// Application identity recorded with each session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub build: Option<String>,
}

/// One continuous run of the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub app: AppInfo,
}

/// A stored log message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub level: Level,
    pub label: String,
    pub text: String,
    pub provenance: Provenance,
    pub metadata: Metadata,
    pub pinned: bool,
    pub task_id: Option<TaskId>,
}

/// Reference from a task to a Content Store blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRef {
    pub digest: Digest,
    /// Uncompressed payload size in bytes.
    pub size: u64,
}

/// Transfer progress of an in-flight task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: i64,
    pub total: i64,
}

/// A stored network task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub session_id: SessionId,
    pub message_id: Option<MessageId>,
    pub task_type: TaskType,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub label: Option<String>,
    pub url: Option<String>,
    pub host: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<i32>,
    pub response_content_type: Option<String>,
    pub original_request: NetworkRequest,
    pub current_request: Option<NetworkRequest>,
    pub response: Option<NetworkResponse>,
    pub error: Option<ResponseError>,
    pub request_body: Option<BodyRef>,
    pub response_body: Option<BodyRef>,
    pub request_body_size: i64,
    pub response_body_size: i64,
    pub transfer: TransferSize,
    pub start_date: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub redirect_count: u32,
    pub is_from_cache: bool,
    pub is_mocked: bool,
    pub task_description: Option<String>,
    pub progress: Option<Progress>,
    pub pinned: bool,
}

/// Input for appending a log message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub level: Level,
    pub label: String,
    pub text: String,
    pub metadata: Metadata,
    pub provenance: Provenance,
}

impl NewMessage {
    pub fn new(
        session_id: SessionId,
        level: Level,
        label: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            level,
            label: label.into(),
            text: text.into(),
            metadata: Metadata::new(),
            provenance: Provenance::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Input for `begin_task`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub id: TaskId,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub task_type: TaskType,
    pub original_request: NetworkRequest,
    pub current_request: Option<NetworkRequest>,
    pub label: Option<String>,
    pub task_description: Option<String>,
}

impl NewTask {
    pub fn new(
        id: TaskId,
        session_id: SessionId,
        task_type: TaskType,
        original_request: NetworkRequest,
    ) -> Self {
        Self {
            id,
            session_id,
            created_at: Utc::now(),
            task_type,
            original_request,
            current_request: None,
            label: None,
            task_description: None,
        }
    }
}

/// Fields merged into a pending task by `update_task`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub current_request: Option<NetworkRequest>,
    pub response: Option<NetworkResponse>,
    pub metrics: Option<TaskMetrics>,
    pub progress: Option<Progress>,
    pub task_description: Option<String>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self == &TaskUpdate::default()
    }
}

/// Terminal outcome applied by `finish_task`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub state: TaskState,
    pub error: Option<ResponseError>,
    pub metrics: Option<TaskMetrics>,
    pub response: Option<NetworkResponse>,
    pub current_request: Option<NetworkRequest>,
}

impl TaskCompletion {
    /// Classifies the outcome: failure when an error is present or the HTTP
    /// status falls outside `100..400`.
    pub fn from_outcome(
        response: Option<NetworkResponse>,
        error: Option<ResponseError>,
        metrics: Option<TaskMetrics>,
    ) -> Self {
        let failed = error.is_some() || response.as_ref().is_some_and(|r| !r.is_success());
        Self {
            state: if failed {
                TaskState::Failure
            } else {
                TaskState::Success
            },
            error,
            metrics,
            response,
            current_request: None,
        }
    }

    pub fn failure(error: ResponseError) -> Self {
        Self {
            state: TaskState::Failure,
            error: Some(error),
            metrics: None,
            response: None,
            current_request: None,
        }
    }
}

/// Aggregate counts of a label across stored messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_rank_roundtrips_and_orders() {
        for level in Level::ALL {
            assert_eq!(Level::from_rank(level.rank()), Some(level));
        }
        assert!(Level::Error > Level::Warning);
        assert_eq!(Level::from_rank(0), None);
    }

    #[test]
    fn level_parses_case_insensitively() {
        assert_eq!("ERROR".parse::<Level>().unwrap(), Level::Error);
        assert_eq!(Level::Critical.to_string(), "critical");
    }

    #[test]
    fn task_type_websocket_name() {
        assert_eq!(TaskType::WebSocket.to_string(), "websocket");
        assert_eq!("websocket".parse::<TaskType>().unwrap(), TaskType::WebSocket);
        let json = serde_json::to_string(&TaskType::WebSocket).unwrap();
        assert_eq!(json, "\"websocket\"");
    }

    #[test]
    fn metadata_keeps_keys_unique_and_ordered() {
        let mut metadata = Metadata::new();
        metadata.insert("a", "1");
        metadata.insert("b", "2");
        metadata.insert("a", "3");
        let pairs: Vec<_> = metadata.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn digest_hex_roundtrip() {
        let digest = Digest([0xab; 20]);
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);
        assert!("zz".parse::<Digest>().is_err());
    }

    #[test]
    fn provenance_strips_directories() {
        let p = Provenance::new("/src/app/login.rs", "login", 42);
        assert_eq!(p.file, "login.rs");
    }
}
