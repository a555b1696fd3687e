// SPDX-FileCopyrightText: 2026 Spyglass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network request, response, and metrics model.
//!
//! These are plain value types: the capture layer builds them from the host
//! networking stack, the store persists them as JSON columns, and the query
//! facade hands them back unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// HTTP header map. Lookups through [`header`] are case-insensitive.
pub type Headers = BTreeMap<String, String>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Cache policy requested by the caller.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    UseProtocolCachePolicy,
    ReloadIgnoringLocalCacheData,
    ReturnCacheDataElseLoad,
    ReturnCacheDataDontLoad,
}

/// Per-request transport flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub allows_cellular_access: bool,
    pub allows_expensive_network_access: bool,
    pub allows_constrained_network_access: bool,
    pub http_should_handle_cookies: bool,
    pub http_should_use_pipelining: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            allows_cellular_access: true,
            allows_expensive_network_access: true,
            allows_constrained_network_access: true,
            http_should_handle_cookies: true,
            http_should_use_pipelining: false,
        }
    }
}

/// Source of a request body as the host hands it to the networking stack.
///
/// Streams are modelled as a factory so observers can read their own copy
/// without consuming the reader the stack will send.
#[derive(Clone)]
pub enum RequestBody {
    Data(Vec<u8>),
    File(PathBuf),
    Stream(Arc<dyn Fn() -> Box<dyn Read + Send> + Send + Sync>),
}

impl RequestBody {
    /// Reads the whole body into memory.
    pub fn read_all(&self) -> std::io::Result<Vec<u8>> {
        match self {
            RequestBody::Data(data) => Ok(data.clone()),
            RequestBody::File(path) => std::fs::read(path),
            RequestBody::Stream(open) => {
                let mut buf = Vec::new();
                open().read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Data(data) => write!(f, "Data({} bytes)", data.len()),
            RequestBody::File(path) => f.debug_tuple("File").field(path).finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl PartialEq for RequestBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RequestBody::Data(a), RequestBody::Data(b)) => a == b,
            (RequestBody::File(a), RequestBody::File(b)) => a == b,
            (RequestBody::Stream(a), RequestBody::Stream(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An HTTP request. The body is never persisted with the request; it is
/// stored separately in the Content Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub url: Option<String>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub timeout_interval: f64,
    #[serde(default)]
    pub options: RequestOptions,
    #[serde(skip)]
    pub body: Option<RequestBody>,
}

impl NetworkRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            method: Some("GET".to_string()),
            headers: Headers::new(),
            cache_policy: CachePolicy::default(),
            timeout_interval: 60.0,
            options: RequestOptions::default(),
            body: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Host component of the URL, if it parses.
    pub fn host(&self) -> Option<String> {
        let url = url::Url::parse(self.url.as_deref()?).ok()?;
        url.host_str().map(str::to_string)
    }

    pub fn content_type(&self) -> Option<ContentType> {
        header(&self.headers, "Content-Type").map(ContentType::parse)
    }
}

/// An HTTP response head.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkResponse {
    pub status_code: Option<i32>,
    #[serde(default)]
    pub headers: Headers,
}

impl NetworkResponse {
    pub fn new(status_code: i32) -> Self {
        Self {
            status_code: Some(status_code),
            headers: Headers::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Non-HTTP responses (no status code) count as successful.
    pub fn is_success(&self) -> bool {
        self.status_code.is_none_or(|code| (100..400).contains(&code))
    }

    pub fn content_type(&self) -> Option<ContentType> {
        header(&self.headers, "Content-Type").map(ContentType::parse)
    }

    pub fn expected_content_length(&self) -> Option<i64> {
        header(&self.headers, "Content-Length").and_then(|v| v.trim().parse().ok())
    }
}

/// A transport or decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub domain: String,
    pub debug_description: String,
}

impl ResponseError {
    /// A zero code is normalised to -1 so a failure never reads as "no error".
    pub fn new(code: i64, domain: impl Into<String>, debug_description: impl Into<String>) -> Self {
        Self {
            code: if code == 0 { -1 } else { code },
            domain: domain.into(),
            debug_description: debug_description.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(-999, "NetworkError", "cancelled")
    }
}

/// A parsed `Content-Type` header value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    /// Media type, lowercased, without parameters.
    pub media_type: String,
    pub parameters: BTreeMap<String, String>,
}

impl ContentType {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let media_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let parameters = parts
            .filter_map(|p| {
                let (k, v) = p.split_once('=')?;
                Some((
                    k.trim().to_ascii_lowercase(),
                    v.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();
        Self {
            media_type,
            parameters,
        }
    }

    pub fn is_json(&self) -> bool {
        self.media_type.contains("json")
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn is_html(&self) -> bool {
        self.media_type.contains("html")
    }

    pub fn is_encoded_form(&self) -> bool {
        self.media_type == "application/x-www-form-urlencoded"
    }
}

/// How a transaction's resource was obtained.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FetchType {
    #[default]
    NetworkLoad,
    ServerPush,
    LocalCache,
    Unknown,
}

/// Start and duration of a task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DateInterval {
    pub start: DateTime<Utc>,
    /// Seconds.
    pub duration: f64,
}

/// Per-phase timestamps of one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionTiming {
    pub fetch_start: Option<DateTime<Utc>>,
    pub domain_lookup_start: Option<DateTime<Utc>>,
    pub domain_lookup_end: Option<DateTime<Utc>>,
    pub connect_start: Option<DateTime<Utc>>,
    pub secure_connection_start: Option<DateTime<Utc>>,
    pub secure_connection_end: Option<DateTime<Utc>>,
    pub connect_end: Option<DateTime<Utc>>,
    pub request_start: Option<DateTime<Utc>>,
    pub request_end: Option<DateTime<Utc>>,
    pub response_start: Option<DateTime<Utc>>,
    pub response_end: Option<DateTime<Utc>>,
}

/// A named phase of a transaction with its start and end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingPhase {
    pub name: &'static str,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TransactionTiming {
    /// Phases with both endpoints present: dns, connect, tls, request,
    /// waiting, download.
    pub fn phases(&self) -> Vec<TimingPhase> {
        let candidates = [
            ("dns", self.domain_lookup_start, self.domain_lookup_end),
            ("connect", self.connect_start, self.connect_end),
            ("tls", self.secure_connection_start, self.secure_connection_end),
            ("request", self.request_start, self.request_end),
            ("waiting", self.request_end, self.response_start),
            ("download", self.response_start, self.response_end),
        ];
        candidates
            .into_iter()
            .filter_map(|(name, start, end)| {
                Some(TimingPhase {
                    name,
                    start: start?,
                    end: end?,
                })
            })
            .collect()
    }
}

/// Byte counters of one transaction, distinguishing encoded and decoded sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSize {
    pub request_header_bytes_sent: i64,
    pub request_body_bytes_before_encoding: i64,
    pub request_body_bytes_sent: i64,
    pub response_header_bytes_received: i64,
    pub response_body_bytes_received: i64,
    pub response_body_bytes_after_decoding: i64,
}

impl TransferSize {
    pub fn total_bytes_sent(&self) -> i64 {
        self.request_header_bytes_sent + self.request_body_bytes_sent
    }

    pub fn total_bytes_received(&self) -> i64 {
        self.response_header_bytes_received + self.response_body_bytes_received
    }
}

impl std::ops::AddAssign for TransferSize {
    fn add_assign(&mut self, rhs: Self) {
        self.request_header_bytes_sent += rhs.request_header_bytes_sent;
        self.request_body_bytes_before_encoding += rhs.request_body_bytes_before_encoding;
        self.request_body_bytes_sent += rhs.request_body_bytes_sent;
        self.response_header_bytes_received += rhs.response_header_bytes_received;
        self.response_body_bytes_received += rhs.response_body_bytes_received;
        self.response_body_bytes_after_decoding += rhs.response_body_bytes_after_decoding;
    }
}

/// Network path properties observed for a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConditions {
    pub is_proxy_connection: bool,
    pub is_reused_connection: bool,
    pub is_cellular: bool,
    pub is_expensive: bool,
    pub is_constrained: bool,
    pub is_multipath: bool,
}

/// Metrics of one request/response exchange within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetrics {
    pub fetch_type: FetchType,
    pub request: NetworkRequest,
    pub response: Option<NetworkResponse>,
    #[serde(default)]
    pub timing: TransactionTiming,
    pub network_protocol: Option<String>,
    #[serde(default)]
    pub transfer_size: TransferSize,
    #[serde(default)]
    pub conditions: ConnectionConditions,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
    pub negotiated_tls_protocol_version: Option<String>,
    pub negotiated_tls_cipher_suite: Option<String>,
}

impl TransactionMetrics {
    pub fn new(fetch_type: FetchType, request: NetworkRequest) -> Self {
        Self {
            fetch_type,
            request,
            response: None,
            timing: TransactionTiming::default(),
            network_protocol: None,
            transfer_size: TransferSize::default(),
            conditions: ConnectionConditions::default(),
            local_address: None,
            remote_address: None,
            local_port: None,
            remote_port: None,
            negotiated_tls_protocol_version: None,
            negotiated_tls_cipher_suite: None,
        }
    }
}

/// Metrics of a whole task: one transaction per redirect hop or cache lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task_interval: DateInterval,
    pub redirect_count: u32,
    pub transactions: Vec<TransactionMetrics>,
}

impl TaskMetrics {
    /// Sum of transfer counters across network loads.
    pub fn total_transfer_size(&self) -> TransferSize {
        let mut total = TransferSize::default();
        for t in &self.transactions {
            if t.fetch_type == FetchType::NetworkLoad {
                total += t.transfer_size;
            }
        }
        total
    }

    pub fn last_network_load(&self) -> Option<&TransactionMetrics> {
        self.transactions
            .iter()
            .rev()
            .find(|t| t.fetch_type == FetchType::NetworkLoad)
    }

    /// True when the final transaction came from the local cache or was a
    /// revalidated (304) network load.
    pub fn is_from_cache(&self) -> bool {
        match self.transactions.last() {
            Some(t) if t.fetch_type == FetchType::LocalCache => true,
            Some(t) if t.fetch_type == FetchType::NetworkLoad => t
                .response
                .as_ref()
                .and_then(|r| r.status_code)
                .is_some_and(|code| code == 304),
            _ => false,
        }
    }
}
