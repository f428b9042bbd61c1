use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How a single fetch attempt turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    Error,
    /// The server answered a conditional request with 304.
    NotModified,
    /// The payload's own timestamp did not advance since the last success.
    Unchanged,
}

impl FetchStatus {
    /// Only new snapshots and failures are archived.
    pub fn should_persist(self) -> bool {
        matches!(self, FetchStatus::Success | FetchStatus::Error)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchStatus::Success => "SUCCESS",
            FetchStatus::Error => "ERROR",
            FetchStatus::NotModified => "NOT_MODIFIED",
            FetchStatus::Unchanged => "UNCHANGED",
        };
        f.write_str(s)
    }
}

/// Identity of one fetch attempt: which feed, when, and with which extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAttempt {
    pub producer: String,
    pub feed: String,
    pub fetch_time: DateTime<Utc>,
    pub enabled_extensions: BTreeSet<String>,
}

impl FetchAttempt {
    /// The fetch time is kept at whole-second precision, as archived.
    pub fn new(
        producer: impl Into<String>,
        feed: impl Into<String>,
        fetch_time: DateTime<Utc>,
        enabled_extensions: BTreeSet<String>,
    ) -> Self {
        Self {
            producer: producer.into(),
            feed: feed.into(),
            fetch_time: fetch_time.trunc_subsecs(0),
            enabled_extensions,
        }
    }
}

/// Transport metadata of a response whose head was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status_code: u16,
    pub status_message: Option<String>,
    pub protocol: String,
    /// JSON multimap of header name to values.
    pub response_headers: String,
    pub response_time_millis: u32,
}

/// One archived fetch attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RowParts", into = "RowParts")]
pub struct FeedContentsRow {
    producer: String,
    feed: String,
    fetch_time: DateTime<Utc>,
    is_error: bool,
    error_message: Option<String>,
    response_time_millis: Option<u32>,
    status_code: Option<u16>,
    status_message: Option<String>,
    protocol: Option<String>,
    response_headers: Option<String>,
    response_body: Option<Vec<u8>>,
    response_body_length: Option<u32>,
    response_contents: Option<String>,
    enabled_extensions: BTreeSet<String>,
}

impl FeedContentsRow {
    pub fn success(
        attempt: FetchAttempt,
        meta: ResponseMeta,
        body: Vec<u8>,
        response_contents: String,
    ) -> Self {
        let mut row = Self::base(attempt, false, None);
        row.apply_meta(meta);
        row.set_body(Some(body));
        row.response_contents = Some(response_contents);
        row
    }

    /// `meta` is absent when the request never produced a response head.
    pub fn error(
        attempt: FetchAttempt,
        message: impl Into<String>,
        meta: Option<ResponseMeta>,
        body: Option<Vec<u8>>,
    ) -> Self {
        let mut row = Self::base(attempt, true, Some(message.into()));
        if let Some(meta) = meta {
            row.apply_meta(meta);
        }
        row.set_body(body);
        row
    }

    fn base(attempt: FetchAttempt, is_error: bool, error_message: Option<String>) -> Self {
        Self {
            producer: attempt.producer,
            feed: attempt.feed,
            fetch_time: attempt.fetch_time,
            is_error,
            error_message,
            response_time_millis: None,
            status_code: None,
            status_message: None,
            protocol: None,
            response_headers: None,
            response_body: None,
            response_body_length: None,
            response_contents: None,
            enabled_extensions: attempt.enabled_extensions,
        }
    }

    fn apply_meta(&mut self, meta: ResponseMeta) {
        self.status_code = Some(meta.status_code);
        self.status_message = meta.status_message;
        self.protocol = Some(meta.protocol);
        self.response_headers = Some(meta.response_headers);
        self.response_time_millis = Some(meta.response_time_millis);
    }

    fn set_body(&mut self, body: Option<Vec<u8>>) {
        self.response_body_length = body.as_ref().map(|b| b.len() as u32);
        self.response_body = body;
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub fn fetch_time(&self) -> DateTime<Utc> {
        self.fetch_time
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn response_time_millis(&self) -> Option<u32> {
        self.response_time_millis
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    pub fn response_headers(&self) -> Option<&str> {
        self.response_headers.as_deref()
    }

    pub fn response_body(&self) -> Option<&[u8]> {
        self.response_body.as_deref()
    }

    pub fn response_body_length(&self) -> Option<u32> {
        self.response_body_length
    }

    pub fn response_contents(&self) -> Option<&str> {
        self.response_contents.as_deref()
    }

    pub fn enabled_extensions(&self) -> &BTreeSet<String> {
        &self.enabled_extensions
    }
}

/// Flat, unchecked shape of a row as it is stored and serialized.
///
/// Converting back into a [`FeedContentsRow`] re-checks the row invariants,
/// so rows read from the database or from fallback files are as trustworthy
/// as freshly classified ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowParts {
    pub producer: String,
    pub feed: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub fetch_time: DateTime<Utc>,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub response_time_millis: Option<u32>,
    pub status_code: Option<u16>,
    pub status_message: Option<String>,
    pub protocol: Option<String>,
    pub response_headers: Option<String>,
    #[serde(rename = "response_body_b64", with = "base64_body", default)]
    pub response_body: Option<Vec<u8>>,
    pub response_body_length: Option<u32>,
    pub response_contents: Option<String>,
    #[serde(default)]
    pub enabled_extensions: BTreeSet<String>,
}

impl TryFrom<RowParts> for FeedContentsRow {
    type Error = AppError;

    fn try_from(p: RowParts) -> Result<Self, Self::Error> {
        if p.producer.is_empty() || p.feed.is_empty() {
            return Err(AppError::InvalidRow("producer and feed are required".into()));
        }
        if p.is_error && p.error_message.is_none() {
            return Err(AppError::InvalidRow(
                "error rows must carry an error message".into(),
            ));
        }
        if !p.is_error && (p.response_body.is_none() || p.response_contents.is_none()) {
            return Err(AppError::InvalidRow(
                "successful rows must carry a body and decoded contents".into(),
            ));
        }
        let actual_len = p.response_body.as_ref().map(|b| b.len() as u32);
        if p.response_body_length != actual_len {
            return Err(AppError::InvalidRow(format!(
                "response_body_length {:?} does not match body length {:?}",
                p.response_body_length, actual_len
            )));
        }

        Ok(Self {
            producer: p.producer,
            feed: p.feed,
            fetch_time: p.fetch_time,
            is_error: p.is_error,
            error_message: p.error_message,
            response_time_millis: p.response_time_millis,
            status_code: p.status_code,
            status_message: p.status_message,
            protocol: p.protocol,
            response_headers: p.response_headers,
            response_body: p.response_body,
            response_body_length: p.response_body_length,
            response_contents: p.response_contents,
            enabled_extensions: p.enabled_extensions,
        })
    }
}

impl From<FeedContentsRow> for RowParts {
    fn from(r: FeedContentsRow) -> Self {
        Self {
            producer: r.producer,
            feed: r.feed,
            fetch_time: r.fetch_time,
            is_error: r.is_error,
            error_message: r.error_message,
            response_time_millis: r.response_time_millis,
            status_code: r.status_code,
            status_message: r.status_message,
            protocol: r.protocol,
            response_headers: r.response_headers,
            response_body: r.response_body,
            response_body_length: r.response_body_length,
            response_contents: r.response_contents,
            enabled_extensions: r.enabled_extensions,
        }
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match body {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
