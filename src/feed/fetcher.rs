use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, StatusCode};
use url::Url;

use crate::config::{BasicAuth, FeedConfig};
use crate::error::Result;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// What we remember from a feed's last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub payload_timestamp: Option<DateTime<Utc>>,
}

impl CacheValidators {
    fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub protocol: String,
    pub headers: HeaderMap,
    /// Time from sending the request until the response head arrived.
    pub response_time: Duration,
    /// Whether the request carried conditional headers.
    pub conditional: bool,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Completed { head: ResponseHead, body: Vec<u8> },
    /// The head arrived but reading the body failed.
    Incomplete { head: ResponseHead, message: String },
    /// No response at all.
    Failed { message: String },
}

impl FetchOutcome {
    pub fn response_time(&self) -> Option<Duration> {
        match self {
            FetchOutcome::Completed { head, .. } | FetchOutcome::Incomplete { head, .. } => {
                Some(head.response_time)
            }
            FetchOutcome::Failed { .. } => None,
        }
    }

    pub fn body_len(&self) -> Option<usize> {
        match self {
            FetchOutcome::Completed { body, .. } => Some(body.len()),
            _ => None,
        }
    }
}

pub struct FeedFetcher {
    client: Client,
    insecure_client: Client,
}

impl FeedFetcher {
    pub fn new(call_timeout: Duration, operator_contact: Option<&str>) -> Result<Self> {
        let user_agent = user_agent(operator_contact);
        let build = |accept_invalid_certs: bool| {
            Client::builder()
                .timeout(call_timeout)
                .connect_timeout(call_timeout.min(Duration::from_secs(10)))
                .user_agent(user_agent.as_str())
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
        };

        Ok(Self {
            client: build(false)?,
            insecure_client: build(true)?,
        })
    }

    pub async fn fetch(
        &self,
        feed: &FeedConfig,
        validators: &CacheValidators,
        fetch_time: DateTime<Utc>,
    ) -> FetchOutcome {
        let url = match feed_url(feed) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::Failed {
                    message: format!("invalid feed URL: {}", e),
                }
            }
        };

        let client = if feed.ignore_tls_errors {
            &self.insecure_client
        } else {
            &self.client
        };

        let conditional = feed.conditional_requests && !validators.is_empty();
        let build = |credentials: Option<&BasicAuth>| -> RequestBuilder {
            let mut request = client.get(url.clone());
            for (name, value) in &feed.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(auth) = credentials {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }
            if conditional {
                if let Some(etag) = &validators.etag {
                    request = request.header(IF_NONE_MATCH, etag.as_str());
                }
                if let Some(last_modified) = validators.last_modified {
                    if last_modified <= fetch_time {
                        request = request.header(IF_MODIFIED_SINCE, to_http_date(last_modified));
                    }
                }
            }
            request
        };

        let mut started = Instant::now();
        let mut response = match build(None).send().await {
            Ok(r) => r,
            Err(e) => return request_failed(&e),
        };

        // Credentials only go out once the server has asked for them, and
        // never over a request that already carried an Authorization header.
        if response.status() == StatusCode::UNAUTHORIZED && !sets_authorization(feed) {
            if let Some(auth) = &feed.basic_auth {
                tracing::debug!("Server requires authentication, retrying with credentials");
                started = Instant::now();
                response = match build(Some(auth)).send().await {
                    Ok(r) => r,
                    Err(e) => return request_failed(&e),
                };
            }
        }

        let head = ResponseHead {
            status: response.status(),
            protocol: format!("{:?}", response.version()),
            headers: response.headers().clone(),
            response_time: started.elapsed(),
            conditional,
        };

        match response.bytes().await {
            Ok(bytes) => FetchOutcome::Completed {
                head,
                body: bytes.to_vec(),
            },
            Err(e) => {
                tracing::warn!("Reading response body failed: {}", error_chain(&e));
                FetchOutcome::Incomplete {
                    head,
                    message: error_chain(&e),
                }
            }
        }
    }
}

fn request_failed(e: &reqwest::Error) -> FetchOutcome {
    tracing::warn!("Request failed: {}", error_chain(e));
    FetchOutcome::Failed {
        message: error_chain(e),
    }
}

fn sets_authorization(feed: &FeedConfig) -> bool {
    feed.headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
}

fn feed_url(feed: &FeedConfig) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(&feed.feed_url)?;
    if !feed.query_parameters.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &feed.query_parameters {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

fn user_agent(operator_contact: Option<&str>) -> String {
    let base = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    match operator_contact {
        Some(contact) => format!("{} ({})", base, contact),
        None => base,
    }
}

/// Flattens a header map into `{name: [values...]}`.
pub fn header_multimap(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

pub fn to_http_date(t: DateTime<Utc>) -> String {
    t.format(HTTP_DATE_FORMAT).to_string()
}

pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Renders an error together with its sources, e.g.
/// `error sending request: connection refused`.
pub fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
