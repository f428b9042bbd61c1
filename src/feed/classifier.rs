use reqwest::header::{ETAG, LAST_MODIFIED};
use reqwest::StatusCode;

use crate::config::FeedConfig;
use crate::error::AppError;
use crate::models::{FeedContentsRow, FetchAttempt, FetchStatus, ResponseMeta};

use super::decoder::decode;
use super::fetcher::{header_multimap, parse_http_date, CacheValidators, FetchOutcome, ResponseHead};

#[derive(Debug, Clone, Copy)]
pub struct BodyPolicy {
    /// Keep the raw body on error rows too. Success rows always keep it.
    pub store_on_error: bool,
}

#[derive(Debug)]
pub struct Classification {
    pub status: FetchStatus,
    /// Present exactly when `status.should_persist()`.
    pub row: Option<FeedContentsRow>,
    /// Replacement validators, only after a successful fetch.
    pub validators: Option<CacheValidators>,
}

impl Classification {
    fn persisted(status: FetchStatus, row: FeedContentsRow) -> Self {
        debug_assert!(status.should_persist());
        Self {
            status,
            row: Some(row),
            validators: None,
        }
    }

    fn skipped(status: FetchStatus) -> Self {
        debug_assert!(!status.should_persist());
        Self {
            status,
            row: None,
            validators: None,
        }
    }
}

pub fn classify(
    feed: &FeedConfig,
    policy: BodyPolicy,
    attempt: FetchAttempt,
    previous: &CacheValidators,
    outcome: FetchOutcome,
) -> Classification {
    let (head, body) = match outcome {
        FetchOutcome::Failed { message } => {
            let row = FeedContentsRow::error(attempt, message, None, None);
            return Classification::persisted(FetchStatus::Error, row);
        }
        FetchOutcome::Incomplete { head, message } => {
            let row = FeedContentsRow::error(attempt, message, Some(response_meta(&head)), None);
            return Classification::persisted(FetchStatus::Error, row);
        }
        FetchOutcome::Completed { head, body } => (head, body),
    };

    let meta = response_meta(&head);

    if head.conditional && head.status == StatusCode::NOT_MODIFIED {
        tracing::debug!("Conditional GET returned 304");
        return Classification::skipped(FetchStatus::NotModified);
    }

    let error_body = |body: Vec<u8>| policy.store_on_error.then_some(body);

    if !head.status.is_success() {
        let message = match head.status.canonical_reason() {
            Some(reason) => format!("HTTP {} {}", head.status.as_u16(), reason),
            None => format!("HTTP {}", head.status.as_u16()),
        };
        let row = FeedContentsRow::error(attempt, message, Some(meta), error_body(body));
        return Classification::persisted(FetchStatus::Error, row);
    }

    let decoded = match decode(feed.format, &body, feed.parse_partial, &feed.extensions) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!("Payload decoding failed: {}", e);
            let message = match e {
                AppError::Decode(message) => message,
                other => other.to_string(),
            };
            let row = FeedContentsRow::error(attempt, message, Some(meta), error_body(body));
            return Classification::persisted(FetchStatus::Error, row);
        }
    };

    if let (Some(previous_ts), Some(current_ts)) = (previous.payload_timestamp, decoded.timestamp) {
        if previous_ts <= attempt.fetch_time && current_ts <= previous_ts {
            tracing::debug!("Payload timestamp unchanged since last fetch");
            return Classification::skipped(FetchStatus::Unchanged);
        }
    }

    let validators = CacheValidators {
        etag: header_str(&head, ETAG),
        last_modified: header_str(&head, LAST_MODIFIED).and_then(|s| parse_http_date(&s)),
        payload_timestamp: decoded.timestamp,
    };

    Classification {
        status: FetchStatus::Success,
        row: Some(FeedContentsRow::success(attempt, meta, body, decoded.contents)),
        validators: Some(validators),
    }
}

fn response_meta(head: &ResponseHead) -> ResponseMeta {
    let headers = serde_json::to_string(&header_multimap(&head.headers))
        .unwrap_or_else(|_| "{}".to_string());

    ResponseMeta {
        status_code: head.status.as_u16(),
        status_message: head.status.canonical_reason().map(str::to_string),
        protocol: head.protocol.clone(),
        response_headers: headers,
        response_time_millis: u32::try_from(head.response_time.as_millis()).unwrap_or(u32::MAX),
    }
}

fn header_str(head: &ResponseHead, name: reqwest::header::HeaderName) -> Option<String> {
    head.headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_support::{feed_config, nyct_feed, sample_feed};
    use crate::models::{Extension, FeedFormat};
    use chrono::{DateTime, TimeZone, Utc};
    use reqwest::header::HeaderMap;
    use std::collections::BTreeSet;
    use std::time::Duration;

    const FETCH_TS: i64 = 1_741_964_966;

    fn attempt() -> FetchAttempt {
        FetchAttempt::new(
            "mta",
            "subway-ace",
            Utc.timestamp_opt(FETCH_TS, 0).unwrap(),
            BTreeSet::from(["NYCT".to_string()]),
        )
    }

    fn head(status: u16, conditional: bool) -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.insert(ETAG, "\"abc\"".parse().unwrap());
        headers.insert(LAST_MODIFIED, "Fri, 14 Mar 2025 15:00:00 GMT".parse().unwrap());
        ResponseHead {
            status: StatusCode::from_u16(status).unwrap(),
            protocol: "HTTP/1.1".into(),
            headers,
            response_time: Duration::from_millis(42),
            conditional,
        }
    }

    fn completed(status: u16, body: Vec<u8>) -> FetchOutcome {
        FetchOutcome::Completed {
            head: head(status, false),
            body,
        }
    }

    fn keep_errors() -> BodyPolicy {
        BodyPolicy { store_on_error: true }
    }

    fn run(outcome: FetchOutcome, previous: &CacheValidators) -> Classification {
        let feed = feed_config("http://example.org/feed");
        classify(&feed, keep_errors(), attempt(), previous, outcome)
    }

    #[test]
    fn test_success_populates_body_contents_and_validators() {
        let body = sample_feed(FETCH_TS as u64 - 10);
        let c = run(completed(200, body.clone()), &CacheValidators::default());

        assert_eq!(c.status, FetchStatus::Success);
        let row = c.row.unwrap();
        assert!(!row.is_error());
        assert_eq!(row.response_body(), Some(body.as_slice()));
        assert_eq!(row.response_body_length(), Some(body.len() as u32));
        assert!(row.response_contents().unwrap().contains("\"route_id\":\"A\""));
        assert_eq!(row.status_code(), Some(200));
        assert_eq!(row.status_message(), Some("OK"));
        assert_eq!(row.response_time_millis(), Some(42));
        assert!(row.response_headers().unwrap().contains("\"etag\":[\"\\\"abc\\\"\"]"));

        let v = c.validators.unwrap();
        assert_eq!(v.etag.as_deref(), Some("\"abc\""));
        assert_eq!(v.last_modified.unwrap().timestamp(), 1_741_964_400);
        assert_eq!(v.payload_timestamp.unwrap().timestamp(), FETCH_TS - 10);
    }

    #[test]
    fn test_transport_failure_is_error_without_status() {
        let c = run(
            FetchOutcome::Failed {
                message: "connection refused".into(),
            },
            &CacheValidators::default(),
        );
        assert_eq!(c.status, FetchStatus::Error);
        let row = c.row.unwrap();
        assert!(row.is_error());
        assert_eq!(row.error_message(), Some("connection refused"));
        assert!(row.status_code().is_none());
        assert!(row.response_body().is_none());
        assert!(c.validators.is_none());
    }

    #[test]
    fn test_incomplete_keeps_status_but_no_body() {
        let c = run(
            FetchOutcome::Incomplete {
                head: head(200, false),
                message: "body truncated".into(),
            },
            &CacheValidators::default(),
        );
        let row = c.row.unwrap();
        assert!(row.is_error());
        assert_eq!(row.status_code(), Some(200));
        assert!(row.response_body_length().is_none());
    }

    #[test]
    fn test_http_error_records_status_line_and_body() {
        let c = run(completed(503, b"try later".to_vec()), &CacheValidators::default());
        assert_eq!(c.status, FetchStatus::Error);
        let row = c.row.unwrap();
        assert_eq!(row.error_message(), Some("HTTP 503 Service Unavailable"));
        assert_eq!(row.response_body(), Some(&b"try later"[..]));
        assert_eq!(row.response_body_length(), Some(9));
    }

    #[test]
    fn test_error_body_dropped_when_policy_says_so() {
        let feed = feed_config("http://example.org/feed");
        let c = classify(
            &feed,
            BodyPolicy { store_on_error: false },
            attempt(),
            &CacheValidators::default(),
            completed(500, b"boom".to_vec()),
        );
        let row = c.row.unwrap();
        assert!(row.response_body().is_none());
        assert!(row.response_body_length().is_none());
    }

    #[test]
    fn test_decode_failure_is_error() {
        let c = run(completed(200, b"<html>".to_vec()), &CacheValidators::default());
        assert_eq!(c.status, FetchStatus::Error);
        let row = c.row.unwrap();
        assert!(row.error_message().is_some());
        assert!(row.response_contents().is_none());
        assert_eq!(row.status_code(), Some(200));
        assert!(c.validators.is_none());
    }

    #[test]
    fn test_not_modified_only_counts_for_conditional_requests() {
        let c = run(
            FetchOutcome::Completed {
                head: head(304, true),
                body: vec![],
            },
            &CacheValidators::default(),
        );
        assert_eq!(c.status, FetchStatus::NotModified);
        assert!(c.row.is_none());

        // An unsolicited 304 is not a success.
        let c = run(completed(304, vec![]), &CacheValidators::default());
        assert_eq!(c.status, FetchStatus::Error);
    }

    #[test]
    fn test_stale_payload_timestamp_is_unchanged() {
        let previous = CacheValidators {
            payload_timestamp: DateTime::from_timestamp(FETCH_TS - 10, 0),
            ..Default::default()
        };
        let c = run(completed(200, sample_feed(FETCH_TS as u64 - 10)), &previous);
        assert_eq!(c.status, FetchStatus::Unchanged);
        assert!(c.row.is_none());
        assert!(c.validators.is_none());

        let c = run(completed(200, sample_feed(FETCH_TS as u64 - 5)), &previous);
        assert_eq!(c.status, FetchStatus::Success);
    }

    #[test]
    fn test_future_previous_timestamp_does_not_suppress() {
        let previous = CacheValidators {
            payload_timestamp: DateTime::from_timestamp(FETCH_TS + 3600, 0),
            ..Default::default()
        };
        let c = run(completed(200, sample_feed(FETCH_TS as u64)), &previous);
        assert_eq!(c.status, FetchStatus::Success);
    }

    #[test]
    fn test_syndication_feed_classified_with_feed_rs() {
        let mut feed = feed_config("http://example.org/alerts.xml");
        feed.format = FeedFormat::Syndication;
        let atom = br#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Alerts</title>
  <id>urn:alerts</id>
  <updated>2025-03-14T15:00:00Z</updated>
  <entry><id>urn:alert:1</id><title>Elevator outage</title><updated>2025-03-14T14:00:00Z</updated></entry>
</feed>"#;
        let c = classify(
            &feed,
            keep_errors(),
            attempt(),
            &CacheValidators::default(),
            completed(200, atom.to_vec()),
        );
        assert_eq!(c.status, FetchStatus::Success);
        assert!(c
            .row
            .unwrap()
            .response_contents()
            .unwrap()
            .contains("Elevator outage"));
    }

    #[test]
    fn test_feed_extensions_reach_response_contents() {
        let mut feed = feed_config("http://example.org/feed");
        let body = nyct_feed(FETCH_TS as u64);

        let plain = classify(
            &feed,
            keep_errors(),
            attempt(),
            &CacheValidators::default(),
            completed(200, body.clone()),
        );
        assert!(!plain.row.unwrap().response_contents().unwrap().contains("nyct_trip_descriptor"));

        feed.extensions.insert(Extension::Nyct);
        let extended = classify(
            &feed,
            keep_errors(),
            attempt(),
            &CacheValidators::default(),
            completed(200, body),
        );
        let row = extended.row.unwrap();
        assert!(row
            .response_contents()
            .unwrap()
            .contains(r#""train_id":"1A 0123+ 242/WTC""#));
    }

    #[test]
    fn test_every_persisted_row_satisfies_invariants() {
        let outcomes = vec![
            completed(200, sample_feed(FETCH_TS as u64)),
            completed(404, b"nope".to_vec()),
            completed(200, b"\xff\xff".to_vec()),
            FetchOutcome::Failed {
                message: "dns".into(),
            },
        ];
        for outcome in outcomes {
            let row = run(outcome, &CacheValidators::default()).row.unwrap();
            if row.is_error() {
                assert!(row.error_message().is_some());
            } else {
                assert!(row.response_body().is_some());
                assert!(row.response_contents().is_some());
            }
            assert_eq!(
                row.response_body_length(),
                row.response_body().map(|b| b.len() as u32)
            );
        }
    }
}
