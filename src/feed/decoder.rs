use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use prost::Message;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::models::{Extension, FeedFormat};

use super::extensions::{decode_extension, merge};
use super::gtfs_realtime::FeedMessage;

/// A payload decoded into its JSON representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub contents: String,
    /// The payload's own idea of when it was produced, if it carries one.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Decodes `body` in `format`. Extension families in `extensions` are decoded
/// and merged into the GTFS-rt output; all others are skipped.
pub fn decode(
    format: FeedFormat,
    body: &[u8],
    parse_partial: bool,
    extensions: &BTreeSet<Extension>,
) -> Result<Decoded> {
    match format {
        FeedFormat::GtfsRealtime => decode_gtfs_realtime(body, parse_partial, extensions),
        FeedFormat::Syndication => decode_syndication(body),
    }
}

fn decode_gtfs_realtime(
    body: &[u8],
    parse_partial: bool,
    extensions: &BTreeSet<Extension>,
) -> Result<Decoded> {
    let message = FeedMessage::decode(body)?;
    let mut missing = message.missing_required_fields();
    let mut value = serde_json::to_value(&message)?;

    for &extension in extensions {
        let overlay = decode_extension(extension, body)?;
        missing.extend(overlay.missing);
        merge(&mut value, overlay.value);
    }

    if !parse_partial && !missing.is_empty() {
        return Err(AppError::Decode(format!(
            "Message missing required fields: {}",
            missing.join(", ")
        )));
    }

    let timestamp = message
        .header
        .as_ref()
        .and_then(|h| h.timestamp)
        .and_then(|ts| DateTime::from_timestamp(i64::try_from(ts).ok()?, 0));

    strip_absent(&mut value);

    Ok(Decoded {
        contents: serde_json::to_string(&value)?,
        timestamp,
    })
}

fn decode_syndication(body: &[u8]) -> Result<Decoded> {
    let feed = parser::parse(body)?;

    let entries: Vec<Value> = feed
        .entries
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "title": entry.title.as_ref().map(|t| t.content.clone()),
                "links": entry.links.iter().map(|l| l.href.clone()).collect::<Vec<_>>(),
                "summary": entry.summary.as_ref().map(|s| s.content.clone()),
                "published": entry.published.map(|d| d.to_rfc3339()),
                "updated": entry.updated.map(|d| d.to_rfc3339()),
            })
        })
        .collect();

    let mut value = json!({
        "id": feed.id,
        "title": feed.title.as_ref().map(|t| t.content.clone()),
        "updated": feed.updated.map(|d| d.to_rfc3339()),
        "entries": entries,
    });
    strip_absent(&mut value);

    Ok(Decoded {
        contents: serde_json::to_string(&value)?,
        timestamp: feed.updated,
    })
}

/// Drops absent fields so archived JSON only holds what the payload set.
/// Protobuf cannot tell an empty repeated field from an unset one, so empty
/// arrays go too. Empty objects stay: a set but empty message is present.
fn strip_absent(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.values_mut().for_each(strip_absent);
            map.retain(|_, v| !is_absent(v));
        }
        Value::Array(items) => items.iter_mut().for_each(strip_absent),
        _ => {}
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
