//! Value helpers available to migration scripts
//!
//! Sentinel values travel inside documents as tagged JSON objects and are
//! materialized by the backend at write time: a real backend adapter maps
//! them to its wire sentinels, the in-memory backend resolves them directly.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value as JsonValue};

/// Tag key marking a sentinel value inside a document
pub const SENTINEL_KEY: &str = "__driftway_sentinel__";

/// Sentinel requesting deletion of the field it is assigned to
pub fn delete_field() -> JsonValue {
    json!({ SENTINEL_KEY: "delete" })
}

/// Sentinel resolved to the backend's commit timestamp
pub fn server_timestamp() -> JsonValue {
    json!({ SENTINEL_KEY: "server_timestamp" })
}

/// Which sentinel, if any, a value carries
pub fn sentinel_of(value: &JsonValue) -> Option<&str> {
    value.get(SENTINEL_KEY).and_then(JsonValue::as_str)
}

/// Builder for dotted field paths, escaping nothing: segments are joined
/// verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new(segment: impl Into<String>) -> Self {
        Self {
            segments: vec![segment.into()],
        }
    }

    pub fn append(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Timestamp constructor exposed to scripts; serializes as RFC 3339
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    pub fn to_value(self) -> JsonValue {
        JsonValue::String(self.0.to_rfc3339())
    }
}
