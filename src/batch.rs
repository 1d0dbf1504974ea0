//! Vendor batch envelope codec
//!
//! A batch request packs several logical HTTP calls into one physical
//! POST whose path ends in `$batch`. Subrequest URLs are relative to the
//! version prefix of the outer URL. The codec is a pure mapping; the
//! random-error and mock-response plugins compose per-subrequest
//! outcomes on top of it.

use std::collections::HashMap;

use http::Uri;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const BATCH_SEGMENT: &str = "$batch";

/// One logical call inside a batch envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequestItem {
    pub id: String,
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchRequestPayload {
    pub requests: Vec<BatchRequestItem>,
}

/// One logical response inside a batch envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResponseItem {
    pub id: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BatchResponsePayload {
    pub responses: Vec<BatchResponseItem>,
}

impl BatchRequestPayload {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

impl BatchResponsePayload {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Whether the outer request targets a batch endpoint.
pub fn is_batch_url(url: &Uri) -> bool {
    url.path()
        .trim_end_matches('/')
        .ends_with(BATCH_SEGMENT)
}

/// Resolve a subrequest URL against the outer batch URL: the outer host
/// and version prefix (the path up to `$batch`) are prepended to
/// relative subrequest paths. Absolute subrequest URLs pass through.
pub fn resolve_item_url(outer: &Uri, item_url: &str) -> String {
    if item_url.starts_with("http://") || item_url.starts_with("https://") {
        return item_url.to_string();
    }
    let scheme = outer.scheme_str().unwrap_or("https");
    let host = outer.host().unwrap_or_default();
    let prefix = outer
        .path()
        .trim_end_matches('/')
        .trim_end_matches(BATCH_SEGMENT)
        .trim_end_matches('/');
    format!(
        "{scheme}://{host}{prefix}/{}",
        item_url.trim_start_matches('/')
    )
}
