//! Synthetic response builders
//!
//! One place assembles every `ResponseSpec` the plugins emit: plain
//! JSON, the minimal `{"error":{"message":...}}` envelope, and the
//! vendor-conventional error envelope with `code`/`message`/`innerError`
//! that SDK clients parse.

use bytes::Bytes;
use chrono::Utc;
use http::StatusCode;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::core::event::ResponseSpec;

pub mod content_type {
    pub const APPLICATION_JSON: &str = "application/json";
    pub const TEXT_PLAIN: &str = "text/plain";
}

pub struct ResponseBuilder;

impl ResponseBuilder {
    pub fn empty(status: StatusCode) -> ResponseSpec {
        ResponseSpec::new(status)
    }

    pub fn text(status: StatusCode, body: &str) -> ResponseSpec {
        ResponseSpec {
            status,
            headers: vec![(
                "content-type".to_string(),
                content_type::TEXT_PLAIN.to_string(),
            )],
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn json(status: StatusCode, body: &JsonValue) -> ResponseSpec {
        ResponseSpec {
            status,
            headers: vec![(
                "content-type".to_string(),
                content_type::APPLICATION_JSON.to_string(),
            )],
            body: Bytes::from(body.to_string()),
        }
    }

    /// Minimal error envelope used when no vendor shape applies.
    pub fn error_envelope(status: StatusCode, message: &str) -> ResponseSpec {
        Self::json(status, &json!({ "error": { "message": message } }))
    }

    /// Vendor-conventional error envelope body.
    pub fn vendor_error_body(status: StatusCode) -> JsonValue {
        json!({
            "error": {
                "code": error_code(status),
                "message": "Simulated error generated by the proxy",
                "innerError": {
                    "requestId": Uuid::new_v4().to_string(),
                    "date": Utc::now().to_rfc3339(),
                }
            }
        })
    }

    /// Vendor error response, optionally carrying a retry-after header.
    pub fn vendor_error(
        status: StatusCode,
        retry_after: Option<(&str, u64)>,
    ) -> ResponseSpec {
        let mut spec = Self::json(status, &Self::vendor_error_body(status));
        if let Some((header, seconds)) = retry_after {
            spec.headers
                .push((header.to_string(), seconds.to_string()));
        }
        spec
    }
}

/// Space-separated error code for a status, e.g. 429 -> "Too Many
/// Requests". Statuses without a canonical reason fall back to the
/// numeric code.
pub fn error_code(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string())
}

/// CORS reflection for synthetic responses: echo the request origin.
pub fn cors_headers(origin: &str) -> Vec<(String, String)> {
    vec![(
        "access-control-allow-origin".to_string(),
        origin.to_string(),
    )]
}
