//! Mocks-file records
//!
//! Typed configuration for the mock-response plugin. Loading happens
//! here; matching lives in the plugin.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::core::error::{ErrorContext, ProxyResult};

/// Root of a mocks file: `{ "$schema"?: ..., "mocks": [...] }`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct MocksFile {
    #[serde(default, rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub mocks: Vec<Mock>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Mock {
    #[validate(nested)]
    pub request: MockRequestMatch,

    #[serde(default)]
    pub response: MockResponseSpec,
}

/// The request side of a mock: what must hold for it to be selected.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MockRequestMatch {
    /// Exact URL or wildcard pattern (`*` spans `/`).
    #[validate(length(min = 1))]
    pub url: String,

    #[serde(default = "MockRequestMatch::default_method")]
    pub method: String,

    /// Case-insensitive substring that must appear in the request body.
    /// GET requests bypass the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_fragment: Option<String>,

    /// 1-based occurrence index: the mock participates only on the nth
    /// qualifying request for its URL key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub nth: Option<u64>,
}

impl MockRequestMatch {
    fn default_method() -> String {
        "GET".to_string()
    }
}

/// The response side of a mock. `body` is an object (served as JSON), a
/// string, or the `"@<relpath>"` sentinel for a file-backed body.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MockResponseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<HeaderEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

/// Order-preserving header entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl MocksFile {
    pub fn load(path: &Path) -> ProxyResult<Self> {
        let text = fs::read_to_string(path)
            .config_context(&format!("unable to read mocks file {}", path.display()))?;
        let file: MocksFile = serde_json::from_str(&text)
            .config_context(&format!("unable to parse mocks file {}", path.display()))?;
        file.validate()?;
        Ok(file)
    }
}
