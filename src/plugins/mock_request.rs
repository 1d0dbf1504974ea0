//! Mock-request plugin
//!
//! Issues one proxy-initiated outbound HTTP call when the mock-request
//! lifecycle event fires. The call is described by a small JSON file;
//! send failures are logged, never propagated into the pipeline.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::{
    config::mocks::HeaderEntry,
    core::{traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult},
};

pub const PLUGIN_NAME: &str = "mock-request";

pub fn create_mock_request_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid mock-request plugin config", e))?;
    let file = MockRequestFile::load(&init.config_dir.join(&config.mock_file))?;
    Ok(Arc::new(MockRequestPlugin {
        spec: file.request,
        client: reqwest::Client::new(),
    }))
}

/// Configuration for the mock-request plugin.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    mock_file: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            mock_file: "mock-request.json".to_string(),
        }
    }
}

/// `{ "request": { "url", "method", "headers"?, "body"? } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockRequestFile {
    request: MockRequestSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockRequestSpec {
    url: String,

    #[serde(default = "MockRequestSpec::default_method")]
    method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    headers: Option<Vec<HeaderEntry>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<JsonValue>,
}

impl MockRequestSpec {
    fn default_method() -> String {
        "POST".to_string()
    }
}

impl MockRequestFile {
    fn load(path: &Path) -> ProxyResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Configuration(format!(
                "unable to read mock-request file {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ProxyError::Configuration(format!(
                "unable to parse mock-request file {}: {e}",
                path.display()
            ))
        })
    }
}

pub struct MockRequestPlugin {
    spec: MockRequestSpec,
    client: reqwest::Client,
}

#[async_trait]
impl ProxyPlugin for MockRequestPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn mock_request(&self, token: &CancellationToken) -> ProxyResult<()> {
        let method = self
            .spec
            .method
            .parse::<reqwest::Method>()
            .unwrap_or(reqwest::Method::POST);
        let mut request = self.client.request(method, &self.spec.url);
        for header in self.spec.headers.iter().flatten() {
            request = request.header(&header.name, &header.value);
        }
        if let Some(body) = &self.spec.body {
            request = request.json(body);
        }

        log::info!("{PLUGIN_NAME}: sending {} {}", self.spec.method, self.spec.url);
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ProxyError::Cancelled),
            outcome = request.send() => outcome,
        };
        match outcome {
            Ok(response) => {
                log::info!("{PLUGIN_NAME}: received {}", response.status());
            }
            Err(e) => {
                log::error!("{PLUGIN_NAME}: request failed: {e}");
            }
        }
        Ok(())
    }
}
