//! Latency plugin
//!
//! Suspends the pipeline for a uniform-random delay before the request
//! leaves the proxy. The delay honors the runtime's cancellation token.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    core::{ProxyError, ProxyPlugin, ProxyResult, ProxySession},
    core::traits::PluginInit,
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "latency";

pub fn create_latency_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config = PluginConfig::parse(init.cfg)?;
    Ok(Arc::new(LatencyPlugin {
        config,
        urls_to_watch: init.urls_to_watch,
    }))
}

/// Configuration for the latency plugin.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    /// Lower bound of the injected delay in milliseconds.
    min_ms: u64,

    /// Upper bound of the injected delay in milliseconds.
    max_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            min_ms: 0,
            max_ms: 5000,
        }
    }
}

impl PluginConfig {
    fn parse(cfg: serde_json::Value) -> ProxyResult<Self> {
        let config: PluginConfig = serde_json::from_value(cfg)
            .map_err(|e| ProxyError::serialization_error("Invalid latency plugin config", e))?;
        if config.min_ms > config.max_ms {
            return Err(ProxyError::Configuration(
                "latency minMs must not exceed maxMs".to_string(),
            ));
        }
        Ok(config)
    }
}

pub struct LatencyPlugin {
    config: PluginConfig,
    urls_to_watch: Arc<WatchList>,
}

#[async_trait]
impl ProxyPlugin for LatencyPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        token: &CancellationToken,
    ) -> ProxyResult<()> {
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        let delay_ms = if self.config.min_ms == self.config.max_ms {
            self.config.min_ms
        } else {
            rand::thread_rng().gen_range(self.config.min_ms..=self.config.max_ms)
        };
        if delay_ms == 0 {
            return Ok(());
        }

        log::debug!("{PLUGIN_NAME}: delaying request by {delay_ms}ms");
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ProxyError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => Ok(()),
        }
    }
}
