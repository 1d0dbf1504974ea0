//! Random-error plugin
//!
//! Fails a configurable fraction of watched requests with a status code
//! drawn from a per-method table. Batch requests fail per subrequest;
//! 429 outcomes register a throttle so the retry-after plugin can
//! punish clients that ignore the header.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use http::StatusCode;
use once_cell::sync::Lazy;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    batch::{self, BatchResponseItem, BatchResponsePayload},
    config::cli::ProxyArgs,
    core::{
        traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult, ProxySession, ThrottlerInfo,
    },
    utils::response::ResponseBuilder,
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "random-error";

/// Candidate error codes per HTTP method. Write methods add 507.
static METHOD_STATUS_CODES: Lazy<HashMap<&'static str, &'static [u16]>> = Lazy::new(|| {
    const READ: &[u16] = &[429, 500, 502, 503, 504];
    const WRITE: &[u16] = &[429, 500, 502, 503, 504, 507];
    HashMap::from([
        ("GET", READ),
        ("POST", WRITE),
        ("PUT", WRITE),
        ("DELETE", WRITE),
        ("PATCH", READ),
    ])
});

pub fn create_random_error_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid random-error plugin config", e))?;
    config.validate()?;
    Ok(Arc::new(RandomErrorPlugin {
        config: RwLock::new(config),
        urls_to_watch: init.urls_to_watch,
    }))
}

/// Configuration for the random-error plugin.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    /// Percentage of requests to fail, 0-100.
    #[validate(range(min = 0, max = 100))]
    rate: u8,

    /// Value advertised (and enforced) with simulated 429s.
    retry_after_seconds: u64,

    /// When non-empty, restricts drawn codes to this set.
    allowed_errors: Vec<u16>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            rate: 50,
            retry_after_seconds: 5,
            allowed_errors: Vec::new(),
        }
    }
}

pub struct RandomErrorPlugin {
    config: RwLock<PluginConfig>,
    urls_to_watch: Arc<WatchList>,
}

impl RandomErrorPlugin {
    fn snapshot(&self) -> PluginConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Codes eligible for a method after the allowed-errors filter.
    fn candidate_codes(config: &PluginConfig, method: &str) -> Vec<u16> {
        let Some(codes) = METHOD_STATUS_CODES.get(method) else {
            return Vec::new();
        };
        codes
            .iter()
            .copied()
            .filter(|c| config.allowed_errors.is_empty() || config.allowed_errors.contains(c))
            .collect()
    }

    fn draw_code(config: &PluginConfig, method: &str) -> Option<StatusCode> {
        let candidates = Self::candidate_codes(config, method);
        candidates
            .choose(&mut rand::thread_rng())
            .and_then(|c| StatusCode::from_u16(*c).ok())
    }

    fn fail_request(&self, session: &mut ProxySession, config: &PluginConfig) {
        let method = session.request.method().as_str().to_string();
        let Some(status) = Self::draw_code(config, &method) else {
            log::debug!("{PLUGIN_NAME}: no candidate errors for {method}, passing through");
            return;
        };

        log::info!(
            "{PLUGIN_NAME}: simulated {status} for {}",
            session.request.url_str()
        );
        let spec = if status == StatusCode::TOO_MANY_REQUESTS {
            session.global().register_throttler(ThrottlerInfo::by_host(
                session.request.host(),
                config.retry_after_seconds,
            ));
            ResponseBuilder::vendor_error(
                status,
                Some(("Retry-After", config.retry_after_seconds)),
            )
        } else {
            ResponseBuilder::vendor_error(status, None)
        };
        session.response.set(spec);
    }

    /// Build a batch response failing every subrequest. Subrequests with
    /// satisfiable dependencies get 424; the rest draw from the method
    /// table. The envelope itself returns 200.
    fn fail_batch(&self, session: &mut ProxySession, config: &PluginConfig) {
        let Some(body) = session.request.body_str() else {
            log::debug!("{PLUGIN_NAME}: batch body is not UTF-8, passing through");
            return;
        };
        let payload = match batch::BatchRequestPayload::parse(body) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("{PLUGIN_NAME}: unable to parse batch envelope: {e}");
                return;
            }
        };

        let known_ids: Vec<&str> = payload.requests.iter().map(|r| r.id.as_str()).collect();
        let mut responses = Vec::with_capacity(payload.requests.len());
        for item in &payload.requests {
            let has_dependencies = item
                .depends_on
                .iter()
                .any(|d| known_ids.contains(&d.as_str()));
            let status = if has_dependencies {
                StatusCode::FAILED_DEPENDENCY
            } else {
                Self::draw_code(config, &item.method.to_uppercase())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            };

            let mut headers = None;
            if status == StatusCode::TOO_MANY_REQUESTS {
                let url = batch::resolve_item_url(session.request.url(), &item.url);
                session.global().register_throttler(ThrottlerInfo::by_url(
                    url,
                    config.retry_after_seconds,
                ));
                headers = Some(HashMap::from([(
                    "Retry-After".to_string(),
                    config.retry_after_seconds.to_string(),
                )]));
            }

            responses.push(BatchResponseItem {
                id: item.id.clone(),
                status: status.as_u16(),
                headers,
                body: Some(ResponseBuilder::vendor_error_body(status)),
            });
        }

        let envelope = BatchResponsePayload { responses };
        session
            .response
            .set(ResponseBuilder::json(StatusCode::OK, &envelope.to_json()));
    }
}

#[async_trait]
impl ProxyPlugin for RandomErrorPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn options_loaded(&self, args: &ProxyArgs) {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        if let Some(rate) = args.failure_rate {
            config.rate = rate;
        }
        if let Some(allowed) = &args.allowed_errors {
            config.allowed_errors = allowed.clone();
        }
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        let config = self.snapshot();
        if config.rate != 100 {
            let roll = rand::thread_rng().gen_range(1..=100u8);
            if roll > config.rate {
                log::debug!("{PLUGIN_NAME}: rolled {roll}, passing request through");
                return Ok(());
            }
        }

        if batch::is_batch_url(session.request.url()) {
            self.fail_batch(session, &config);
        } else {
            self.fail_request(session, &config);
        }
        Ok(())
    }
}
