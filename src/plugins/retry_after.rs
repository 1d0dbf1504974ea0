//! Retry-after plugin
//!
//! Enforces the `Retry-After` values other plugins hand out: clients
//! that come back before an active throttle expires get a synthetic 429
//! and the throttle window slides forward, so back-to-back violators
//! keep getting rejected. Expired throttles are pruned before
//! consultation, inside the same critical section.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        state::ThrottleVerdict, traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult,
        ProxySession,
    },
    utils::response::ResponseBuilder,
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "retry-after";

pub fn create_retry_after_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid retry-after plugin config", e))?;
    let vendor_hosts = WatchList::compile(&config.vendor_error_hosts)?;
    Ok(Arc::new(RetryAfterPlugin {
        vendor_hosts,
        urls_to_watch: init.urls_to_watch,
    }))
}

/// Configuration for the retry-after plugin.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    /// Host patterns that get the vendor-conventional error envelope on
    /// rejection instead of the minimal one.
    vendor_error_hosts: Vec<String>,
}

pub struct RetryAfterPlugin {
    vendor_hosts: WatchList,
    urls_to_watch: Arc<WatchList>,
}

impl RetryAfterPlugin {
    /// Prune expired entries, then evaluate the rest. Both steps run
    /// under the registry lock so they are atomic with respect to other
    /// appenders. A violating request slides the entry's reset forward.
    fn check_throttles(&self, session: &ProxySession) -> Option<ThrottleVerdict> {
        let now = Utc::now();
        let mut throttles = session.global().lock_throttles();
        throttles.retain(|t| t.reset_at >= now);

        for throttler in throttles.iter_mut() {
            let verdict = (throttler.predicate)(&session.request, &throttler.key);
            if verdict.throttle_for_seconds > 0 {
                throttler.reset_at =
                    now + chrono::Duration::seconds(verdict.throttle_for_seconds as i64);
                return Some(verdict);
            }
        }
        None
    }
}

#[async_trait]
impl ProxyPlugin for RetryAfterPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if session.request.method() == Method::OPTIONS {
            return Ok(());
        }
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        let Some(verdict) = self.check_throttles(session) else {
            return Ok(());
        };

        let seconds = verdict.throttle_for_seconds;
        log::info!(
            "{PLUGIN_NAME}: request to {} arrived before its retry window, rejecting for {seconds}s",
            session.request.url_str()
        );

        let spec = if self.vendor_hosts.matches(session.request.host()) {
            ResponseBuilder::vendor_error(
                StatusCode::TOO_MANY_REQUESTS,
                Some((verdict.retry_after_header.as_str(), seconds)),
            )
        } else {
            let mut spec = ResponseBuilder::error_envelope(
                StatusCode::TOO_MANY_REQUESTS,
                &format!("Request throttled. Retry again in {seconds} seconds."),
            );
            spec.headers
                .push((verdict.retry_after_header.clone(), seconds.to_string()));
            spec
        };
        session.response.set(spec);
        Ok(())
    }
}
