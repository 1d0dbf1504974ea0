//! Rate-limit plugin
//!
//! A fixed window over a single cost pool: each watched request spends
//! `costPerRequest` from `rateLimit` until the window resets. Past the
//! warning threshold the plugin stashes quota headers in session data
//! and merges them into the upstream response on the way back; an
//! exhausted pool answers 429 (or a configured custom response) without
//! touching upstream.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    config::mocks::MockResponseSpec,
    core::{
        traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult, ProxySession, ResponseSpec,
        ThrottlerInfo,
    },
    utils::response::ResponseBuilder,
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "rate-limit";

/// Sentinel in custom responses replaced with the computed wait.
const DYNAMIC_VALUE: &str = "@dynamic";

pub fn create_rate_limit_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid rate-limit plugin config", e))?;
    config.validate()?;

    let custom_response = match config.when_limit_exceeded {
        LimitExceededBehavior::Throttle => None,
        LimitExceededBehavior::Custom => {
            Some(load_custom_response(init.config_dir, &config.custom_response_file)?)
        }
    };

    Ok(Arc::new(RateLimitPlugin {
        config,
        custom_response,
        window: Mutex::new(WindowState::default()),
        urls_to_watch: init.urls_to_watch,
    }))
}

fn load_custom_response(config_dir: &Path, file: &str) -> ProxyResult<MockResponseSpec> {
    let path = config_dir.join(file);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        ProxyError::Configuration(format!(
            "unable to read custom rate-limit response {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        ProxyError::Configuration(format!(
            "unable to parse custom rate-limit response {}: {e}",
            path.display()
        ))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
enum ResetFormat {
    #[default]
    SecondsLeft,
    UtcEpochSeconds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
enum LimitExceededBehavior {
    #[default]
    Throttle,
    Custom,
}

/// Configuration for the rate-limit plugin.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    /// Cost pool available within one reset window.
    #[validate(range(min = 1))]
    rate_limit: i64,

    /// Cost charged per admitted request.
    #[validate(range(min = 1))]
    cost_per_request: i64,

    /// Window length in seconds.
    #[validate(range(min = 1))]
    reset_window_seconds: i64,

    /// Quota headers are attached once usage crosses this percentage.
    #[validate(range(min = 0, max = 100))]
    warning_threshold_percent: i64,

    header_limit: String,
    header_remaining: String,
    header_reset: String,
    header_retry_after: String,

    reset_format: ResetFormat,
    when_limit_exceeded: LimitExceededBehavior,
    custom_response_file: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            rate_limit: 120,
            cost_per_request: 2,
            reset_window_seconds: 60,
            warning_threshold_percent: 80,
            header_limit: "RateLimit-Limit".to_string(),
            header_remaining: "RateLimit-Remaining".to_string(),
            header_reset: "RateLimit-Reset".to_string(),
            header_retry_after: "Retry-After".to_string(),
            reset_format: ResetFormat::SecondsLeft,
            when_limit_exceeded: LimitExceededBehavior::Throttle,
            custom_response_file: "rate-limit-response.json".to_string(),
        }
    }
}

/// The process-global window pair. `reset_at == None` means
/// uninitialized; the first watched request opens the window.
#[derive(Debug, Default)]
struct WindowState {
    remaining: i64,
    reset_at: Option<DateTime<Utc>>,
}

enum Admission {
    /// Request admitted; quota headers to stash, if past the threshold.
    Admitted(Option<Vec<(String, String)>>),
    /// Pool exhausted; seconds until the window resets.
    Exhausted(u64),
}

pub struct RateLimitPlugin {
    config: PluginConfig,
    custom_response: Option<MockResponseSpec>,
    window: Mutex<WindowState>,
    urls_to_watch: Arc<WatchList>,
}

impl RateLimitPlugin {
    /// Window bookkeeping under the mutex: initialize or reset the
    /// window, spend the request's cost, decide the outcome. Response
    /// emission and throttle registration happen outside the lock.
    fn admit(&self, now: DateTime<Utc>) -> Admission {
        let config = &self.config;
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        let needs_reset = match window.reset_at {
            None => true,
            Some(reset_at) => now > reset_at,
        };
        if needs_reset {
            window.reset_at =
                Some(now + chrono::Duration::seconds(config.reset_window_seconds));
            window.remaining = config.rate_limit;
        }

        window.remaining -= config.cost_per_request;
        let reset_at = window.reset_at.expect("window initialized above");
        let seconds_left = (reset_at - now).num_seconds().max(0) as u64;

        if window.remaining < 0 {
            window.remaining = 0;
            return Admission::Exhausted(seconds_left);
        }

        // remaining <= limit * (1 - threshold/100), in integer math
        let past_threshold = window.remaining * 100
            <= config.rate_limit * (100 - config.warning_threshold_percent);
        if !past_threshold {
            return Admission::Admitted(None);
        }

        let reset_value = match config.reset_format {
            ResetFormat::SecondsLeft => seconds_left.to_string(),
            ResetFormat::UtcEpochSeconds => reset_at.timestamp().to_string(),
        };
        Admission::Admitted(Some(vec![
            (config.header_limit.clone(), config.rate_limit.to_string()),
            (config.header_remaining.clone(), window.remaining.to_string()),
            (config.header_reset.clone(), reset_value),
        ]))
    }

    fn throttle_response(&self, seconds_left: u64) -> ResponseSpec {
        let mut spec = ResponseBuilder::error_envelope(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("Rate limit exceeded. Retry again in {seconds_left} seconds."),
        );
        spec.headers
            .push((self.config.header_retry_after.clone(), seconds_left.to_string()));
        spec
    }

    /// Build the configured custom response, substituting `@dynamic`
    /// header values with the computed wait.
    fn custom_exceeded_response(
        &self,
        custom: &MockResponseSpec,
        seconds_left: u64,
    ) -> ResponseSpec {
        let status = custom
            .status_code
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::TOO_MANY_REQUESTS);
        let mut spec = ResponseSpec::new(status);
        for header in custom.headers.iter().flatten() {
            let value = header
                .value
                .replace(DYNAMIC_VALUE, &seconds_left.to_string());
            spec.headers.push((header.name.clone(), value));
        }
        if let Some(body) = &custom.body {
            spec.body = match body {
                JsonValue::String(s) => Bytes::from(s.clone()),
                other => Bytes::from(other.to_string()),
            };
        }
        spec
    }
}

#[async_trait]
impl ProxyPlugin for RateLimitPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        match self.admit(Utc::now()) {
            Admission::Admitted(None) => {}
            Admission::Admitted(Some(headers)) => {
                session.data.set(PLUGIN_NAME, headers);
            }
            Admission::Exhausted(seconds_left) => {
                log::info!(
                    "{PLUGIN_NAME}: limit exceeded for {}, resets in {seconds_left}s",
                    session.request.url_str()
                );
                session.global().register_throttler(ThrottlerInfo::by_host(
                    session.request.host(),
                    seconds_left,
                ));
                let spec = match &self.custom_response {
                    Some(custom) => self.custom_exceeded_response(custom, seconds_left),
                    None => self.throttle_response(seconds_left),
                };
                session.response.set(spec);
            }
        }
        Ok(())
    }

    async fn before_response(
        &self,
        session: &mut ProxySession,
        response: &mut ResponseSpec,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if !session.is_watched(&self.urls_to_watch) {
            return Ok(());
        }
        let Some(headers) = session.data.remove::<Vec<(String, String)>>(PLUGIN_NAME) else {
            return Ok(());
        };

        if let Some(origin) = session.request.header("origin") {
            let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
            response.merge_headers(&[
                (
                    "access-control-allow-origin".to_string(),
                    origin.to_string(),
                ),
                (
                    "access-control-expose-headers".to_string(),
                    names.join(", "),
                ),
            ]);
        }
        response.merge_headers(&headers);
        Ok(())
    }
}
