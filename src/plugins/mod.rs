//! Plugin registry
//!
//! Maps configured plugin names to their factory functions. Order of
//! execution is the configured order, not anything encoded here.

pub mod auth;
pub mod crud_api;
pub mod latency;
pub mod mock_request;
pub mod mock_response;
pub mod random_error;
pub mod rate_limit;
pub mod retry_after;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;

use crate::core::{
    error::{ProxyError, ProxyResult},
    traits::{PluginCreateFn, PluginInit, ProxyPlugin},
};

/// Global registry mapping plugin names to their factory functions.
static PLUGIN_BUILDER_REGISTRY: Lazy<HashMap<&'static str, PluginCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, PluginCreateFn)> = vec![
        (latency::PLUGIN_NAME, latency::create_latency_plugin),
        (
            random_error::PLUGIN_NAME,
            random_error::create_random_error_plugin,
        ),
        (
            retry_after::PLUGIN_NAME,
            retry_after::create_retry_after_plugin,
        ),
        (rate_limit::PLUGIN_NAME, rate_limit::create_rate_limit_plugin),
        (
            mock_response::PLUGIN_NAME,
            mock_response::create_mock_response_plugin,
        ),
        (
            mock_request::PLUGIN_NAME,
            mock_request::create_mock_request_plugin,
        ),
        (crud_api::PLUGIN_NAME, crud_api::create_crud_api_plugin),
        (auth::PLUGIN_NAME, auth::create_auth_plugin),
    ];
    arr.into_iter().collect()
});

/// Create a plugin instance from configuration. Fails fast for unknown
/// plugin names or configuration parsing failures.
pub fn build_plugin(name: &str, init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let builder = PLUGIN_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| ProxyError::Configuration(format!("unknown plugin type {name}")))?;
    builder(init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::WatchList;
    use serde_json::json;
    use std::path::Path;

    #[test]
    fn test_unknown_plugin_name_fails() {
        let init = PluginInit {
            cfg: json!({}),
            urls_to_watch: Arc::new(WatchList::default()),
            config_dir: Path::new("."),
        };
        let err = match build_plugin("no-such-plugin", init) {
            Err(e) => e,
            Ok(_) => panic!("expected build_plugin to fail"),
        };
        assert!(matches!(err, ProxyError::Configuration(_)));
    }

    #[test]
    fn test_known_plugin_builds_with_empty_section() {
        let init = PluginInit {
            cfg: json!({}),
            urls_to_watch: Arc::new(WatchList::default()),
            config_dir: Path::new("."),
        };
        let plugin = build_plugin("latency", init).unwrap();
        assert_eq!(plugin.name(), "latency");
    }
}
