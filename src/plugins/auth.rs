//! Auth plugin
//!
//! Guards watched requests behind either an API key (extracted from a
//! configured header, query parameter, or cookie and checked against an
//! allow-list) or an OAuth2 bearer token validated against fetched OIDC
//! metadata with optional tenant/application/principal/role/scope
//! filters. Failures answer a fixed 401 envelope.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    core::{
        traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult, ProxySession, RequestEvent,
    },
    utils::{
        oidc::{TokenValidationOptions, TokenValidator},
        request::{bearer_token, get_cookie_value, get_query_value},
        response::ResponseBuilder,
    },
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "auth";

pub fn create_auth_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid auth plugin config", e))?;
    config.validate()?;
    match config.kind {
        AuthKind::ApiKey if config.api_key.is_none() => {
            return Err(ProxyError::Configuration(
                "auth type apiKey requires an apiKey section".to_string(),
            ));
        }
        AuthKind::OAuth2 if config.oauth2.is_none() => {
            return Err(ProxyError::Configuration(
                "auth type oauth2 requires an oauth2 section".to_string(),
            ));
        }
        _ => {}
    }
    Ok(Arc::new(AuthPlugin {
        config,
        validator: RwLock::new(None),
        enabled: AtomicBool::new(true),
        urls_to_watch: init.urls_to_watch,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum AuthKind {
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "oauth2")]
    OAuth2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum KeyLocation {
    Header,
    Query,
    Cookie,
}

/// Where to look for the API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyParameter {
    #[serde(rename = "in")]
    location: KeyLocation,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct ApiKeyConfig {
    #[validate(length(min = 1))]
    parameters: Vec<ApiKeyParameter>,

    #[validate(length(min = 1))]
    allowed_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct OAuth2Config {
    #[validate(length(min = 1))]
    metadata_url: String,

    #[serde(default)]
    allowed_audiences: Vec<String>,

    #[serde(default)]
    allowed_tenants: Vec<String>,

    #[serde(default)]
    allowed_applications: Vec<String>,

    #[serde(default)]
    allowed_principals: Vec<String>,

    #[serde(default)]
    roles: Vec<String>,

    #[serde(default)]
    scopes: Vec<String>,

    #[serde(default = "default_true")]
    validate_issuer: bool,

    #[serde(default = "default_true")]
    validate_lifetime: bool,

    #[serde(default = "default_true")]
    validate_signing_key: bool,
}

fn default_true() -> bool {
    true
}

impl OAuth2Config {
    fn validation_options(&self) -> TokenValidationOptions {
        TokenValidationOptions {
            audiences: self.allowed_audiences.clone(),
            validate_issuer: self.validate_issuer,
            validate_audience: !self.allowed_audiences.is_empty(),
            validate_lifetime: self.validate_lifetime,
            validate_signing_key: self.validate_signing_key,
            roles: self.roles.clone(),
            scopes: self.scopes.clone(),
            allowed_tenants: self.allowed_tenants.clone(),
            allowed_applications: self.allowed_applications.clone(),
            allowed_principals: self.allowed_principals.clone(),
        }
    }
}

/// Configuration for the auth plugin.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PluginConfig {
    #[serde(rename = "type")]
    kind: AuthKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    api_key: Option<ApiKeyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    oauth2: Option<OAuth2Config>,
}

pub struct AuthPlugin {
    config: PluginConfig,
    validator: RwLock<Option<TokenValidator>>,
    enabled: AtomicBool,
    urls_to_watch: Arc<WatchList>,
}

impl AuthPlugin {
    fn check_api_key(&self, config: &ApiKeyConfig, request: &RequestEvent) -> bool {
        for parameter in &config.parameters {
            let value = match parameter.location {
                KeyLocation::Header => request.header(&parameter.name),
                KeyLocation::Query => get_query_value(request.url(), &parameter.name),
                KeyLocation::Cookie => get_cookie_value(request.headers(), &parameter.name),
            };
            if let Some(value) = value {
                if config.allowed_keys.iter().any(|k| k == value) {
                    return true;
                }
                log::debug!(
                    "{PLUGIN_NAME}: key from {:?} {} not in allow-list",
                    parameter.location,
                    parameter.name
                );
            }
        }
        false
    }

    fn check_oauth2(&self, config: &OAuth2Config, request: &RequestEvent) -> bool {
        let Some(token) = bearer_token(request.headers()) else {
            log::debug!("{PLUGIN_NAME}: no bearer token on {}", request.url_str());
            return false;
        };
        let validator = self.validator.read().unwrap_or_else(|e| e.into_inner());
        let Some(validator) = validator.as_ref() else {
            return false;
        };
        match validator.validate(token, &config.validation_options()) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("{PLUGIN_NAME}: token rejected: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl ProxyPlugin for AuthPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn init(&self, _token: &CancellationToken) -> ProxyResult<()> {
        let Some(oauth2) = (self.config.kind == AuthKind::OAuth2)
            .then_some(self.config.oauth2.as_ref())
            .flatten()
        else {
            return Ok(());
        };
        let validator = TokenValidator::discover(&oauth2.metadata_url).await?;
        *self.validator.write().unwrap_or_else(|e| e.into_inner()) = Some(validator);
        Ok(())
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        let authorized = match self.config.kind {
            AuthKind::ApiKey => self
                .config
                .api_key
                .as_ref()
                .map(|c| self.check_api_key(c, &session.request))
                .unwrap_or(false),
            AuthKind::OAuth2 => self
                .config
                .oauth2
                .as_ref()
                .map(|c| self.check_oauth2(c, &session.request))
                .unwrap_or(false),
        };
        if authorized {
            return Ok(());
        }

        let mut spec = ResponseBuilder::error_envelope(StatusCode::UNAUTHORIZED, "Unauthorized");
        if let Some(origin) = session.request.header("origin") {
            spec.merge_headers(&[(
                "access-control-allow-origin".to_string(),
                origin.to_string(),
            )]);
        }
        session.response.set(spec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use serde_json::json;

    fn api_key_plugin() -> AuthPlugin {
        let config: PluginConfig = serde_json::from_value(json!({
            "type": "apiKey",
            "apiKey": {
                "parameters": [
                    { "in": "header", "name": "x-api-key" },
                    { "in": "query", "name": "api-key" },
                    { "in": "cookie", "name": "api_key" }
                ],
                "allowedKeys": ["secret-1", "secret-2"]
            }
        }))
        .unwrap();
        AuthPlugin {
            config,
            validator: RwLock::new(None),
            enabled: AtomicBool::new(true),
            urls_to_watch: Arc::new(WatchList::compile(&["https://*".to_string()]).unwrap()),
        }
    }

    fn session_for(url: &str, headers: HeaderMap) -> ProxySession {
        ProxySession::new(
            RequestEvent::new(Method::GET, url.parse().unwrap(), headers, Bytes::new()),
            Arc::new(crate::core::GlobalState::default()),
        )
    }

    async fn run(plugin: &AuthPlugin, session: &mut ProxySession) {
        plugin
            .before_request(session, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_key_from_header_passes() {
        let plugin = api_key_plugin();
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret-1".parse().unwrap());
        let mut s = session_for("https://api.example.com/x", headers);
        run(&plugin, &mut s).await;
        assert!(!s.response.has_been_set());
    }

    #[tokio::test]
    async fn test_key_from_query_and_cookie_pass() {
        let plugin = api_key_plugin();

        let mut s = session_for("https://api.example.com/x?api-key=secret-2", HeaderMap::new());
        run(&plugin, &mut s).await;
        assert!(!s.response.has_been_set());

        let mut headers = HeaderMap::new();
        headers.insert("cookie", "api_key=secret-1".parse().unwrap());
        let mut s = session_for("https://api.example.com/x", headers);
        run(&plugin, &mut s).await;
        assert!(!s.response.has_been_set());
    }

    #[tokio::test]
    async fn test_missing_or_unknown_key_rejected() {
        let plugin = api_key_plugin();

        let mut s = session_for("https://api.example.com/x", HeaderMap::new());
        run(&plugin, &mut s).await;
        assert_eq!(
            s.response.spec().unwrap().status,
            StatusCode::UNAUTHORIZED
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "wrong".parse().unwrap());
        let mut s = session_for("https://api.example.com/x", headers);
        run(&plugin, &mut s).await;
        let spec = s.response.spec().unwrap();
        assert_eq!(spec.status, StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_slice(&spec.body).unwrap();
        assert_eq!(body["error"]["message"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_rejection_reflects_origin_for_cors() {
        let plugin = api_key_plugin();
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://app.example.com".parse().unwrap());
        let mut s = session_for("https://api.example.com/x", headers);
        run(&plugin, &mut s).await;
        assert_eq!(
            s.response.spec().unwrap().header("access-control-allow-origin"),
            Some("https://app.example.com")
        );
    }

    #[tokio::test]
    async fn test_oauth2_without_validator_rejects() {
        let config: PluginConfig = serde_json::from_value(json!({
            "type": "oauth2",
            "oauth2": {
                "metadataUrl": "https://login.example.com/.well-known/openid-configuration"
            }
        }))
        .unwrap();
        let plugin = AuthPlugin {
            config,
            validator: RwLock::new(None),
            enabled: AtomicBool::new(true),
            urls_to_watch: Arc::new(WatchList::compile(&["https://*".to_string()]).unwrap()),
        };
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        let mut s = session_for("https://api.example.com/x", headers);
        run(&plugin, &mut s).await;
        assert_eq!(s.response.spec().unwrap().status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_factory_requires_matching_section() {
        let init = PluginInit {
            cfg: json!({ "type": "apiKey" }),
            urls_to_watch: Arc::new(WatchList::default()),
            config_dir: std::path::Path::new("."),
        };
        assert!(create_auth_plugin(init).is_err());
    }
}
