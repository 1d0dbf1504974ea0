//! CRUD-API plugin
//!
//! Emulates a REST API over an in-memory JSON document. Configured
//! actions pair a URL template (with `{param}` captures) with a JSONPath
//! query into the document; the plugin routes watched requests to the
//! first matching action and serializes every document operation under
//! one mutex. Optionally enforces entra bearer tokens per API or per
//! action.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, RwLock,
};

use async_trait::async_trait;
use http::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::{
    config::crud::{CrudActionType, CrudApiFile, CrudAuthType},
    core::{
        traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult, ProxySession, RequestEvent,
        ResponseSpec,
    },
    utils::{
        oidc::TokenValidator,
        request::{bearer_token, percent_decode, url_without_query},
        response::ResponseBuilder,
    },
    watch::WatchList,
};

pub const PLUGIN_NAME: &str = "crud-api";

static TEMPLATE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("literal pattern"));

pub fn create_crud_api_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid crud-api plugin config", e))?;
    config.validate()?;

    let api_path = init.config_dir.join(&config.api_file);
    let api = CrudApiFile::load(&api_path)?;
    let data_dir = api_path.parent().unwrap_or(init.config_dir);
    let data_path = data_dir.join(&api.data_file);
    let data_text = std::fs::read_to_string(&data_path).map_err(|e| {
        ProxyError::Configuration(format!(
            "unable to read data file {}: {e}",
            data_path.display()
        ))
    })?;
    let data: JsonValue = serde_json::from_str(&data_text).map_err(|e| {
        ProxyError::Configuration(format!(
            "unable to parse data file {}: {e}",
            data_path.display()
        ))
    })?;

    Ok(Arc::new(CrudApiPlugin::assemble(
        api,
        data,
        init.urls_to_watch,
    )?))
}

/// Configuration for the CRUD-API plugin.
#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PluginConfig {
    /// Path to the API definition file, relative to the config file.
    #[validate(length(min = 1))]
    api_file: String,
}

/// An action with its route template compiled.
struct CompiledAction {
    kind: CrudActionType,
    method: Method,
    route: Regex,
    /// Capture group name paired with the original `{param}` name.
    params: Vec<(String, String)>,
    query: String,
    auth: Option<CrudAuthType>,
}

pub struct CrudApiPlugin {
    api: CrudApiFile,
    actions: Vec<CompiledAction>,
    allow_methods: String,
    data: Mutex<JsonValue>,
    validator: RwLock<Option<TokenValidator>>,
    needs_auth: bool,
    enabled: AtomicBool,
    urls_to_watch: Arc<WatchList>,
}

/// Collapse duplicate slashes everywhere but in the scheme separator.
fn collapse_slashes(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let mut collapsed = String::with_capacity(rest.len());
            let mut prev_slash = false;
            for c in rest.chars() {
                if c == '/' {
                    if prev_slash {
                        continue;
                    }
                    prev_slash = true;
                } else {
                    prev_slash = false;
                }
                collapsed.push(c);
            }
            format!("{scheme}://{collapsed}")
        }
        None => url.to_string(),
    }
}

/// Translate a URL template into an anchored regex where every `{param}`
/// becomes a named capture group (`-` is not a valid group-name char and
/// maps to `_`).
fn template_to_route(template: &str) -> ProxyResult<(Regex, Vec<(String, String)>)> {
    let mut pattern = String::from("^");
    let mut params = Vec::new();
    let mut last = 0;
    for caps in TEMPLATE_PARAM.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = caps.get(1).expect("group 1 in pattern").as_str();
        let group = name.replace('-', "_");
        pattern.push_str(&regex::escape(&template[last..whole.start()]));
        pattern.push_str(&format!("(?P<{group}>[^/]+)"));
        params.push((group, name.to_string()));
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&template[last..]));
    pattern.push('$');

    let route = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            ProxyError::Configuration(format!("invalid action url template {template}: {e}"))
        })?;
    Ok((route, params))
}

/// Deep-merge `patch` into `target`: objects merge recursively, anything
/// else in the patch replaces the target value.
fn merge_json(target: JsonValue, patch: JsonValue) -> JsonValue {
    match (target, patch) {
        (JsonValue::Object(mut base), JsonValue::Object(patch)) => {
            for (key, value) in patch {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            JsonValue::Object(base)
        }
        (_, patch) => patch,
    }
}

impl CrudApiPlugin {
    fn assemble(
        api: CrudApiFile,
        data: JsonValue,
        urls_to_watch: Arc<WatchList>,
    ) -> ProxyResult<Self> {
        let mut actions = Vec::with_capacity(api.actions.len());
        let mut methods = Vec::new();
        for action in &api.actions {
            let template = if action.url.is_empty() {
                api.base_url.clone()
            } else {
                collapse_slashes(&format!(
                    "{}/{}",
                    api.base_url.trim_end_matches('/'),
                    action.url.trim_start_matches('/')
                ))
            };
            let (route, params) = template_to_route(&template)?;
            let method = match &action.method {
                Some(m) => m.parse::<Method>().map_err(|e| {
                    ProxyError::Configuration(format!("invalid action method {m}: {e}"))
                })?,
                None => action.action.default_method(),
            };
            if !methods.contains(&method) {
                methods.push(method.clone());
            }
            actions.push(CompiledAction {
                kind: action.action,
                method,
                route,
                params,
                query: action.query.clone(),
                auth: action.auth,
            });
        }

        let needs_auth = api.auth == CrudAuthType::Entra
            || api.actions.iter().any(|a| a.auth == Some(CrudAuthType::Entra));
        if needs_auth && api.entra_auth_config.is_none() {
            return Err(ProxyError::Configuration(
                "entra auth requires entraAuthConfig".to_string(),
            ));
        }

        let allow_methods = methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            api,
            actions,
            allow_methods,
            data: Mutex::new(data),
            validator: RwLock::new(None),
            needs_auth,
            enabled: AtomicBool::new(true),
            urls_to_watch,
        })
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.to_lowercase()
            .starts_with(&self.api.base_url.to_lowercase())
    }

    /// First matching action wins; captured parameters are URL-decoded.
    fn match_action(&self, method: &Method, url: &str) -> Option<(&CompiledAction, Vec<(String, String)>)> {
        for action in &self.actions {
            if &action.method != method {
                continue;
            }
            if let Some(caps) = action.route.captures(url) {
                let params = action
                    .params
                    .iter()
                    .filter_map(|(group, original)| {
                        caps.name(group)
                            .map(|m| (original.clone(), percent_decode(m.as_str())))
                    })
                    .collect();
                return Some((action, params));
            }
        }
        None
    }

    fn substituted_query(&self, action: &CompiledAction, params: &[(String, String)]) -> String {
        let mut query = action.query.clone();
        for (name, value) in params {
            let sanitized = value.replace('\'', "\\'");
            query = query.replace(&format!("{{{name}}}"), &sanitized);
        }
        query
    }

    fn authorize(&self, action: &CompiledAction, request: &RequestEvent) -> bool {
        let effective = action.auth.unwrap_or(self.api.auth);
        if effective == CrudAuthType::None {
            return true;
        }
        let Some(token) = bearer_token(request.headers()) else {
            log::debug!("{PLUGIN_NAME}: no bearer token on {}", request.url_str());
            return false;
        };
        let validator = self.validator.read().unwrap_or_else(|e| e.into_inner());
        let Some(validator) = validator.as_ref() else {
            return false;
        };
        let options = self
            .api
            .entra_auth_config
            .as_ref()
            .map(|c| c.validation_options())
            .unwrap_or_default();
        match validator.validate(token, &options) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("{PLUGIN_NAME}: token rejected: {e}");
                false
            }
        }
    }

    fn with_cors(&self, mut spec: ResponseSpec, request: &RequestEvent) -> ResponseSpec {
        if self.api.enable_cors {
            if let Some(origin) = request.header("origin") {
                spec.merge_headers(&[(
                    "access-control-allow-origin".to_string(),
                    origin.to_string(),
                )]);
            }
        }
        spec
    }

    fn preflight_response(&self, origin: &str) -> ResponseSpec {
        let mut spec = ResponseSpec::new(StatusCode::NO_CONTENT);
        spec.headers.push((
            "access-control-allow-origin".to_string(),
            origin.to_string(),
        ));
        let allow_headers = if self.needs_auth {
            "authorization, content-type"
        } else {
            "content-type"
        };
        spec.headers.push((
            "access-control-allow-headers".to_string(),
            allow_headers.to_string(),
        ));
        spec.headers.push((
            "access-control-allow-methods".to_string(),
            self.allow_methods.clone(),
        ));
        spec
    }

    /// Run the document operation. `None` means the request passes
    /// through unchanged (parse errors, unroutable bodies).
    fn execute(
        &self,
        action: &CompiledAction,
        params: &[(String, String)],
        request: &RequestEvent,
    ) -> Option<ResponseSpec> {
        let path = self.substituted_query(action, params);
        let mut doc = self.data.lock().unwrap_or_else(|e| e.into_inner());

        match action.kind {
            CrudActionType::Create => {
                let Some(body) = request.body_json() else {
                    log::debug!("{PLUGIN_NAME}: create body is not JSON, passing through");
                    return None;
                };
                let JsonValue::Array(items) = &mut *doc else {
                    log::debug!("{PLUGIN_NAME}: document root is not an array, passing through");
                    return None;
                };
                items.push(body.clone());
                Some(ResponseBuilder::json(StatusCode::CREATED, &body))
            }
            CrudActionType::GetAll => Some(ResponseBuilder::json(StatusCode::OK, &doc)),
            CrudActionType::GetOne => match select(&doc, &path)? {
                tokens if tokens.is_empty() => Some(ResponseBuilder::empty(StatusCode::NOT_FOUND)),
                tokens => Some(ResponseBuilder::json(StatusCode::OK, tokens[0])),
            },
            CrudActionType::GetMany => {
                let tokens = select(&doc, &path)?;
                let items: Vec<JsonValue> = tokens.into_iter().cloned().collect();
                Some(ResponseBuilder::json(StatusCode::OK, &JsonValue::Array(items)))
            }
            CrudActionType::Merge | CrudActionType::Update => {
                let Some(body) = request.body_json() else {
                    log::debug!("{PLUGIN_NAME}: request body is not JSON, passing through");
                    return None;
                };
                if select(&doc, &path)?.is_empty() {
                    return Some(ResponseBuilder::empty(StatusCode::NOT_FOUND));
                }
                let merge = action.kind == CrudActionType::Merge;
                let updated = jsonpath_lib::replace_with(doc.clone(), &path, &mut |token| {
                    Some(if merge {
                        merge_json(token, body.clone())
                    } else {
                        body.clone()
                    })
                });
                match updated {
                    Ok(new_doc) => {
                        *doc = new_doc;
                        Some(ResponseBuilder::empty(StatusCode::NO_CONTENT))
                    }
                    Err(e) => {
                        log::debug!("{PLUGIN_NAME}: JSONPath replace failed for {path}: {e}");
                        None
                    }
                }
            }
            CrudActionType::Delete => {
                if select(&doc, &path)?.is_empty() {
                    return Some(ResponseBuilder::empty(StatusCode::NOT_FOUND));
                }
                match jsonpath_lib::delete(doc.clone(), &path) {
                    Ok(new_doc) => {
                        // delete() nulls matched nodes; the document root
                        // is an ordered array, so drop the holes.
                        *doc = match new_doc {
                            JsonValue::Array(items) => JsonValue::Array(
                                items.into_iter().filter(|v| !v.is_null()).collect(),
                            ),
                            other => other,
                        };
                        Some(ResponseBuilder::empty(StatusCode::NO_CONTENT))
                    }
                    Err(e) => {
                        log::debug!("{PLUGIN_NAME}: JSONPath delete failed for {path}: {e}");
                        None
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn document(&self) -> JsonValue {
        self.data.lock().unwrap().clone()
    }
}

/// JSONPath select with the per-request error policy applied: a bad
/// path logs at debug and the request passes through.
fn select<'a>(doc: &'a JsonValue, path: &str) -> Option<Vec<&'a JsonValue>> {
    match jsonpath_lib::select(doc, path) {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            log::debug!("{PLUGIN_NAME}: JSONPath select failed for {path}: {e}");
            None
        }
    }
}

#[async_trait]
impl ProxyPlugin for CrudApiPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn init(&self, _token: &CancellationToken) -> ProxyResult<()> {
        if !self.needs_auth {
            return Ok(());
        }
        let metadata_url = self
            .api
            .entra_auth_config
            .as_ref()
            .map(|c| c.metadata_url.clone())
            .ok_or_else(|| {
                ProxyError::Configuration("entra auth requires entraAuthConfig".to_string())
            })?;
        let validator = TokenValidator::discover(&metadata_url).await?;
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

        let url = url_without_query(session.request.url());
        if !self.is_api_url(&url) {
            return Ok(());
        }

        if session.request.method() == Method::OPTIONS {
            if self.api.enable_cors {
                if let Some(origin) = session.request.header("origin") {
                    let spec = self.preflight_response(origin);
                    session.response.set(spec);
                }
            }
            return Ok(());
        }

        let Some((action, params)) = self.match_action(session.request.method(), &url) else {
            return Ok(());
        };

        if !self.authorize(action, &session.request) {
            let spec = self.with_cors(
                ResponseBuilder::error_envelope(StatusCode::UNAUTHORIZED, "Unauthorized"),
                &session.request,
            );
            session.response.set(spec);
            return Ok(());
        }

        if let Some(spec) = self.execute(action, &params, &session.request) {
            log::info!(
                "{PLUGIN_NAME}: {} {} -> {}",
                session.request.method(),
                url,
                spec.status
            );
            let spec = self.with_cors(spec, &session.request);
            session.response.set(spec);
        }
        Ok(())
    }
}
