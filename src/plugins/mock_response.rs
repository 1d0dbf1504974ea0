//! Mock-response plugin
//!
//! Answers watched requests from a configured mock catalog instead of
//! upstream. Mocks are evaluated in configured order and the first match
//! wins; matching covers method, exact-or-wildcard URL, an optional
//! body fragment, and an optional Nth-occurrence constraint resolved
//! through the process-wide applied-mocks counters. Selected mocks are
//! cloned before placeholder substitution so the catalog stays pristine.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::{
    batch::{self, BatchResponseItem, BatchResponsePayload},
    config::{
        cli::ProxyArgs,
        mocks::{Mock, MockResponseSpec, MocksFile},
    },
    core::{
        state::GlobalState, traits::PluginInit, ProxyError, ProxyPlugin, ProxyResult,
        ProxySession, RequestEvent, ResponseSpec,
    },
    utils::{placeholder::PlaceholderResolver, response::ResponseBuilder},
    watch::{wildcard_to_regex, WatchList},
};

pub const PLUGIN_NAME: &str = "mock-response";

pub fn create_mock_response_plugin(init: PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>> {
    let config: PluginConfig = serde_json::from_value(init.cfg)
        .map_err(|e| ProxyError::serialization_error("Invalid mock-response plugin config", e))?;
    let catalog = Catalog::load(&init.config_dir.join(&config.mocks_file))?;
    Ok(Arc::new(MockResponsePlugin {
        no_mocks: AtomicBool::new(config.no_mocks),
        block_unmocked: config.block_unmocked_requests,
        catalog: RwLock::new(catalog),
        resolver: PlaceholderResolver::new("request"),
        enabled: AtomicBool::new(true),
        urls_to_watch: init.urls_to_watch,
    }))
}

/// Configuration for the mock-response plugin.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PluginConfig {
    mocks_file: String,
    no_mocks: bool,
    block_unmocked_requests: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            mocks_file: "mocks.json".to_string(),
            no_mocks: false,
            block_unmocked_requests: false,
        }
    }
}

/// A catalog entry with its wildcard pattern pre-compiled.
struct CompiledMock {
    mock: Mock,
    url_regex: Option<Regex>,
}

impl CompiledMock {
    fn compile(mock: Mock) -> ProxyResult<Self> {
        let url_regex = if mock.request.url.contains('*') {
            Some(
                RegexBuilder::new(&wildcard_to_regex(&mock.request.url))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        ProxyError::Configuration(format!(
                            "invalid mock url pattern {}: {e}",
                            mock.request.url
                        ))
                    })?,
            )
        } else {
            None
        };
        Ok(Self { mock, url_regex })
    }

    fn url_matches(&self, url: &str) -> bool {
        match &self.url_regex {
            Some(regex) => regex.is_match(url),
            None => self.mock.request.url.eq_ignore_ascii_case(url),
        }
    }

    /// Full match check against a logical request. `body` is the
    /// candidate body text; GET requests bypass the fragment check.
    fn matches(&self, method: &str, url: &str, body: Option<&str>, global: &GlobalState) -> bool {
        if !self.mock.request.method.eq_ignore_ascii_case(method) {
            return false;
        }
        if !self.url_matches(url) {
            return false;
        }
        if !method.eq_ignore_ascii_case("GET") {
            if let Some(fragment) = &self.mock.request.body_fragment {
                let found = body
                    .map(|b| b.to_lowercase().contains(&fragment.to_lowercase()))
                    .unwrap_or(false);
                if !found {
                    return false;
                }
            }
        }
        if let Some(nth) = self.mock.request.nth {
            // Counters advance on selection only, so the candidate
            // participates when it would be the nth selection.
            if global.mock_applications(&self.mock.request.url) + 1 != nth {
                return false;
            }
        }
        true
    }
}

struct Catalog {
    mocks: Vec<CompiledMock>,
    dir: PathBuf,
}

impl Catalog {
    fn load(path: &Path) -> ProxyResult<Self> {
        let file = MocksFile::load(path)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mocks = file
            .mocks
            .into_iter()
            .map(CompiledMock::compile)
            .collect::<ProxyResult<Vec<_>>>()?;
        Ok(Self { mocks, dir })
    }
}

pub struct MockResponsePlugin {
    no_mocks: AtomicBool,
    block_unmocked: bool,
    catalog: RwLock<Catalog>,
    resolver: PlaceholderResolver,
    enabled: AtomicBool,
    urls_to_watch: Arc<WatchList>,
}

impl MockResponsePlugin {
    /// Resolve the response body for a selected mock. Returns the raw
    /// bytes plus whether they are JSON (for content-type defaulting).
    fn render_body(
        &self,
        body: &JsonValue,
        source: Option<&JsonValue>,
        dir: &Path,
    ) -> (Bytes, bool) {
        if let JsonValue::String(s) = body {
            if let Some(relpath) = s.strip_prefix('@') {
                return (self.read_file_body(s, relpath, dir), false);
            }
        }

        match self.resolver.resolve(body, source) {
            JsonValue::String(s) => (Bytes::from(s), false),
            other => (Bytes::from(other.to_string()), true),
        }
    }

    /// File-backed body: served verbatim from a file next to the mocks
    /// file, with environment variables expanded in the path. A missing
    /// file serves the literal sentinel so the failure stays visible.
    fn read_file_body(&self, sentinel: &str, relpath: &str, dir: &Path) -> Bytes {
        let expanded = shellexpand::env(relpath)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| relpath.to_string());
        let path = if Path::new(&expanded).is_absolute() {
            PathBuf::from(&expanded)
        } else {
            dir.join(&expanded)
        };
        match std::fs::read(&path) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                log::error!(
                    "{PLUGIN_NAME}: unable to read mock body file {}: {e}",
                    path.display()
                );
                Bytes::from(sentinel.to_string())
            }
        }
    }

    fn build_response(
        &self,
        response: &MockResponseSpec,
        source: Option<&JsonValue>,
        dir: &Path,
    ) -> ResponseSpec {
        let status = response
            .status_code
            .and_then(|c| StatusCode::from_u16(c).ok())
            .unwrap_or(StatusCode::OK);
        let mut spec = ResponseSpec::new(status);
        for header in response.headers.iter().flatten() {
            spec.headers.push((header.name.clone(), header.value.clone()));
        }
        if let Some(body) = &response.body {
            let (bytes, is_json) = self.render_body(body, source, dir);
            spec.body = bytes;
            if is_json && spec.header("content-type").is_none() {
                spec.headers
                    .push(("content-type".to_string(), "application/json".to_string()));
            }
        }
        spec
    }

    /// First-match-wins scan for a single logical request. On selection
    /// the applied-mocks counter for the mock's URL key advances.
    fn select<'a>(
        catalog: &'a Catalog,
        method: &str,
        url: &str,
        body: Option<&str>,
        global: &GlobalState,
    ) -> Option<&'a CompiledMock> {
        let found = catalog
            .mocks
            .iter()
            .find(|m| m.matches(method, url, body, global))?;
        global.record_mock_applied(&found.mock.request.url);
        Some(found)
    }

    fn match_direct(&self, catalog: &Catalog, request: &RequestEvent, global: &GlobalState) -> Option<ResponseSpec> {
        let selected = Self::select(
            catalog,
            request.method().as_str(),
            request.url_str(),
            request.body_str(),
            global,
        )?;
        log::info!(
            "{PLUGIN_NAME}: mocked {} {} with {}",
            request.method(),
            request.url_str(),
            selected.mock.request.url
        );
        Some(self.build_response(
            &selected.mock.response,
            request.body_json().as_ref(),
            &catalog.dir,
        ))
    }

    /// Compose per-subrequest mock outcomes into a batch envelope.
    /// Handled only when at least one subrequest has a mock; unmatched
    /// subrequests answer 502 inside the envelope.
    fn match_batch(
        &self,
        catalog: &Catalog,
        request: &RequestEvent,
        global: &GlobalState,
    ) -> Option<ResponseSpec> {
        let payload = batch::BatchRequestPayload::parse(request.body_str()?)
            .map_err(|e| log::debug!("{PLUGIN_NAME}: unable to parse batch envelope: {e}"))
            .ok()?;

        let mut any_matched = false;
        let mut responses = Vec::with_capacity(payload.requests.len());
        for item in &payload.requests {
            let url = batch::resolve_item_url(request.url(), &item.url);
            let body_text = item.body.as_ref().map(JsonValue::to_string);
            let selected = Self::select(
                catalog,
                &item.method,
                &url,
                body_text.as_deref(),
                global,
            );
            match selected {
                Some(found) => {
                    any_matched = true;
                    responses.push(self.batch_item(found, item, &url, &catalog.dir));
                }
                None => responses.push(BatchResponseItem {
                    id: item.id.clone(),
                    status: StatusCode::BAD_GATEWAY.as_u16(),
                    headers: None,
                    body: Some(serde_json::json!({
                        "error": {
                            "message": format!("No mock response found for {} {url}", item.method)
                        }
                    })),
                }),
            }
        }

        if !any_matched {
            return None;
        }
        let envelope = BatchResponsePayload { responses };
        Some(ResponseBuilder::json(StatusCode::OK, &envelope.to_json()))
    }

    fn batch_item(
        &self,
        found: &CompiledMock,
        item: &batch::BatchRequestItem,
        url: &str,
        dir: &Path,
    ) -> BatchResponseItem {
        log::info!("{PLUGIN_NAME}: mocked batch item {} {url}", item.method);
        let response = &found.mock.response;
        let status = response.status_code.unwrap_or(200);
        let headers = response.headers.as_ref().map(|entries| {
            entries
                .iter()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect::<HashMap<_, _>>()
        });
        let body = response.body.as_ref().map(|body| {
            let (bytes, _) = self.render_body(body, item.body.as_ref(), dir);
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()))
        });
        BatchResponseItem {
            id: item.id.clone(),
            status,
            headers,
            body,
        }
    }
}

#[async_trait]
impl ProxyPlugin for MockResponsePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn options_loaded(&self, args: &ProxyArgs) {
        if args.no_mocks {
            self.no_mocks.store(true, Ordering::Relaxed);
        }
        if let Some(path) = &args.mocks_file {
            match Catalog::load(path) {
                Ok(catalog) => {
                    *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = catalog;
                }
                Err(e) => {
                    log::error!("{PLUGIN_NAME}: disabled, unable to load {}: {e}", path.display());
                    self.enabled.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    async fn before_request(
        &self,
        session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        if self.no_mocks.load(Ordering::Relaxed) {
            log::debug!("{PLUGIN_NAME}: skipped, mocks disabled");
            return Ok(());
        }
        if !session.should_process(&self.urls_to_watch, PLUGIN_NAME) {
            return Ok(());
        }

        let spec = {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            let direct = self.match_direct(&catalog, &session.request, session.global());
            if direct.is_some() {
                direct
            } else if batch::is_batch_url(session.request.url()) {
                self.match_batch(&catalog, &session.request, session.global())
            } else {
                None
            }
        };

        if let Some(spec) = spec {
            session.response.set(spec);
            return Ok(());
        }

        if self.block_unmocked {
            let message = format!(
                "No mock response found for {} {}",
                session.request.method(),
                session.request.url_str()
            );
            log::warn!("{PLUGIN_NAME}: {message}");
            session
                .response
                .set(ResponseBuilder::error_envelope(StatusCode::BAD_GATEWAY, &message));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mocks::{HeaderEntry, MockRequestMatch};
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use serde_json::json;

    fn mock(url: &str, method: &str, nth: Option<u64>, body: JsonValue) -> Mock {
        Mock {
            request: MockRequestMatch {
                url: url.to_string(),
                method: method.to_string(),
                body_fragment: None,
                nth,
            },
            response: MockResponseSpec {
                status_code: Some(200),
                headers: None,
                body: Some(body),
            },
        }
    }

    fn plugin_with(mocks: Vec<Mock>, block_unmocked: bool) -> MockResponsePlugin {
        let compiled = mocks
            .into_iter()
            .map(|m| CompiledMock::compile(m).unwrap())
            .collect();
        MockResponsePlugin {
            no_mocks: AtomicBool::new(false),
            block_unmocked,
            catalog: RwLock::new(Catalog {
                mocks: compiled,
                dir: PathBuf::from("."),
            }),
            resolver: PlaceholderResolver::new("request"),
            enabled: AtomicBool::new(true),
            urls_to_watch: Arc::new(WatchList::compile(&["https://*".to_string()]).unwrap()),
        }
    }

    fn session_for(method: Method, url: &str, body: &str, global: Arc<GlobalState>) -> ProxySession {
        ProxySession::new(
            RequestEvent::new(
                method,
                url.parse().unwrap(),
                HeaderMap::new(),
                Bytes::from(body.to_string()),
            ),
            global,
        )
    }

    async fn run(plugin: &MockResponsePlugin, session: &mut ProxySession) {
        plugin
            .before_request(session, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_matching_mock_wins() {
        let plugin = plugin_with(
            vec![
                mock("https://x/users", "GET", None, json!({"from": "first"})),
                mock("https://x/users", "GET", None, json!({"from": "second"})),
            ],
            false,
        );
        let mut s = session_for(
            Method::GET,
            "https://x/users",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        let body: JsonValue = serde_json::from_slice(&s.response.spec().unwrap().body).unwrap();
        assert_eq!(body["from"], "first");
    }

    #[tokio::test]
    async fn test_wildcard_url_matches() {
        let plugin = plugin_with(
            vec![mock("https://x/users/*", "GET", None, json!({"ok": true}))],
            false,
        );
        let mut s = session_for(
            Method::GET,
            "https://x/users/1/messages",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert!(s.response.has_been_set());
        assert_eq!(
            s.response.spec().unwrap().header("content-type"),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_nth_mock_fires_on_exactly_the_nth_selection() {
        let plugin = plugin_with(
            vec![
                mock("https://x/*", "GET", Some(2), json!({"nth": true})),
                mock("https://x/*", "GET", None, json!({"nth": false})),
            ],
            false,
        );
        let global = Arc::new(GlobalState::default());

        for expect_nth in [false, true, false] {
            let mut s = session_for(Method::GET, "https://x/items", "", global.clone());
            run(&plugin, &mut s).await;
            let body: JsonValue =
                serde_json::from_slice(&s.response.spec().unwrap().body).unwrap();
            assert_eq!(body["nth"], expect_nth);
        }
    }

    #[tokio::test]
    async fn test_body_fragment_is_case_insensitive_and_get_bypasses() {
        let mut fragment_mock = mock("https://x/users", "POST", None, json!({"ok": true}));
        fragment_mock.request.body_fragment = Some("DisplayName".to_string());
        let plugin = plugin_with(vec![fragment_mock], false);

        let mut s = session_for(
            Method::POST,
            "https://x/users",
            r#"{"displayname": "A"}"#,
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert!(s.response.has_been_set());

        let mut s = session_for(
            Method::POST,
            "https://x/users",
            r#"{"other": 1}"#,
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert!(!s.response.has_been_set());
    }

    #[tokio::test]
    async fn test_placeholder_substitution_in_selected_mock() {
        let plugin = plugin_with(
            vec![mock(
                "https://x/greet",
                "POST",
                None,
                json!({"msg": "hello @request.body.user.id", "id": "@request.body.user.id"}),
            )],
            false,
        );
        let global = Arc::new(GlobalState::default());

        let mut s = session_for(Method::POST, "https://x/greet", r#"{"user":{"id":42}}"#, global.clone());
        run(&plugin, &mut s).await;
        let body: JsonValue = serde_json::from_slice(&s.response.spec().unwrap().body).unwrap();
        assert_eq!(body["msg"], "hello 42");
        assert_eq!(body["id"], 42);

        // The catalog itself is untouched: a second request substitutes
        // its own values.
        let mut s = session_for(Method::POST, "https://x/greet", r#"{"user":{"id":7}}"#, global);
        run(&plugin, &mut s).await;
        let body: JsonValue = serde_json::from_slice(&s.response.spec().unwrap().body).unwrap();
        assert_eq!(body["id"], 7);
    }

    #[tokio::test]
    async fn test_file_backed_body_and_missing_file_sentinel() {
        let dir = std::env::temp_dir().join(format!("simproxy-mock-body-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("payload.json"), br#"{"from":"file"}"#).unwrap();

        let plugin = plugin_with(
            vec![
                mock("https://x/file", "GET", None, json!("@payload.json")),
                mock("https://x/missing", "GET", None, json!("@not-there.json")),
            ],
            false,
        );
        plugin.catalog.write().unwrap().dir = dir.clone();

        let mut s = session_for(
            Method::GET,
            "https://x/file",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert_eq!(&s.response.spec().unwrap().body[..], br#"{"from":"file"}"#);

        let mut s = session_for(
            Method::GET,
            "https://x/missing",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert_eq!(&s.response.spec().unwrap().body[..], b"@not-there.json");
    }

    #[tokio::test]
    async fn test_block_unmocked_answers_502() {
        let plugin = plugin_with(vec![], true);
        let mut s = session_for(
            Method::GET,
            "https://x/anything",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        let spec = s.response.spec().unwrap();
        assert_eq!(spec.status, StatusCode::BAD_GATEWAY);
        let body: JsonValue = serde_json::from_slice(&spec.body).unwrap();
        assert_eq!(
            body["error"]["message"],
            "No mock response found for GET https://x/anything"
        );
    }

    #[tokio::test]
    async fn test_no_mocks_flag_disables_matching() {
        let plugin = plugin_with(
            vec![mock("https://x/users", "GET", None, json!({"ok": true}))],
            false,
        );
        plugin.options_loaded(&ProxyArgs {
            no_mocks: true,
            ..ProxyArgs::default()
        });
        let mut s = session_for(
            Method::GET,
            "https://x/users",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert!(!s.response.has_been_set());
    }

    #[tokio::test]
    async fn test_batch_composition_with_unmatched_items() {
        let plugin = plugin_with(
            vec![mock(
                "https://x/v1.0/users/1",
                "GET",
                None,
                json!({"id": 1}),
            )],
            false,
        );
        let body = json!({
            "requests": [
                { "id": "a", "method": "GET", "url": "/users/1" },
                { "id": "b", "method": "GET", "url": "/users/2" }
            ]
        })
        .to_string();
        let mut s = session_for(
            Method::POST,
            "https://x/v1.0/$batch",
            &body,
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;

        let spec = s.response.spec().unwrap();
        assert_eq!(spec.status, StatusCode::OK);
        let envelope: JsonValue = serde_json::from_slice(&spec.body).unwrap();
        let responses = envelope["responses"].as_array().unwrap();
        assert_eq!(responses[0]["status"], 200);
        assert_eq!(responses[0]["body"], json!({"id": 1}));
        assert_eq!(responses[1]["status"], 502);
    }

    #[tokio::test]
    async fn test_mock_headers_are_emitted() {
        let mut with_headers = mock("https://x/users", "GET", None, json!({"ok": true}));
        with_headers.response.headers = Some(vec![HeaderEntry {
            name: "x-custom".to_string(),
            value: "yes".to_string(),
        }]);
        let plugin = plugin_with(vec![with_headers], false);
        let mut s = session_for(
            Method::GET,
            "https://x/users",
            "",
            Arc::new(GlobalState::default()),
        );
        run(&plugin, &mut s).await;
        assert_eq!(s.response.spec().unwrap().header("x-custom"), Some("yes"));
    }
}
