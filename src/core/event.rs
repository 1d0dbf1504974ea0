//! Per-request event types
//!
//! A `ProxySession` is created by the proxy runtime for every intercepted
//! request and threaded through the plugin pipeline. Plugins read the
//! request through `RequestEvent` and answer through `ResponseState`,
//! which enforces the single-synthetic-response invariant.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use once_cell::sync::OnceCell;

use super::state::{GlobalState, SessionData};
use crate::watch::WatchList;

/// An intercepted request, owned by the session for its lifetime.
pub struct RequestEvent {
    method: Method,
    url: Uri,
    url_text: String,
    headers: HeaderMap,
    body: Bytes,
    body_text: OnceCell<Option<String>>,
}

impl RequestEvent {
    pub fn new(method: Method, url: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let url_text = url.to_string();
        Self {
            method,
            url,
            url_text,
            headers,
            body,
            body_text: OnceCell::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The absolute URL as a string, cached at construction.
    pub fn url_str(&self) -> &str {
        &self.url_text
    }

    pub fn host(&self) -> &str {
        self.url.host().unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header lookup by case-insensitive name, lossy on non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Lazy UTF-8 view of the body. `None` if the body is not valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        self.body_text
            .get_or_init(|| std::str::from_utf8(&self.body).ok().map(str::to_string))
            .as_deref()
    }

    /// Parse the body as JSON. Callers treat failures as "not JSON".
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body_str()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Replace the outbound request body before it leaves the proxy.
    pub fn set_body_string(&mut self, body: String) {
        self.body = Bytes::from(body);
        self.body_text = OnceCell::new();
    }
}

/// A synthetic response assembled by a plugin and emitted by the runtime.
#[derive(Debug, Clone)]
pub struct ResponseSpec {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseSpec {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append headers, replacing any existing ones with the same
    /// case-insensitive name.
    pub fn merge_headers(&mut self, headers: &[(String, String)]) {
        for (name, value) in headers {
            self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
            self.headers.push((name.clone(), value.clone()));
        }
    }
}

/// Holder for the per-request synthetic response. First write wins; later
/// plugins may only merge additional headers.
#[derive(Default)]
pub struct ResponseState {
    spec: Option<ResponseSpec>,
}

impl ResponseState {
    pub fn has_been_set(&self) -> bool {
        self.spec.is_some()
    }

    /// Install the synthetic response. A second call is a plugin bug: the
    /// first response is kept and the attempt is logged.
    pub fn set(&mut self, spec: ResponseSpec) {
        if self.spec.is_some() {
            log::warn!("response already set, ignoring status {}", spec.status);
            return;
        }
        self.spec = Some(spec);
    }

    /// The documented post-set mutation: merge extra headers into the
    /// already-assembled response. No-op when no response is set.
    pub fn merge_headers(&mut self, headers: &[(String, String)]) {
        if let Some(spec) = self.spec.as_mut() {
            spec.merge_headers(headers);
        }
    }

    pub fn spec(&self) -> Option<&ResponseSpec> {
        self.spec.as_ref()
    }

    /// Hand the finished response to the runtime, consuming the state.
    pub fn take(self) -> Option<ResponseSpec> {
        self.spec
    }
}

/// Per-request state handed to every plugin in pipeline order.
pub struct ProxySession {
    pub request: RequestEvent,
    pub response: ResponseState,
    pub data: SessionData,
    global: Arc<GlobalState>,
}

impl ProxySession {
    pub fn new(request: RequestEvent, global: Arc<GlobalState>) -> Self {
        Self {
            request,
            response: ResponseState::default(),
            data: SessionData::default(),
            global,
        }
    }

    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    /// URL-watch test against the plugin's effective watch list.
    pub fn is_watched(&self, watch: &WatchList) -> bool {
        watch.matches(self.request.url_str())
    }

    /// Standard plugin guard: a plugin runs only when no response has been
    /// set and the request URL is watched. Logs the skip at debug level.
    pub fn should_process(&self, watch: &WatchList, plugin: &str) -> bool {
        if self.response.has_been_set() {
            log::debug!("{plugin}: skipped, response already set");
            return false;
        }
        if !self.is_watched(watch) {
            log::debug!("{plugin}: skipped, {} not watched", self.request.url_str());
            return false;
        }
        true
    }

    /// Emit a synthetic response in one call (the runtime-facing helper).
    pub fn generic_response(
        &mut self,
        status: StatusCode,
        headers: Vec<(String, String)>,
        body: impl Into<Bytes>,
    ) {
        self.response.set(ResponseSpec {
            status,
            headers,
            body: body.into(),
        });
    }
}
