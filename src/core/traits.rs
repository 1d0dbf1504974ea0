//! The plugin interface
//!
//! Plugins implement the lifecycle events they care about and inherit
//! no-op defaults for the rest; the dispatcher interrogates the trait
//! object, not a class hierarchy. All async methods take the runtime's
//! cancellation token so suspension points can be aborted.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use http::Method;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use super::{
    error::ProxyResult,
    event::{ProxySession, ResponseSpec},
};
use crate::{config::cli::ProxyArgs, watch::WatchList};

/// Summary of recorded traffic delivered once when recording stops.
/// Reporting proper is external; core plugins receive the event so the
/// dispatcher has a single fan-out path.
pub struct RecordingStopArgs {
    pub requests: Vec<RecordedRequest>,
}

pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
}

/// A pipeline plugin. Invoked in registered order for every lifecycle
/// event; each handler is expected to test `ProxySession::should_process`
/// before touching the event.
#[async_trait]
pub trait ProxyPlugin: Send + Sync {
    /// Return the name of this plugin, used for logging and as the
    /// session-data key.
    fn name(&self) -> &str;

    /// Whether the plugin is currently able to run. Plugins that lose the
    /// data they depend on (a failed metadata fetch, a bad reload) turn
    /// themselves off rather than failing every request.
    fn enabled(&self) -> bool {
        true
    }

    /// Called once at startup, before any traffic. Errors disable the
    /// plugin for the lifetime of the process.
    async fn init(&self, _token: &CancellationToken) -> ProxyResult<()> {
        Ok(())
    }

    /// Called once after CLI parsing with the parsed core options.
    fn options_loaded(&self, _args: &ProxyArgs) {}

    /// Called for every intercepted request before it leaves the proxy.
    async fn before_request(
        &self,
        _session: &mut ProxySession,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        Ok(())
    }

    /// Called for every upstream response returning to the client. Only
    /// fires when the request actually passed through upstream.
    async fn before_response(
        &self,
        _session: &mut ProxySession,
        _response: &mut ResponseSpec,
        _token: &CancellationToken,
    ) -> ProxyResult<()> {
        Ok(())
    }

    /// Called when the proxy-initiated mock request should be issued.
    async fn mock_request(&self, _token: &CancellationToken) -> ProxyResult<()> {
        Ok(())
    }

    /// Called once when recording stops.
    async fn recording_stopped(&self, _args: &RecordingStopArgs) -> ProxyResult<()> {
        Ok(())
    }
}

/// Everything a plugin factory needs: its JSON config section, the
/// effective watch list, and the directory config paths resolve against.
pub struct PluginInit<'a> {
    pub cfg: JsonValue,
    pub urls_to_watch: Arc<WatchList>,
    pub config_dir: &'a Path,
}

/// Factory signature registered per plugin name.
pub type PluginCreateFn = fn(PluginInit) -> ProxyResult<Arc<dyn ProxyPlugin>>;
