//! The pipeline dispatcher
//!
//! Walks plugins in registered order for each lifecycle event. The
//! dispatcher does not catch plugin errors: a failing plugin propagates
//! to the runtime, which owns the error boundary for the wire. Plugins
//! disabled at init (configuration errors) or at runtime (lost data)
//! are passed over silently.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

use super::{
    error::ProxyResult,
    event::{ProxySession, ResponseSpec},
    traits::{ProxyPlugin, RecordingStopArgs},
};
use crate::config::cli::ProxyArgs;

struct Slot {
    plugin: Arc<dyn ProxyPlugin>,
    enabled: AtomicBool,
}

impl Slot {
    fn active(&self) -> bool {
        self.enabled.load(Ordering::Relaxed) && self.plugin.enabled()
    }
}

/// Ordered plugin pipeline. One instance per process, shared by all
/// in-flight requests.
#[derive(Default)]
pub struct PluginPipeline {
    slots: Vec<Slot>,
}

impl PluginPipeline {
    pub fn new(plugins: Vec<Arc<dyn ProxyPlugin>>) -> Self {
        Self {
            slots: plugins
                .into_iter()
                .map(|plugin| Slot {
                    plugin,
                    enabled: AtomicBool::new(true),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of the plugins that are currently able to run, in order.
    pub fn active_plugins(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|s| s.active())
            .map(|s| s.plugin.name())
            .collect()
    }

    /// Initialize every plugin. A failing plugin is disabled and logged;
    /// the pipeline itself keeps running with the remainder.
    pub async fn init(&self, token: &CancellationToken) {
        for slot in &self.slots {
            if let Err(e) = slot.plugin.init(token).await {
                log::error!("{}: init failed, disabling plugin: {e}", slot.plugin.name());
                slot.enabled.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Deliver parsed CLI options to every plugin.
    pub fn options_loaded(&self, args: &ProxyArgs) {
        for slot in &self.slots {
            if slot.active() {
                slot.plugin.options_loaded(args);
            }
        }
    }

    /// Run the request event through the pipeline in registered order.
    /// Every active plugin is invoked; plugins self-skip on the
    /// response-set flag and the watch list (a later plugin may still
    /// merge headers into an already-set response).
    pub async fn before_request(
        &self,
        session: &mut ProxySession,
        token: &CancellationToken,
    ) -> ProxyResult<()> {
        for slot in &self.slots {
            if !slot.active() {
                continue;
            }
            slot.plugin.before_request(session, token).await?;
        }
        Ok(())
    }

    /// Run the response event through the pipeline in registered order.
    pub async fn before_response(
        &self,
        session: &mut ProxySession,
        response: &mut ResponseSpec,
        token: &CancellationToken,
    ) -> ProxyResult<()> {
        for slot in &self.slots {
            if !slot.active() {
                continue;
            }
            slot.plugin.before_response(session, response, token).await?;
        }
        Ok(())
    }

    /// Fire the proxy-initiated mock request feature.
    pub async fn mock_request(&self, token: &CancellationToken) -> ProxyResult<()> {
        for slot in &self.slots {
            if !slot.active() {
                continue;
            }
            slot.plugin.mock_request(token).await?;
        }
        Ok(())
    }

    /// Deliver the recording-stop event once to every plugin. Reporting
    /// failures are logged, not propagated: one reporter must not starve
    /// the others.
    pub async fn recording_stopped(&self, args: &RecordingStopArgs) {
        for slot in &self.slots {
            if !slot.active() {
                continue;
            }
            if let Err(e) = slot.plugin.recording_stopped(args).await {
                log::error!("{}: recording-stop handler failed: {e}", slot.plugin.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        error::ProxyError,
        event::RequestEvent,
        state::GlobalState,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    struct Recorder {
        name: String,
        fail_init: bool,
        fail_request: bool,
        respond: bool,
    }

    impl Recorder {
        fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail_init: false,
                fail_request: false,
                respond: false,
            }
        }
    }

    #[async_trait]
    impl ProxyPlugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn init(&self, _token: &CancellationToken) -> ProxyResult<()> {
            if self.fail_init {
                return Err(ProxyError::Configuration("bad section".to_string()));
            }
            Ok(())
        }

        async fn before_request(
            &self,
            session: &mut ProxySession,
            _token: &CancellationToken,
        ) -> ProxyResult<()> {
            if self.fail_request {
                return Err(ProxyError::Plugin("boom".to_string()));
            }
            let mut order = session
                .data
                .remove::<Vec<String>>("order")
                .unwrap_or_default();
            order.push(self.name.clone());
            session.data.set("order", order);
            if self.respond && !session.response.has_been_set() {
                session.generic_response(StatusCode::OK, vec![], "");
            }
            Ok(())
        }
    }

    fn session() -> ProxySession {
        ProxySession::new(
            RequestEvent::new(
                Method::GET,
                "https://api.example.com/x".parse().unwrap(),
                HeaderMap::new(),
                Bytes::new(),
            ),
            Arc::new(GlobalState::default()),
        )
    }

    #[tokio::test]
    async fn test_plugins_run_in_registered_order() {
        let pipeline = PluginPipeline::new(vec![
            Arc::new(Recorder::named("first")),
            Arc::new(Recorder::named("second")),
            Arc::new(Recorder::named("third")),
        ]);
        let mut s = session();
        pipeline
            .before_request(&mut s, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            s.data.get::<Vec<String>>("order").unwrap(),
            &vec!["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn test_later_plugins_still_invoked_after_response_set() {
        let mut responder = Recorder::named("responder");
        responder.respond = true;
        let pipeline = PluginPipeline::new(vec![
            Arc::new(responder),
            Arc::new(Recorder::named("after")),
        ]);
        let mut s = session();
        pipeline
            .before_request(&mut s, &CancellationToken::new())
            .await
            .unwrap();
        // The dispatcher does not short-circuit; plugins self-skip.
        let order = s.data.get::<Vec<String>>("order").unwrap();
        assert!(order.contains(&"after".to_string()));
        assert!(s.response.has_been_set());
    }

    #[tokio::test]
    async fn test_init_failure_disables_plugin() {
        let mut bad = Recorder::named("bad");
        bad.fail_init = true;
        let pipeline =
            PluginPipeline::new(vec![Arc::new(bad), Arc::new(Recorder::named("good"))]);
        pipeline.init(&CancellationToken::new()).await;
        assert_eq!(pipeline.active_plugins(), vec!["good"]);

        let mut s = session();
        pipeline
            .before_request(&mut s, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            s.data.get::<Vec<String>>("order").unwrap(),
            &vec!["good".to_string()]
        );
    }

    #[tokio::test]
    async fn test_plugin_errors_propagate() {
        let mut bad = Recorder::named("bad");
        bad.fail_request = true;
        let pipeline = PluginPipeline::new(vec![Arc::new(bad)]);
        let mut s = session();
        let err = pipeline
            .before_request(&mut s, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Plugin(_)));
    }
}
