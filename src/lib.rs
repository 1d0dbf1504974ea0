//! simproxy is the plugin-driven interception engine of a developer
//! API-simulation proxy.
//!
//! The engine decides which intercepted requests plugins see (the URL
//! watch list), runs them through an ordered plugin pipeline with shared
//! per-request and process state, and lets plugins answer with synthetic
//! responses: simulated errors, throttling, latency, mocks, and CRUD
//! emulation over a JSON document. The TLS-intercepting proxy runtime,
//! CLI shell, and reporters live outside this crate and drive it through
//! [`core::PluginPipeline`] and [`config::Config`].

pub mod batch;
pub mod config;
pub mod core;
pub mod logging;
pub mod plugins;
pub mod utils;
pub mod watch;

pub use crate::config::Config;
pub use crate::core::{
    GlobalState, PluginPipeline, ProxyError, ProxyPlugin, ProxyResult, ProxySession,
    RequestEvent, ResponseSpec,
};
pub use crate::watch::WatchList;
