//! Core abstractions of the interception engine
//!
//! Event types, shared state, the plugin trait, and the dispatcher that
//! ties them together.

pub mod error;
pub mod event;
pub mod pipeline;
pub mod state;
pub mod traits;

pub use error::{ErrorContext, ProxyError, ProxyResult};
pub use event::{ProxySession, RequestEvent, ResponseSpec, ResponseState};
pub use pipeline::PluginPipeline;
pub use state::{GlobalState, SessionData, ThrottlePredicate, ThrottleVerdict, ThrottlerInfo};
pub use traits::{PluginCreateFn, PluginInit, ProxyPlugin, RecordedRequest, RecordingStopArgs};
