//! Unified error handling for simproxy
//!
//! A single error type keeps plugins from depending on each other for
//! error plumbing. Configuration failures disable the offending plugin;
//! per-request failures are logged and swallowed at the plugin boundary.

use std::fmt;

/// Unified error types for the interception engine
#[derive(Debug)]
pub enum ProxyError {
    /// Configuration-related errors (missing field, bad pattern, bad file path)
    Configuration(String),

    /// File and network I/O errors
    Io(std::io::Error),

    /// JSON (de)serialization failures
    Serialization(String),

    /// Plugin execution errors
    Plugin(String),

    /// Authentication/authorization failures
    Unauthorized(String),

    /// Upstream fetch failures (OIDC metadata, mock-request sends)
    Upstream(String),

    /// The runtime cancelled the in-flight request
    Cancelled,

    /// Validation errors from config records
    Validation(String),

    /// Internal invariant violations
    Internal(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            ProxyError::Io(err) => write!(f, "I/O error: {err}"),
            ProxyError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            ProxyError::Plugin(msg) => write!(f, "Plugin execution error: {msg}"),
            ProxyError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            ProxyError::Upstream(msg) => write!(f, "Upstream error: {msg}"),
            ProxyError::Cancelled => write!(f, "Request cancelled"),
            ProxyError::Validation(msg) => write!(f, "Validation error: {msg}"),
            ProxyError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ProxyError {
    fn from(err: validator::ValidationErrors) -> Self {
        ProxyError::Validation(err.to_string())
    }
}

impl ProxyError {
    /// Build a serialization error that keeps the original cause in the message.
    pub fn serialization_error(context: &str, err: impl fmt::Display) -> Self {
        ProxyError::Serialization(format!("{context}: {err}"))
    }
}

/// Result type alias for engine operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> ProxyResult<T>;

    fn config_context(self, context: &str) -> ProxyResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> ProxyResult<T> {
        self.map_err(|e| ProxyError::Internal(format!("{context}: {e}")))
    }

    fn config_context(self, context: &str) -> ProxyResult<T> {
        self.map_err(|e| ProxyError::Configuration(format!("{context}: {e}")))
    }
}
