use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use serde_json::Value;

/// Raised while constructing a test, before any request is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to identify or create a valid test server")]
    InvalidServer,

    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Failure to obtain a response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("ECONNREFUSED: Connection refused")]
    ConnectionRefused,

    #[error("ECONNRESET: Connection reset by peer")]
    ConnectionReset,

    #[error("EPIPE: Broken pipe")]
    BrokenPipe,

    #[error("ETIMEDOUT: Operation timed out")]
    TimedOut,

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to read response: {0}")]
    Body(String),

    #[error("request task aborted before producing a response")]
    Aborted,
}

impl TransportError {
    /// Maps a connect-phase I/O failure to its system error variant.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::ConnectionReset
            }
            io::ErrorKind::BrokenPipe => TransportError::BrokenPipe,
            io::ErrorKind::TimedOut => TransportError::TimedOut,
            _ => TransportError::Request(err.to_string()),
        }
    }
}

/// A failed expectation. `expected` and `actual` are kept for diff display.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct AssertionError {
    pub message: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

impl AssertionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_diff(message: impl Into<String>, expected: Value, actual: Value) -> Self {
        Self {
            message: message.into(),
            expected: Some(expected),
            actual: Some(actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServerCloseError {
    #[error("server is not running")]
    NotRunning,

    #[error("failed to close server: {0}")]
    Io(String),
}

impl ServerCloseError {
    /// True when closing was a no-op because the server was already down.
    pub fn is_already_closed(&self) -> bool {
        matches!(self, ServerCloseError::NotRunning)
    }
}

/// Outstanding transport work failed while being drained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pending transport task failed: {0}")]
pub struct DrainError(pub String);

/// A predicate expectation panicked; carries the panic message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PredicatePanic(pub String);

/// The single error delivered to a completed test.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Assertion(#[from] AssertionError),

    #[error("{0}")]
    Predicate(Arc<dyn StdError + Send + Sync>),

    #[error(transparent)]
    ServerClose(#[from] ServerCloseError),
}

impl TestError {
    pub fn as_assertion(&self) -> Option<&AssertionError> {
        match self {
            TestError::Assertion(err) => Some(err),
            _ => None,
        }
    }

    /// The error a predicate expectation produced, if this is one.
    pub fn as_predicate(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            TestError::Predicate(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
