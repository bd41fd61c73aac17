//! Error types for the proxy.

use thiserror::Error;

use tollgate_core::{FilterError, ParseError};
use tollgate_storage::StorageError;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request or response framing.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache, event log or report failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Filter list persistence failure.
    #[error("filter error: {0}")]
    Filter(#[from] FilterError),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Could not reach the origin.
    #[error("upstream connect to {host} failed: {reason}")]
    UpstreamConnect { host: String, reason: String },

    /// The origin went quiet for longer than the idle timeout.
    #[error("upstream {0} timed out")]
    UpstreamTimeout(String),

    /// The origin closed before sending a complete response head.
    #[error("upstream {0} closed before the response head")]
    UpstreamClosed(String),

    /// The client did not finish its request head in time.
    #[error("timed out reading request")]
    ReadTimeout,

    /// Request head exceeded the configured limit.
    #[error("request head exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// Declared request body exceeded the configured limit.
    #[error("request body of {0} bytes exceeds limit")]
    BodyTooLarge(u64),

    /// A non-CONNECT request without a Host header.
    #[error("request has no Host header")]
    MissingHost,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start` was called while the proxy is listening.
    #[error("proxy is already running on {0}")]
    AlreadyRunning(std::net::SocketAddr),
}

impl ProxyError {
    /// Status line to send to the client before closing, if any.
    pub fn client_status(&self) -> Option<u16> {
        match self {
            ProxyError::HeaderTooLarge(_) => Some(431),
            ProxyError::BodyTooLarge(_) => Some(413),
            ProxyError::MissingHost => Some(400),
            ProxyError::ReadTimeout => Some(408),
            _ => None,
        }
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
