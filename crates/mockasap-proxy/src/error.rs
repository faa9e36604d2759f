//! Error types for the interception pipeline and the proxy lifecycle.
//!
//! Request-path failures (`ProxyError`) never escape a single exchange: the
//! dispatcher turns each of them into an HTTP error response via
//! [`ProxyError::status_code`]. "No stub matched" is not an error at all; the
//! registry simply returns `None` and the request passes through.

use crate::codec::CodecError;
use hyper::StatusCode;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Failures that can happen while answering one proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed upstream body: {0}")]
    MalformedBody(#[from] CodecError),

    #[error("upstream {uri} unreachable: {reason}")]
    UpstreamUnreachable { uri: String, reason: String },

    #[error("upstream {uri} did not answer within {timeout_secs}s")]
    UpstreamTimeout { uri: String, timeout_secs: u64 },

    #[error("file {} not found or unreadable: {reason}", path.display())]
    ResourceNotFound { path: PathBuf, reason: String },

    #[error("JSON transform failed: {0}")]
    TransformFailure(String),

    #[error("invalid request: {0}")]
    BadRequest(String),
}

impl ProxyError {
    /// Status code sent to the client for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MalformedBody(_)
            | ProxyError::UpstreamUnreachable { .. }
            | ProxyError::TransformFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short machine-readable kind, used for the `x-mockasap-error` header.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedBody(_) => "malformed-body",
            ProxyError::UpstreamUnreachable { .. } => "upstream-unreachable",
            ProxyError::UpstreamTimeout { .. } => "upstream-timeout",
            ProxyError::ResourceNotFound { .. } => "resource-not-found",
            ProxyError::TransformFailure(_) => "transform-failure",
            ProxyError::BadRequest(_) => "bad-request",
        }
    }
}

/// Failures while starting or stopping the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("proxy is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
