use std::time::Duration;
use thiserror::Error;

/// Outbound HTTP failures. Every variant is a transport/timeout/protocol
/// failure; none of them are surfaced to external callers of the daemon's
/// own HTTP surface — they flow into the Retry Manager instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tls error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("non-2xx status {status}")]
    HttpStatus { status: http::StatusCode },

    #[error("json encode/decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// True for anything the Distributor should treat as a dispatch
    /// failure: any transport error, timeout, or non-200 response.
    #[must_use]
    pub fn is_dispatch_failure(&self) -> bool {
        true
    }
}
