//! Structured error type for the daemon's HTTP surface.
//!
//! Internally every fallible handler produces a `Problem`, which carries an
//! HTTP status, a machine-readable code (used in logs/metrics), and a
//! human detail message. On the wire it serializes as the flat envelope
//! `{success:false, error:"..."}` the ingestion/invalidation/status API
//! contract mandates — not RFC 9457 — so callers never see the internal
//! code/status split.

use http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
#[must_use]
pub struct Problem {
    pub status: StatusCode,
    /// Machine-readable error code, e.g. "VALIDATION_ERROR", "UNKNOWN_HOST".
    pub code: String,
    /// Human-readable detail specific to this occurrence.
    pub detail: String,
}

impl Problem {
    pub fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", detail)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing or invalid X-Internal-Auth header",
        )
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", detail)
    }

    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            detail,
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", detail)
    }
}

/// The wire shape of a `Problem`: `{success:false, error:"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
}

impl From<&Problem> for ErrorEnvelope {
    fn from(p: &Problem) -> Self {
        Self {
            success: false,
            error: p.detail.clone(),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Problem {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        tracing::warn!(code = %self.code, status = status.as_u16(), detail = %self.detail, "request rejected");
        let envelope = ErrorEnvelope::from(&self);
        let mut resp = axum::Json(envelope).into_response();
        *resp.status_mut() = status;
        resp
    }
}
