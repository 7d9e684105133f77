//! Shared-secret authentication middleware. Every endpoint requires
//! `X-Internal-Auth: <shared secret>`; missing or mismatched is
//! a 401 before any handler runs.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use daemon_errors::Problem;

use super::AppState;

const AUTH_HEADER: &str = "X-Internal-Auth";

pub async fn require_shared_secret(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(value) if value == state.shared_secret => next.run(req).await,
        _ => {
            use axum::response::IntoResponse;
            Problem::unauthorized().into_response()
        }
    }
}
