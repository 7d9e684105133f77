//! Authenticated HTTP surface (C9/C10/C11). Thin adapter: handlers parse
//! and validate JSON, delegate to `cache_scheduler` domain types, and map
//! `DaemonError` onto the wire error envelope.

pub mod auth;
pub mod error_map;
pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use cache_scheduler::inspection::StatusReporter;
use cache_scheduler::ingestion::IngestionService;
use cache_scheduler::model::HostConfig;
use cache_scheduler::queue_store::QueueStore;
use cache_scheduler::SchedulerHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SchedulerHandle>,
    pub store: Arc<dyn QueueStore>,
    pub ingestion: Arc<IngestionService>,
    pub status_reporter: Arc<StatusReporter>,
    pub metrics: Arc<Metrics>,
    pub shared_secret: String,
    pub pause_resume_enabled: bool,
    pub stale_ttl_secs: i64,
    pub hosts: Arc<HashMap<i64, HostConfig>>,
    /// Per-operation timeout applied to queue-store calls made directly
    /// from inspection route handlers (see
    /// `cache_scheduler::queue_store::with_independent_timeout`).
    pub queue_store_timeout: Duration,
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/internal/cache/recache", post(routes::recache))
        .route("/internal/cache/invalidate", post(routes::invalidate))
        .route("/internal/cache/autorecache", post(routes::autorecache))
        .route("/status", get(routes::status))
        .route("/internal/scheduler/pause", post(routes::pause))
        .route("/internal/scheduler/resume", post(routes::resume))
        .route("/internal/cache/urls", get(routes::cache_urls))
        .route("/internal/cache/summary", get(routes::cache_summary))
        .route("/internal/cache/queue", get(routes::queue_list))
        .route("/internal/cache/queue/summary", get(routes::queue_summary))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_shared_secret))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    router
}

/// The separate metrics listener carries no auth.
#[must_use]
pub fn build_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(crate::metrics::metrics_endpoint))
        .with_state(state)
}
