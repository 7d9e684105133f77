//! Route handlers. Each handler parses
//! and validates its own input, delegates to `cache_scheduler`, and maps
//! `DaemonError` to the HTTP error envelope via `error_map`.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use cache_scheduler::inspection::{self, InspectionFilter, RawInspectionQuery, TERMINAL_CURSOR};
use cache_scheduler::ingestion::{InvalidateRequest, RecacheRequest};
use cache_scheduler::model::{CacheMetadata, ConditionalEnqueueOutcome, Priority};
use cache_scheduler::queue_store::with_independent_timeout;
use daemon_errors::Problem;

use super::AppState;
use super::error_map::map_daemon_error;

#[derive(Debug, Deserialize)]
pub struct HostQuery {
    pub host_id: i64,
}

fn parse_request_priority(raw: &str) -> Result<Priority, Problem> {
    match raw {
        "high" => Ok(Priority::High),
        "normal" => Ok(Priority::Normal),
        other => Err(Problem::bad_request(format!("priority must be \"high\" or \"normal\", got \"{other}\""))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn require_known_host(state: &AppState, host_id: i64) -> Result<(), Problem> {
    if state.hosts.contains_key(&host_id) {
        Ok(())
    } else {
        Err(Problem::not_found(format!("unknown host {host_id}")))
    }
}

fn parse_cursor(raw: &str) -> Result<usize, Problem> {
    raw.parse()
        .map_err(|_| Problem::bad_request(format!("invalid cursor \"{raw}\"")))
}

// ---- recache / invalidate / autorecache -----------------------------

#[derive(Debug, Deserialize)]
pub struct RecacheBody {
    pub host_id: i64,
    pub urls: Vec<String>,
    pub dimension_ids: Option<Vec<i64>>,
    pub priority: String,
}

pub async fn recache(State(state): State<AppState>, Json(body): Json<RecacheBody>) -> Response {
    let priority = match parse_request_priority(&body.priority) {
        Ok(p) => p,
        Err(problem) => return problem.into_response(),
    };
    let result = state
        .ingestion
        .recache(RecacheRequest {
            host_id: body.host_id,
            urls: body.urls,
            dimension_ids: body.dimension_ids,
            priority,
        })
        .await;
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_daemon_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct InvalidateBody {
    pub host_id: i64,
    pub urls: Vec<String>,
    pub dimension_ids: Option<Vec<i64>>,
}

pub async fn invalidate(State(state): State<AppState>, Json(body): Json<InvalidateBody>) -> Response {
    let result = state
        .ingestion
        .invalidate(InvalidateRequest {
            host_id: body.host_id,
            urls: body.urls,
            dimension_ids: body.dimension_ids,
        })
        .await;
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => map_daemon_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct AutorecacheBody {
    pub host_id: i64,
    pub url: String,
    pub dimension_id: i64,
    pub due_at: i64,
}

#[derive(Debug, Serialize)]
pub struct AutorecacheResponse {
    pub outcome: ConditionalEnqueueOutcome,
}

/// Exposes `SchedulerHandle::autorecache` (C8) over the authenticated
/// surface so operators and EGs can register a due-time recache without
/// going through the scheduler loop's own cadence (decision recorded in
/// DESIGN.md).
pub async fn autorecache(State(state): State<AppState>, Json(body): Json<AutorecacheBody>) -> Response {
    if require_known_host(&state, body.host_id).is_err() {
        return Problem::not_found(format!("unknown host {}", body.host_id)).into_response();
    }
    match state
        .scheduler
        .autorecache(body.host_id, &body.url, body.dimension_id, body.due_at)
        .await
    {
        Ok(outcome) => Json(AutorecacheResponse { outcome }).into_response(),
        Err(e) => map_daemon_error(e).into_response(),
    }
}

// ---- status / pause / resume -----------------------------------------

pub async fn status(State(state): State<AppState>) -> Response {
    let now = unix_now();
    let paused = state.scheduler.is_paused();
    let last_tick = state.scheduler.last_tick();
    match state.status_reporter.status(now, last_tick, paused).await {
        Ok(doc) => Json(doc).into_response(),
        Err(e) => map_daemon_error(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub paused: bool,
}

pub async fn pause(State(state): State<AppState>) -> Response {
    if !state.pause_resume_enabled {
        return Problem::forbidden("pause/resume is disabled by configuration").into_response();
    }
    state.scheduler.pause();
    Json(ToggleResponse { paused: true }).into_response()
}

pub async fn resume(State(state): State<AppState>) -> Response {
    if !state.pause_resume_enabled {
        return Problem::forbidden("pause/resume is disabled by configuration").into_response();
    }
    state.scheduler.resume();
    Json(ToggleResponse { paused: false }).into_response()
}

// ---- inspection reads --------------------------------------------------

const SCAN_CAP: usize = 50_000;

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub cursor: String,
}

pub async fn cache_urls(
    State(state): State<AppState>,
    Query(HostQuery { host_id }): Query<HostQuery>,
    Query(raw): Query<RawInspectionQuery>,
) -> Response {
    if let Err(problem) = require_known_host(&state, host_id) {
        return problem.into_response();
    }
    let filter = match InspectionFilter::parse(raw) {
        Ok(f) => f,
        Err(e) => return map_daemon_error(e).into_response(),
    };
    let offset = match parse_cursor(&filter.cursor) {
        Ok(o) => o,
        Err(problem) => return problem.into_response(),
    };

    let now = unix_now();
    let scan_limit = offset.saturating_add(filter.limit as usize).saturating_add(1).min(SCAN_CAP);
    let store = state.store.clone();
    let scanned = match with_independent_timeout(state.queue_store_timeout, async move {
        store.scan_cache_metadata(host_id, scan_limit).await
    })
    .await
    {
        Ok(v) => v,
        Err(e) => return map_daemon_error(e).into_response(),
    };
    let matched: Vec<CacheMetadata> = scanned
        .into_iter()
        .filter(|m| inspection::matches_filter(m, &filter, now, state.stale_ttl_secs))
        .collect();

    let page: Vec<CacheMetadata> = matched.iter().skip(offset).take(filter.limit as usize).cloned().collect();
    let cursor = if matched.len() > offset + page.len() {
        (offset + page.len()).to_string()
    } else {
        TERMINAL_CURSOR.to_owned()
    };

    Json(PaginatedResponse { items: page, cursor }).into_response()
}

#[derive(Debug, Serialize)]
pub struct CacheSummaryResponse {
    pub host_id: i64,
    pub total: usize,
    pub active: usize,
    pub stale: usize,
    pub expired: usize,
}

pub async fn cache_summary(State(state): State<AppState>, Query(HostQuery { host_id }): Query<HostQuery>) -> Response {
    if let Err(problem) = require_known_host(&state, host_id) {
        return problem.into_response();
    }
    let now = unix_now();
    let store = state.store.clone();
    let scanned = match with_independent_timeout(state.queue_store_timeout, async move {
        store.scan_cache_metadata(host_id, SCAN_CAP).await
    })
    .await
    {
        Ok(v) => v,
        Err(e) => return map_daemon_error(e).into_response(),
    };
    let mut summary = CacheSummaryResponse {
        host_id,
        total: scanned.len(),
        active: 0,
        stale: 0,
        expired: 0,
    };
    for meta in &scanned {
        match cache_scheduler::model::classify_freshness(now, meta.expires_at, state.stale_ttl_secs) {
            cache_scheduler::model::FreshnessClass::Active => summary.active += 1,
            cache_scheduler::model::FreshnessClass::Stale => summary.stale += 1,
            cache_scheduler::model::FreshnessClass::Expired => summary.expired += 1,
        }
    }
    Json(summary).into_response()
}

#[derive(Debug, Serialize)]
pub struct QueueMemberItem {
    pub host_id: i64,
    pub priority: String,
    pub url: String,
    pub dimension_id: i64,
    pub due_at: i64,
}

pub async fn queue_list(
    State(state): State<AppState>,
    Query(HostQuery { host_id }): Query<HostQuery>,
    Query(raw): Query<RawInspectionQuery>,
) -> Response {
    if let Err(problem) = require_known_host(&state, host_id) {
        return problem.into_response();
    }
    let filter = match InspectionFilter::parse(raw) {
        Ok(f) => f,
        Err(e) => return map_daemon_error(e).into_response(),
    };
    let offset = match parse_cursor(&filter.cursor) {
        Ok(o) => o,
        Err(problem) => return problem.into_response(),
    };

    let priorities: Vec<Priority> = if filter.priority.is_empty() {
        vec![Priority::High, Priority::Normal, Priority::AutoRecache]
    } else {
        filter.priority.clone()
    };

    let scan_limit = offset.saturating_add(filter.limit as usize).saturating_add(1).min(SCAN_CAP);
    let mut members: Vec<(Priority, cache_scheduler::model::QueueMember, i64)> = Vec::new();
    for priority in priorities {
        let store = state.store.clone();
        let result = with_independent_timeout(state.queue_store_timeout, async move {
            store.list_queue_members(host_id, priority, scan_limit).await
        })
        .await;
        match result {
            Ok(entries) => members.extend(entries.into_iter().map(|(m, score)| (priority, m, score))),
            Err(e) => return map_daemon_error(e).into_response(),
        }
    }
    members.sort_by_key(|(_, _, score)| *score);

    let total = members.len();
    let page: Vec<QueueMemberItem> = members
        .into_iter()
        .skip(offset)
        .take(filter.limit as usize)
        .map(|(priority, member, score)| QueueMemberItem {
            host_id,
            priority: priority.as_key_segment().to_owned(),
            url: member.url,
            dimension_id: member.dimension_id,
            due_at: score,
        })
        .collect();
    let cursor = if total > offset + page.len() {
        (offset + page.len()).to_string()
    } else {
        TERMINAL_CURSOR.to_owned()
    };

    Json(PaginatedResponse { items: page, cursor }).into_response()
}

pub async fn queue_summary(State(state): State<AppState>, Query(HostQuery { host_id }): Query<HostQuery>) -> Response {
    if let Err(problem) = require_known_host(&state, host_id) {
        return problem.into_response();
    }
    match inspection::queue_summary(&state.store, host_id, state.queue_store_timeout).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => map_daemon_error(e).into_response(),
    }
}
