//! End-to-end tests over the authenticated HTTP surface: auth enforcement,
//! request validation, and the wire shape of each route, driven through
//! `axum::Router` via `tower::ServiceExt::oneshot` rather than a bound
//! socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use cache_daemon::http::{build_router, AppState};
use cache_scheduler::capacity::{CapacityConfig, CapacityOracle};
use cache_scheduler::config::SchedulerConfig;
use cache_scheduler::distributor::Distributor;
use cache_scheduler::eg_registry::StaticEgRegistry;
use cache_scheduler::ingestion::IngestionService;
use cache_scheduler::inspection::StatusReporter;
use cache_scheduler::internal_queue::InternalQueue;
use cache_scheduler::metrics::Counters;
use cache_scheduler::model::{CacheMetadata, CacheSource, Dimension, HostConfig};
use cache_scheduler::queue_store::{MemoryStore, QueueStore};
use cache_scheduler::retry::{RetryConfig, RetryManager};
use cache_scheduler::SchedulerHandle;
use daemon_http::HttpClient;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-secret";

fn host(id: i64, domain: &str) -> HostConfig {
    HostConfig {
        id,
        domain: domain.to_owned(),
        dimensions: HashMap::from([
            (
                1,
                Dimension {
                    id: 1,
                    name: "desktop".to_owned(),
                    viewport_width: 1920,
                    viewport_height: 1080,
                    user_agent: "ua-desktop".to_owned(),
                },
            ),
            (
                2,
                Dimension {
                    id: 2,
                    name: "mobile".to_owned(),
                    viewport_width: 400,
                    viewport_height: 800,
                    user_agent: "ua-mobile".to_owned(),
                },
            ),
        ]),
    }
}

fn build_state(pause_resume_enabled: bool) -> (AppState, Arc<MemoryStore>) {
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn QueueStore> = memory.clone();

    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(1),
        normal_check_every_n_ticks: 1,
        max_internal_queue: 100,
        dispatch_timeout: Duration::from_secs(1),
        queue_store_timeout: Duration::from_secs(3),
        retry: RetryConfig {
            max_retries: 3,
            base_delay_secs: 5,
        },
        capacity: CapacityConfig {
            registry_ttl_secs: 60,
            reservation_fraction: 0.0,
        },
        hosts: HashMap::from([(1, host(1, "a.example.com")), (2, host(2, "b.example.com"))]),
        shared_secret: SECRET.to_owned(),
        pause_resume_enabled,
        strict_mode: false,
        stale_ttl_secs: 60,
    };

    let internal_queue = Arc::new(InternalQueue::new(config.max_internal_queue));
    let capacity_oracle = CapacityOracle::new(store.clone(), config.capacity);
    let distributor = Distributor::new(
        HttpClient::new().expect("http client builds"),
        Arc::new(StaticEgRegistry::new(vec![])),
        internal_queue.clone(),
        config.shared_secret.clone(),
        config.dispatch_timeout,
    );
    let counters = Arc::new(Counters::default());
    let retry_manager = RetryManager::new(internal_queue.clone(), config.retry, counters.clone());
    let scheduler = Arc::new(SchedulerHandle::new(
        store.clone(),
        internal_queue.clone(),
        capacity_oracle.clone(),
        distributor,
        retry_manager,
        config.clone(),
        counters,
    ));
    let ingestion = Arc::new(IngestionService::new(store.clone(), config.clone()));
    let status_reporter = Arc::new(StatusReporter::new(
        "daemon-under-test".to_owned(),
        0,
        store.clone(),
        internal_queue,
        capacity_oracle,
        config.clone(),
    ));
    let metrics = Arc::new(cache_daemon::metrics::Metrics::new().expect("metrics registry builds"));

    let state = AppState {
        scheduler,
        store,
        ingestion,
        status_reporter,
        metrics,
        shared_secret: config.shared_secret.clone(),
        pause_resume_enabled: config.pause_resume_enabled,
        stale_ttl_secs: config.stale_ttl_secs,
        hosts: Arc::new(config.hosts.clone()),
        queue_store_timeout: config.queue_store_timeout,
    };

    (state, memory)
}

async fn call(state: &AppState, method: &str, uri: &str, auth: Option<&str>, body: Value) -> (StatusCode, Value) {
    let router = build_router(state.clone());
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = auth {
        builder = builder.header("X-Internal-Auth", secret);
    }
    let body_bytes = if body.is_null() { String::new() } else { body.to_string() };
    let request = builder
        .header("content-type", "application/json")
        .body(Body::from(body_bytes))
        .expect("request builds");

    let response = router.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = response.into_body().collect().await.expect("body readable").to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn missing_auth_header_is_rejected() {
    let (state, _store) = build_state(true);
    let (status, _) = call(&state, "GET", "/status", None, Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_auth_header_is_rejected() {
    let (state, _store) = build_state(true);
    let (status, _) = call(&state, "GET", "/status", Some("not-the-secret"), Value::Null).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_configured_hosts() {
    let (state, _store) = build_state(true);
    let (status, body) = call(&state, "GET", "/status", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["daemon_id"], "daemon-under-test");
    assert_eq!(body["paused"], false);
    assert_eq!(body["hosts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn recache_rejects_unknown_host() {
    let (state, _store) = build_state(true);
    let (status, body) = call(
        &state,
        "POST",
        "/internal/cache/recache",
        Some(SECRET),
        json!({"host_id": 999, "urls": ["https://a.example.com/x"], "priority": "high"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn recache_rejects_empty_url_list() {
    let (state, _store) = build_state(true);
    let (status, _) = call(
        &state,
        "POST",
        "/internal/cache/recache",
        Some(SECRET),
        json!({"host_id": 1, "urls": [], "priority": "high"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recache_rejects_unrecognized_priority() {
    let (state, _store) = build_state(true);
    let (status, _) = call(
        &state,
        "POST",
        "/internal/cache/recache",
        Some(SECRET),
        json!({"host_id": 1, "urls": ["https://a.example.com/x"], "priority": "autorecache"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recache_expands_across_both_dimensions_and_enqueues() {
    let (state, store) = build_state(true);
    let (status, body) = call(
        &state,
        "POST",
        "/internal/cache/recache",
        Some(SECRET),
        json!({"host_id": 1, "urls": ["https://a.example.com/x", "https://a.example.com/y"], "priority": "high"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries_enqueued"], 4);
    assert_eq!(
        store.count(1, cache_scheduler::model::Priority::High).await.unwrap(),
        4
    );
}

#[tokio::test]
async fn invalidate_missing_entry_counts_zero() {
    let (state, _store) = build_state(true);
    let (status, body) = call(
        &state,
        "POST",
        "/internal/cache/invalidate",
        Some(SECRET),
        json!({"host_id": 1, "urls": ["https://a.example.com/never-cached"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries_invalidated"], 0);
}

#[tokio::test]
async fn invalidate_rejects_unknown_host() {
    let (state, _store) = build_state(true);
    let (status, body) = call(
        &state,
        "POST",
        "/internal/cache/invalidate",
        Some(SECRET),
        json!({"host_id": 999, "urls": ["https://a.example.com/x"]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn autorecache_rejects_unknown_host() {
    let (state, _store) = build_state(true);
    let (status, _) = call(
        &state,
        "POST",
        "/internal/cache/autorecache",
        Some(SECRET),
        json!({"host_id": 999, "url": "https://a.example.com/x", "dimension_id": 1, "due_at": 100}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn autorecache_tri_state_outcome_over_repeated_calls() {
    let (state, _store) = build_state(true);
    let body = json!({"host_id": 1, "url": "https://a.example.com/x", "dimension_id": 1, "due_at": 500});

    let (status, resp) = call(&state, "POST", "/internal/cache/autorecache", Some(SECRET), body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["outcome"], "added");

    let lower = json!({"host_id": 1, "url": "https://a.example.com/x", "dimension_id": 1, "due_at": 100});
    let (_, resp) = call(&state, "POST", "/internal/cache/autorecache", Some(SECRET), lower).await;
    assert_eq!(resp["outcome"], "lowered");

    let higher = json!({"host_id": 1, "url": "https://a.example.com/x", "dimension_id": 1, "due_at": 900});
    let (_, resp) = call(&state, "POST", "/internal/cache/autorecache", Some(SECRET), higher).await;
    assert_eq!(resp["outcome"], "unchanged");
}

#[tokio::test]
async fn pause_resume_toggle_when_enabled() {
    let (state, _store) = build_state(true);
    let (status, body) = call(&state, "POST", "/internal/scheduler/pause", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], true);
    assert!(state.scheduler.is_paused());

    let (status, body) = call(&state, "POST", "/internal/scheduler/resume", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], false);
    assert!(!state.scheduler.is_paused());
}

#[tokio::test]
async fn pause_resume_forbidden_when_disabled() {
    let (state, _store) = build_state(false);
    let (status, _) = call(&state, "POST", "/internal/scheduler/pause", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

fn meta(host_id: i64, dimension_id: i64, url: &str, expires_at: i64, size_bytes: u64) -> CacheMetadata {
    CacheMetadata {
        host_id,
        dimension_id,
        url: url.to_owned(),
        size_bytes,
        disk_size_bytes: size_bytes,
        created_at: 0,
        expires_at,
        status_code: 200,
        source: CacheSource::Render,
        index_status: "indexed".to_owned(),
        last_bot_hit: None,
    }
}

#[tokio::test]
async fn cache_urls_paginates_with_cursor() {
    let (state, store) = build_state(true);
    for i in 0..3 {
        store.put_cache_metadata(1, 1, &format!("hash-{i}"), meta(1, 1, &format!("https://a.example.com/{i}"), 10_000, 100));
    }

    let (status, body) = call(&state, "GET", "/internal/cache/urls?host_id=1&limit=2", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let page1 = body["items"].as_array().unwrap();
    assert_eq!(page1.len(), 2);
    let cursor = body["cursor"].as_str().unwrap().to_owned();
    assert_ne!(cursor, "0");

    let uri = format!("/internal/cache/urls?host_id=1&limit=2&cursor={cursor}");
    let (status, body) = call(&state, "GET", &uri, Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let page2 = body["items"].as_array().unwrap();
    assert_eq!(page2.len(), 1);
    assert_eq!(body["cursor"], "0");
}

#[tokio::test]
async fn cache_urls_rejects_unknown_host() {
    let (state, _store) = build_state(true);
    let (status, _) = call(&state, "GET", "/internal/cache/urls?host_id=999", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cache_summary_classifies_by_freshness() {
    let (state, store) = build_state(true);
    store.put_cache_metadata(1, 1, "active", meta(1, 1, "https://a.example.com/active", 10_000, 100));
    store.put_cache_metadata(1, 1, "expired", meta(1, 1, "https://a.example.com/expired", 1, 100));

    let (status, body) = call(&state, "GET", "/internal/cache/summary?host_id=1", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["active"], 1);
    assert_eq!(body["expired"], 1);
}

#[tokio::test]
async fn queue_list_combines_priorities_sorted_by_due_time() {
    let (state, store) = build_state(true);
    store
        .enqueue(1, cache_scheduler::model::Priority::High, &cache_scheduler::model::QueueMember::new("https://a.example.com/late", 1), 500)
        .await
        .unwrap();
    store
        .enqueue(1, cache_scheduler::model::Priority::Normal, &cache_scheduler::model::QueueMember::new("https://a.example.com/early", 1), 50)
        .await
        .unwrap();

    let (status, body) = call(&state, "GET", "/internal/cache/queue?host_id=1", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["url"], "https://a.example.com/early");
    assert_eq!(items[1]["url"], "https://a.example.com/late");
}

#[tokio::test]
async fn queue_summary_reports_total_pending() {
    let (state, store) = build_state(true);
    store
        .enqueue(1, cache_scheduler::model::Priority::High, &cache_scheduler::model::QueueMember::new("https://a.example.com/x", 1), 50)
        .await
        .unwrap();
    store
        .enqueue(1, cache_scheduler::model::Priority::Normal, &cache_scheduler::model::QueueMember::new("https://a.example.com/y", 1), 50)
        .await
        .unwrap();

    let (status, body) = call(&state, "GET", "/internal/cache/queue/summary?host_id=1", Some(SECRET), Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 2);
}
