//! Prometheus-text `/metrics` endpoint, hand-rolled against the plain
//! `prometheus` crate rather than a generic HTTP-request-shape
//! middleware, since what this daemon needs to expose is domain
//! counters, not request latency histograms (see DESIGN.md). Gauges are
//! refreshed from live state on every scrape; counters are fed from
//! `cache_scheduler::metrics::Counters`, which the Scheduler and Retry
//! Manager update as events happen.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use cache_scheduler::model::Priority;

use crate::http::AppState;

pub struct Metrics {
    registry: Registry,
    queue_size: IntGaugeVec,
    internal_queue_size: IntGauge,
    internal_queue_capacity: IntGauge,
    available_capacity: IntGauge,
    dispatch_succeeded: IntCounter,
    dispatch_failed: IntCounter,
    retries_issued: IntCounter,
    discards: IntCounter,
    last_tick_duration_micros: IntGauge,
}

impl Metrics {
    /// # Errors
    /// Returns an error if a collector name collides on registration
    /// (cannot happen with the fixed set below; surfaced anyway since
    /// `prometheus::Registry::register` is fallible).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_size = IntGaugeVec::new(
            Opts::new("cache_daemon_queue_size", "Members currently queued per host and priority"),
            &["host_id", "priority"],
        )?;
        let internal_queue_size = IntGauge::new("cache_daemon_internal_queue_size", "Entries currently held in the internal queue")?;
        let internal_queue_capacity = IntGauge::new("cache_daemon_internal_queue_capacity", "Configured capacity of the internal queue")?;
        let available_capacity = IntGauge::new("cache_daemon_available_capacity", "RS capacity currently available for recache dispatch")?;
        let dispatch_succeeded = IntCounter::new("cache_daemon_dispatch_succeeded_total", "Recache dispatches that returned HTTP 200")?;
        let dispatch_failed = IntCounter::new("cache_daemon_dispatch_failed_total", "Recache dispatches that failed, timed out, or returned non-200")?;
        let retries_issued = IntCounter::new("cache_daemon_retries_issued_total", "Failed dispatches re-enqueued with backoff")?;
        let discards = IntCounter::new("cache_daemon_discards_total", "Entries discarded after exceeding max retries")?;
        let last_tick_duration_micros = IntGauge::new("cache_daemon_last_tick_duration_micros", "Wall-clock duration of the most recent scheduler tick")?;

        registry.register(Box::new(queue_size.clone()))?;
        registry.register(Box::new(internal_queue_size.clone()))?;
        registry.register(Box::new(internal_queue_capacity.clone()))?;
        registry.register(Box::new(available_capacity.clone()))?;
        registry.register(Box::new(dispatch_succeeded.clone()))?;
        registry.register(Box::new(dispatch_failed.clone()))?;
        registry.register(Box::new(retries_issued.clone()))?;
        registry.register(Box::new(discards.clone()))?;
        registry.register(Box::new(last_tick_duration_micros.clone()))?;

        Ok(Self {
            registry,
            queue_size,
            internal_queue_size,
            internal_queue_capacity,
            available_capacity,
            dispatch_succeeded,
            dispatch_failed,
            retries_issued,
            discards,
            last_tick_duration_micros,
        })
    }

    /// Pull the latest values from the scheduler and queue store, set
    /// gauges, and reconcile the monotonic counters (which only move
    /// forward, so we add the delta since the last scrape).
    async fn refresh(&self, state: &AppState) {
        self.internal_queue_size.set(state.scheduler.internal_queue_len() as i64);
        self.internal_queue_capacity.set(state.scheduler.internal_queue_capacity() as i64);

        let mut host_ids: Vec<i64> = state.hosts.keys().copied().collect();
        host_ids.sort_unstable();
        for host_id in host_ids {
            for priority in [Priority::High, Priority::Normal, Priority::AutoRecache] {
                if let Ok(count) = state.store.count(host_id, priority).await {
                    self.queue_size
                        .with_label_values(&[&host_id.to_string(), priority.as_key_segment()])
                        .set(count as i64);
                }
            }
        }

        let now = unix_now();
        let paused = state.scheduler.is_paused();
        let last_tick = state.scheduler.last_tick();
        if let Ok(status) = state.status_reporter.status(now, last_tick, paused).await {
            self.available_capacity.set(status.available_capacity);
        }

        let snapshot = state.scheduler.counters().snapshot();
        reconcile_counter(&self.dispatch_succeeded, snapshot.dispatch_succeeded);
        reconcile_counter(&self.dispatch_failed, snapshot.dispatch_failed);
        reconcile_counter(&self.retries_issued, snapshot.retries_issued);
        reconcile_counter(&self.discards, snapshot.discards);
        self.last_tick_duration_micros.set(snapshot.last_tick_duration_micros as i64);
    }

    fn render(&self) -> Vec<u8> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

/// `IntCounter` has no `set`; bump it by the delta since our last read so
/// repeated scrapes stay monotonic even though the source of truth is a
/// plain snapshot, not a push.
fn reconcile_counter(counter: &IntCounter, target_total: u64) {
    let current = counter.get();
    if target_total > current {
        counter.inc_by(target_total - current);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    state.metrics.refresh(&state).await;
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}
