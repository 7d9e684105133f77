//! Distributor (C6): partitions a ready batch across healthy EGs and
//! fires one HTTP POST per entry concurrently.

use std::sync::Arc;
use std::time::Duration;

use daemon_http::HttpClient;
use serde::Serialize;

use crate::eg_registry::EgRegistry;
use crate::internal_queue::InternalQueue;
use crate::model::{EgEndpoint, InternalEntry};

const AUTH_HEADER: &str = "X-Internal-Auth";

#[derive(Serialize)]
struct RecacheRequestBody {
    url: String,
    host_id: i64,
    dimension_id: i64,
}

/// Outcome of one dispatch pass: entries that came back 200, and entries
/// that failed (transport error, timeout, or non-200) and must go to the
/// Retry Manager. Entries that were not-ready, or that had nowhere to go
/// because no EG or no capacity was available, are re-enqueued into the
/// Internal Queue directly by the Distributor and never appear here.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub succeeded: Vec<InternalEntry>,
    pub failed: Vec<InternalEntry>,
}

pub struct Distributor {
    http: HttpClient,
    eg_registry: Arc<dyn EgRegistry>,
    internal_queue: Arc<InternalQueue>,
    auth_secret: String,
    dispatch_timeout: Duration,
}

impl Distributor {
    #[must_use]
    pub fn new(
        http: HttpClient,
        eg_registry: Arc<dyn EgRegistry>,
        internal_queue: Arc<InternalQueue>,
        auth_secret: String,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            http,
            eg_registry,
            internal_queue,
            auth_secret,
            dispatch_timeout,
        }
    }

    /// Re-insert an entry into C3, unchanged. This "should never" fail
    /// right after a dequeue; if it does, the entry
    /// is lost and we log CRITICAL rather than panic (sizing C3 correctly
    /// is an operational responsibility, not something we can enforce
    /// here).
    fn reinsert_or_log_critical(&self, entry: InternalEntry, reason: &'static str) {
        if !self.internal_queue.enqueue(entry) {
            tracing::error!(critical = true, reason, "internal queue full on re-insert — entry lost");
        }
    }

    /// Dispatch up to `available_capacity` entries dequeued from C3.
    pub async fn dispatch(&self, entries: Vec<InternalEntry>, now: i64) -> DispatchOutcome {
        let (ready, not_ready): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| entry.is_ready(now));

        for entry in not_ready {
            self.reinsert_or_log_critical(entry, "not-ready entry re-enqueued unchanged");
        }

        if ready.is_empty() {
            return DispatchOutcome::default();
        }

        let egs = match self.eg_registry.healthy_egs().await {
            Ok(egs) => egs,
            Err(e) => {
                tracing::warn!(error = %e, "failed to query EG registry; re-enqueueing batch");
                for entry in ready {
                    self.reinsert_or_log_critical(entry, "EG registry query failed");
                }
                return DispatchOutcome::default();
            }
        };

        if egs.is_empty() {
            tracing::info!(count = ready.len(), "no healthy EGs; re-enqueueing batch");
            for entry in ready {
                self.reinsert_or_log_critical(entry, "no healthy EGs");
            }
            return DispatchOutcome::default();
        }

        let shards = partition_evenly(ready, egs.len());

        let mut worker_handles = Vec::with_capacity(egs.len());
        for (shard, eg) in shards.into_iter().zip(egs.into_iter()) {
            if shard.is_empty() {
                continue;
            }
            let http = self.http.clone();
            let secret = self.auth_secret.clone();
            let timeout = self.dispatch_timeout;
            worker_handles.push(tokio::spawn(dispatch_shard(http, eg, shard, secret, timeout)));
        }

        let mut outcome = DispatchOutcome::default();
        for handle in worker_handles {
            match handle.await {
                Ok(results) => {
                    for (entry, success) in results {
                        if success {
                            outcome.succeeded.push(entry);
                        } else {
                            outcome.failed.push(entry);
                        }
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "dispatch worker panicked");
                }
            }
        }
        outcome
    }
}

/// Fan out per-entry HTTP POSTs within a shard, in parallel, with no
/// intra-shard ordering guarantee.
async fn dispatch_shard(
    http: HttpClient,
    eg: EgEndpoint,
    shard: Vec<InternalEntry>,
    auth_secret: String,
    timeout: Duration,
) -> Vec<(InternalEntry, bool)> {
    let mut tasks = Vec::with_capacity(shard.len());
    for entry in shard {
        let http = http.clone();
        let eg = eg.clone();
        let auth_secret = auth_secret.clone();
        tasks.push(tokio::spawn(async move {
            let success = dispatch_one(&http, &eg, &entry, &auth_secret, timeout).await;
            (entry, success)
        }));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(result) => results.push(result),
            Err(join_err) => tracing::error!(error = %join_err, "dispatch task panicked"),
        }
    }
    results
}

/// An entry is a success iff the HTTP status is 200. Any transport error,
/// timeout, or non-200 is a failure.
async fn dispatch_one(
    http: &HttpClient,
    eg: &EgEndpoint,
    entry: &InternalEntry,
    auth_secret: &str,
    timeout: Duration,
) -> bool {
    let url = format!("http://{}/internal/cache/recache", eg.address);
    let body = RecacheRequestBody {
        url: entry.url.clone(),
        host_id: entry.host_id,
        dimension_id: entry.dimension_id,
    };
    match http
        .post_json(&url, &body, (AUTH_HEADER, auth_secret), timeout)
        .await
    {
        Ok(status) => status == http::StatusCode::OK,
        Err(e) => {
            tracing::debug!(eg = %eg.id, url = %entry.url, error = %e, "dispatch failed");
            false
        }
    }
}

/// Partition `items` across `n` shards as evenly as possible: remainder
/// `R` entries go one each to the first `R` shards. Empty shards are
/// skipped by the caller.
fn partition_evenly<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    if n == 0 {
        return vec![];
    }
    let total = items.len();
    let base = total / n;
    let remainder = total % n;
    let mut shards = Vec::with_capacity(n);
    let mut iter = items.into_iter();
    for i in 0..n {
        let size = base + usize::from(i < remainder);
        shards.push(iter.by_ref().take(size).collect());
    }
    shards
}
