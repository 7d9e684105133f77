//! Ingestion & Invalidation API (C9) domain logic: URL × dimension
//! expansion, validation, and the actual writes to the queue store.
//! HTTP adaptation (request/response JSON, auth) lives in
//! `apps/cache-daemon`; this module is the part that's unit-testable
//! without `axum` in scope.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::model::{DimensionId, HostId, Priority, QueueMember};
use crate::queue_store::{with_independent_timeout, QueueStore};
use crate::url_normalize::{hash_url, normalize_url};

pub const MAX_URLS_PER_REQUEST: usize = 10_000;

#[derive(Debug)]
pub struct RecacheRequest {
    pub host_id: HostId,
    pub urls: Vec<String>,
    pub dimension_ids: Option<Vec<DimensionId>>,
    pub priority: Priority,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecacheResponse {
    pub host_id: HostId,
    pub urls_count: usize,
    pub dimension_ids_count: usize,
    pub entries_enqueued: usize,
    pub priority: String,
}

#[derive(Debug)]
pub struct InvalidateRequest {
    pub host_id: HostId,
    pub urls: Vec<String>,
    pub dimension_ids: Option<Vec<DimensionId>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidateResponse {
    pub host_id: HostId,
    pub urls_count: usize,
    pub dimension_ids_count: usize,
    pub entries_invalidated: usize,
}

pub struct IngestionService {
    store: Arc<dyn QueueStore>,
    hosts: crate::config::SchedulerConfig,
    queue_store_timeout: Duration,
}

impl IngestionService {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, hosts: crate::config::SchedulerConfig) -> Self {
        let queue_store_timeout = hosts.queue_store_timeout;
        Self { store, hosts, queue_store_timeout }
    }

    fn resolve_dimensions(
        &self,
        host_id: HostId,
        requested: &Option<Vec<DimensionId>>,
    ) -> Result<Vec<DimensionId>, DaemonError> {
        let host = self
            .hosts
            .hosts
            .get(&host_id)
            .ok_or(DaemonError::UnknownHost(host_id))?;
        match requested {
            None => Ok(host.all_dimension_ids()),
            Some(ids) if ids.is_empty() => Ok(host.all_dimension_ids()),
            Some(ids) => {
                for &dimension_id in ids {
                    if !host.has_dimension(dimension_id) {
                        return Err(DaemonError::UnknownDimension { host_id, dimension_id });
                    }
                }
                Ok(ids.clone())
            }
        }
    }

    /// `/internal/cache/recache`. Validation (non-empty,
    /// `<= MAX_URLS_PER_REQUEST`, known host/dimensions) fails the whole
    /// request before any write; per-URL normalization failures are
    /// logged and skipped without aborting the rest.
    pub async fn recache(&self, req: RecacheRequest) -> Result<RecacheResponse, DaemonError> {
        if !self.hosts.hosts.contains_key(&req.host_id) {
            return Err(DaemonError::UnknownHost(req.host_id));
        }
        if req.urls.is_empty() {
            return Err(DaemonError::Validation("urls must not be empty".to_owned()));
        }
        if req.urls.len() > MAX_URLS_PER_REQUEST {
            return Err(DaemonError::Validation(format!(
                "urls count {} exceeds max {MAX_URLS_PER_REQUEST}",
                req.urls.len()
            )));
        }
        if !matches!(req.priority, Priority::High | Priority::Normal) {
            return Err(DaemonError::Validation("priority must be high or normal".to_owned()));
        }

        let dimension_ids = self.resolve_dimensions(req.host_id, &req.dimension_ids)?;
        let now = unix_now();

        let mut entries_enqueued = 0usize;
        for raw_url in &req.urls {
            let normalized = match normalize_url(raw_url) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(url = %raw_url, error = %e, "url normalization failed, skipping");
                    continue;
                }
            };
            for &dimension_id in &dimension_ids {
                let member = QueueMember::new(normalized.clone(), dimension_id);
                let store = self.store.clone();
                let host_id = req.host_id;
                let priority = req.priority;
                with_independent_timeout(self.queue_store_timeout, async move {
                    store.enqueue(host_id, priority, &member, now).await
                })
                .await?;
                entries_enqueued += 1;
            }
        }

        Ok(RecacheResponse {
            host_id: req.host_id,
            urls_count: req.urls.len(),
            dimension_ids_count: dimension_ids.len(),
            entries_enqueued,
            priority: req.priority.as_key_segment().to_owned(),
        })
    }

    /// `/internal/cache/invalidate`. Does not touch queue
    /// state: a missing metadata record is the signal readers treat as
    /// "not cached".
    pub async fn invalidate(&self, req: InvalidateRequest) -> Result<InvalidateResponse, DaemonError> {
        if !self.hosts.hosts.contains_key(&req.host_id) {
            return Err(DaemonError::UnknownHost(req.host_id));
        }
        if req.urls.is_empty() {
            return Err(DaemonError::Validation("urls must not be empty".to_owned()));
        }

        let dimension_ids = self.resolve_dimensions(req.host_id, &req.dimension_ids)?;

        let mut entries_invalidated = 0usize;
        for raw_url in &req.urls {
            let normalized = match normalize_url(raw_url) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(url = %raw_url, error = %e, "url normalization failed, skipping");
                    continue;
                }
            };
            let url_hash = hash_url(&normalized);
            for &dimension_id in &dimension_ids {
                let store = self.store.clone();
                let host_id = req.host_id;
                let url_hash = url_hash.clone();
                let deleted = with_independent_timeout(self.queue_store_timeout, async move {
                    store.delete_cache_metadata(host_id, dimension_id, &url_hash).await
                })
                .await?;
                if deleted {
                    entries_invalidated += 1;
                }
            }
        }

        Ok(InvalidateResponse {
            host_id: req.host_id,
            urls_count: req.urls.len(),
            dimension_ids_count: dimension_ids.len(),
            entries_invalidated,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
