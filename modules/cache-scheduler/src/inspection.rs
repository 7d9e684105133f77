//! Status & Inspection API (C10) domain logic: the `/status` document and
//! the filter grammar shared by the inspection read endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capacity::CapacityOracle;
use crate::config::SchedulerConfig;
use crate::error::DaemonError;
use crate::internal_queue::InternalQueue;
use crate::model::{FreshnessClass, HostId, Priority};
use crate::queue_store::{with_independent_timeout, QueueStore};

pub const DEFAULT_LIMIT: u32 = 25;
pub const MIN_LIMIT: u32 = 1;
pub const MAX_LIMIT: u32 = 100;
pub const MAX_SUBSTRING_LEN: usize = 200;
pub const INITIAL_CURSOR: &str = "0";
pub const TERMINAL_CURSOR: &str = "0";

#[derive(Debug, Serialize)]
pub struct HostQueueStatus {
    pub host_id: HostId,
    pub high_pending: u64,
    pub normal_pending: u64,
    pub autorecache_pending: u64,
    pub autorecache_due: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusDocument {
    pub daemon_id: String,
    pub uptime_secs: i64,
    pub last_tick: Option<i64>,
    pub paused: bool,
    pub internal_queue_size: usize,
    pub internal_queue_capacity: usize,
    pub internal_queue_pct: f64,
    pub available_capacity: i64,
    pub hosts: Vec<HostQueueStatus>,
}

pub struct StatusReporter {
    daemon_id: String,
    started_at: i64,
    store: Arc<dyn QueueStore>,
    internal_queue: Arc<InternalQueue>,
    capacity_oracle: CapacityOracle,
    config: SchedulerConfig,
}

impl StatusReporter {
    #[must_use]
    pub fn new(
        daemon_id: String,
        started_at: i64,
        store: Arc<dyn QueueStore>,
        internal_queue: Arc<InternalQueue>,
        capacity_oracle: CapacityOracle,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            daemon_id,
            started_at,
            store,
            internal_queue,
            capacity_oracle,
            config,
        }
    }

    pub async fn status(&self, now: i64, last_tick: Option<i64>, paused: bool) -> Result<StatusDocument, DaemonError> {
        let timeout = self.config.queue_store_timeout;
        let capacity_oracle = self.capacity_oracle.clone();
        let available_capacity =
            with_independent_timeout(timeout, async move { capacity_oracle.available_capacity(now).await }).await?;
        let capacity = self.config.max_internal_queue.max(1);
        let size = self.internal_queue.len();

        let mut hosts = Vec::with_capacity(self.config.hosts.len());
        for host_id in self.config.sorted_host_ids() {
            let store = self.store.clone();
            let high_pending =
                with_independent_timeout(timeout, async move { store.count(host_id, Priority::High).await }).await?;
            let store = self.store.clone();
            let normal_pending =
                with_independent_timeout(timeout, async move { store.count(host_id, Priority::Normal).await }).await?;
            let store = self.store.clone();
            let autorecache_pending =
                with_independent_timeout(timeout, async move { store.count(host_id, Priority::AutoRecache).await }).await?;
            let store = self.store.clone();
            let autorecache_due = with_independent_timeout(timeout, async move {
                store.count_due(host_id, Priority::AutoRecache, now).await
            })
            .await?;
            hosts.push(HostQueueStatus {
                host_id,
                high_pending,
                normal_pending,
                autorecache_pending,
                autorecache_due,
            });
        }

        Ok(StatusDocument {
            daemon_id: self.daemon_id.clone(),
            uptime_secs: (now - self.started_at).max(0),
            last_tick,
            paused,
            internal_queue_size: size,
            #[allow(clippy::cast_precision_loss)]
            internal_queue_pct: (size as f64 / capacity as f64) * 100.0,
            internal_queue_capacity: self.config.max_internal_queue,
            available_capacity,
            hosts,
        })
    }
}

/// Parsed and validated inspection filter. Construction is
/// the validation step: boundary and range checks happen in `parse`, not
/// scattered across callers.
#[derive(Debug, Clone, Default)]
pub struct InspectionFilter {
    pub status: Vec<FreshnessClass>,
    pub priority: Vec<Priority>,
    pub substring: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub limit: u32,
    pub cursor: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawInspectionQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub substring: Option<String>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub age_min: Option<i64>,
    pub age_max: Option<i64>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

impl InspectionFilter {
    /// # Errors
    /// Returns a validation error for any boundary violation: `limit`
    /// outside `[1, 100]`, `size_max < size_min` when both positive, or a
    /// substring longer than 200 characters.
    pub fn parse(raw: RawInspectionQuery) -> Result<Self, DaemonError> {
        let limit = raw.limit.unwrap_or(DEFAULT_LIMIT);
        if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
            return Err(DaemonError::Validation(format!(
                "limit must be in [{MIN_LIMIT}, {MAX_LIMIT}]"
            )));
        }

        if let Some(substring) = &raw.substring {
            if substring.chars().count() > MAX_SUBSTRING_LEN {
                return Err(DaemonError::Validation(format!(
                    "substring filter exceeds {MAX_SUBSTRING_LEN} characters"
                )));
            }
        }

        if let (Some(min), Some(max)) = (raw.size_min, raw.size_max) {
            if min > 0 && max > 0 && max < min {
                return Err(DaemonError::Validation("size_max must be >= size_min".to_owned()));
            }
        }

        let status = parse_comma_list(raw.status.as_deref(), parse_freshness)?;
        let priority = parse_comma_list(raw.priority.as_deref(), parse_priority)?;

        Ok(Self {
            status,
            priority,
            substring: raw.substring,
            size_min: raw.size_min,
            size_max: raw.size_max,
            age_min: raw.age_min,
            age_max: raw.age_max,
            limit,
            cursor: raw.cursor.unwrap_or_else(|| INITIAL_CURSOR.to_owned()),
        })
    }
}

fn parse_comma_list<T>(
    raw: Option<&str>,
    parse_one: impl Fn(&str) -> Option<T>,
) -> Result<Vec<T>, DaemonError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_one(s).ok_or_else(|| DaemonError::Validation(format!("unrecognized filter value: {s}"))))
        .collect()
}

fn parse_freshness(s: &str) -> Option<FreshnessClass> {
    match s {
        "active" => Some(FreshnessClass::Active),
        "stale" => Some(FreshnessClass::Stale),
        "expired" => Some(FreshnessClass::Expired),
        _ => None,
    }
}

fn parse_priority(s: &str) -> Option<Priority> {
    match s {
        "high" => Some(Priority::High),
        "normal" => Some(Priority::Normal),
        "autorecache" => Some(Priority::AutoRecache),
        _ => None,
    }
}

/// Cache-URL listing filtered against a resolved set of metadata. The
/// scan itself (bounded iteration) lives in the `QueueStore`; this
/// function only applies the filter grammar to whatever the store
/// already returned.
#[must_use]
pub fn matches_filter(
    meta: &crate::model::CacheMetadata,
    filter: &InspectionFilter,
    now: i64,
    stale_ttl_secs: i64,
) -> bool {
    if !filter.status.is_empty() {
        let class = crate::model::classify_freshness(now, meta.expires_at, stale_ttl_secs);
        if !filter.status.contains(&class) {
            return false;
        }
    }
    if let Some(substring) = &filter.substring {
        if !meta.url.contains(substring.as_str()) {
            return false;
        }
    }
    if let Some(min) = filter.size_min {
        if meta.size_bytes < min {
            return false;
        }
    }
    if let Some(max) = filter.size_max {
        if max > 0 && meta.size_bytes > max {
            return false;
        }
    }
    if let Some(min_age) = filter.age_min {
        if now - meta.created_at < min_age {
            return false;
        }
    }
    if let Some(max_age) = filter.age_max {
        if max_age > 0 && now - meta.created_at > max_age {
            return false;
        }
    }
    true
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueSummary {
    pub pending: u64,
    pub processing: u64,
}

pub async fn queue_summary(
    store: &Arc<dyn QueueStore>,
    host_id: HostId,
    timeout: Duration,
) -> Result<QueueSummary, DaemonError> {
    let mut pending = 0u64;
    for priority in [Priority::High, Priority::Normal, Priority::AutoRecache] {
        let store = store.clone();
        pending += with_independent_timeout(timeout, async move { store.count(host_id, priority).await }).await?;
    }
    Ok(QueueSummary { pending, processing: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_zero_and_101_are_rejected() {
        assert!(InspectionFilter::parse(RawInspectionQuery {
            limit: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(InspectionFilter::parse(RawInspectionQuery {
            limit: Some(101),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn limit_boundaries_accepted() {
        assert!(InspectionFilter::parse(RawInspectionQuery {
            limit: Some(1),
            ..Default::default()
        })
        .is_ok());
        assert!(InspectionFilter::parse(RawInspectionQuery {
            limit: Some(100),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn size_max_less_than_size_min_rejected_unless_zero() {
        assert!(InspectionFilter::parse(RawInspectionQuery {
            size_min: Some(100),
            size_max: Some(10),
            ..Default::default()
        })
        .is_err());
        assert!(InspectionFilter::parse(RawInspectionQuery {
            size_min: Some(100),
            size_max: Some(0),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn substring_over_200_chars_rejected() {
        let long = "a".repeat(201);
        assert!(InspectionFilter::parse(RawInspectionQuery {
            substring: Some(long),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn stale_ttl_zero_collapses_stale_class() {
        assert_eq!(
            crate::model::classify_freshness(100, 50, 0),
            FreshnessClass::Expired
        );
        assert_eq!(
            crate::model::classify_freshness(40, 50, 0),
            FreshnessClass::Active
        );
    }
}
