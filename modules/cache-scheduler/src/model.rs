//! Data model shared by every component: queue members, internal queue
//! entries, RS capacity records, cache metadata, and host configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub type HostId = i64;
pub type DimensionId = i64;
pub type ServiceId = String;

/// Priority of a recache queue. `AutoRecache` is scored by due time rather
/// than insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    AutoRecache,
}

impl Priority {
    #[must_use]
    pub fn as_key_segment(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::AutoRecache => "autorecache",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_key_segment())
    }
}

/// A canonical URL plus a dimension id. Serialized form is the sole
/// dedup identity inside an ordered set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueMember {
    pub url: String,
    pub dimension_id: DimensionId,
}

impl QueueMember {
    #[must_use]
    pub fn new(url: impl Into<String>, dimension_id: DimensionId) -> Self {
        Self {
            url: url.into(),
            dimension_id,
        }
    }

    /// Canonical serialized form used as the ordered-set member string.
    /// Must be deterministic: two members with identical (url, dimension)
    /// always produce the same bytes, so the queue store collapses
    /// duplicate inserts.
    #[must_use]
    pub fn serialize(&self) -> String {
        serde_json::json!({"url": self.url, "dimension_id": self.dimension_id}).to_string()
    }

    /// Inverse of `serialize`. A malformed member is reported to the
    /// caller, who logs a WARN and skips it.
    pub fn deserialize(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Tri-state outcome of a conditional-enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalEnqueueOutcome {
    Added,
    Lowered,
    Unchanged,
}

/// An entry living in the in-memory Internal Queue (C3). `retry_count`
/// is always `< max_retries` while present; at `max_retries` the entry is
/// discarded rather than re-enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalEntry {
    pub host_id: HostId,
    pub url: String,
    pub dimension_id: DimensionId,
    pub retry_count: u32,
    pub queued_at: i64,
    pub last_attempt_at: Option<i64>,
    /// Zero means "ready now".
    pub next_retry_after: i64,
}

impl InternalEntry {
    #[must_use]
    pub fn fresh(host_id: HostId, member: QueueMember, now: i64) -> Self {
        Self {
            host_id,
            url: member.url,
            dimension_id: member.dimension_id,
            retry_count: 0,
            queued_at: now,
            last_attempt_at: None,
            next_retry_after: 0,
        }
    }

    #[must_use]
    pub fn is_ready(&self, now: i64) -> bool {
        self.next_retry_after == 0 || self.next_retry_after <= now
    }

    #[must_use]
    pub fn member(&self) -> QueueMember {
        QueueMember::new(self.url.clone(), self.dimension_id)
    }
}

/// A Render Service capacity heartbeat record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsRecord {
    pub service_id: ServiceId,
    pub address: String,
    pub port: u16,
    pub capacity: i64,
    pub load: i64,
    pub last_seen: i64,
}

impl RsRecord {
    #[must_use]
    pub fn is_healthy(&self, now: i64, registry_ttl_secs: i64) -> bool {
        now - self.last_seen < registry_ttl_secs
    }

    #[must_use]
    pub fn free_tabs(&self) -> i64 {
        (self.capacity - self.load).max(0)
    }

    /// Load percentage; treated as 100% when capacity <= 0.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn load_pct(&self) -> f64 {
        if self.capacity <= 0 {
            100.0
        } else {
            (self.load as f64 / self.capacity as f64) * 100.0
        }
    }
}

/// An Edge Gateway endpoint the Distributor can target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgEndpoint {
    pub id: String,
    pub address: String,
}

/// Render source for a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Render,
    Bypass,
}

/// Freshness classification used only by the Inspection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessClass {
    Active,
    Stale,
    Expired,
}

/// `now < expires_at` => active; `expires_at <= now < expires_at +
/// stale_ttl` => stale; otherwise expired. `stale_ttl == 0` collapses the
/// middle class away.
#[must_use]
pub fn classify_freshness(now: i64, expires_at: i64, stale_ttl_secs: i64) -> FreshnessClass {
    if now < expires_at {
        FreshnessClass::Active
    } else if stale_ttl_secs > 0 && now < expires_at + stale_ttl_secs {
        FreshnessClass::Stale
    } else {
        FreshnessClass::Expired
    }
}

/// Cache metadata as consumed (not owned) by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub host_id: HostId,
    pub dimension_id: DimensionId,
    pub url: String,
    pub size_bytes: u64,
    pub disk_size_bytes: u64,
    pub created_at: i64,
    pub expires_at: i64,
    pub status_code: u16,
    pub source: CacheSource,
    pub index_status: String,
    pub last_bot_hit: Option<i64>,
}

/// One rendering variant of a host, e.g. "mobile" or "desktop".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub id: DimensionId,
    pub name: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
}

/// A configured host: id, domain, and its dimension map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub id: HostId,
    pub domain: String,
    pub dimensions: HashMap<DimensionId, Dimension>,
}

impl HostConfig {
    #[must_use]
    pub fn all_dimension_ids(&self) -> Vec<DimensionId> {
        let mut ids: Vec<_> = self.dimensions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn has_dimension(&self, id: DimensionId) -> bool {
        self.dimensions.contains_key(&id)
    }

    /// Reverse lookup (id -> name), derived on demand.
    #[must_use]
    pub fn dimension_name(&self, id: DimensionId) -> Option<&str> {
        self.dimensions.get(&id).map(|d| d.name.as_str())
    }
}
