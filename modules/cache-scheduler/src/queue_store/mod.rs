//! Queue Store (C1/C2): the external, persistent ordered-set contract,
//! plus the RS heartbeat hash and the cache-metadata reads/deletes the
//! Invalidation and Inspection APIs need. Cache metadata itself is
//! consumed here, never owned: this daemon schedules recaches, it does
//! not write the cache.
//!
//! `QueueStore` is a trait so the Scheduler, Ingestion API, and
//! Autorecache entry point never depend on a concrete backend — the
//! production backend is `RedisStore` (Redis sorted sets + a Lua script
//! for the conditional-enqueue tri-state), the test backend is
//! `MemoryStore` (a `parking_lot`-guarded `BTreeMap`-based sorted set).

pub mod memory;
pub mod redis_store;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DaemonError;
use crate::model::{
    CacheMetadata, ConditionalEnqueueOutcome, DimensionId, HostId, Priority, QueueMember, RsRecord,
};

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Runs a queue-store operation on its own task so that cancelling the
/// caller (a client disconnecting mid-request) can never abort it
/// mid-flight; only the wait for its result is bounded. `fut` must
/// already own everything it touches (an `Arc<dyn QueueStore>` clone and
/// owned arguments), since it keeps running after this function's own
/// await is dropped.
pub async fn with_independent_timeout<F, T>(timeout: Duration, fut: F) -> Result<T, DaemonError>
where
    F: Future<Output = Result<T, DaemonError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::spawn(fut)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(DaemonError::QueueStore(format!("queue store task panicked: {join_error}"))),
        Err(_elapsed) => Err(DaemonError::QueueStoreTimeout),
    }
}

fn queue_key(host_id: HostId, priority: Priority) -> String {
    format!("recache:{host_id}:{}", priority.as_key_segment())
}

fn rs_record_key(service_id: &str) -> String {
    format!("service:render:{service_id}")
}

const RS_REGISTRY_LIST_KEY: &str = "services:render:list";

fn cache_meta_key(host_id: HostId, dimension_id: DimensionId, url_hash: &str) -> String {
    format!("meta:cache:{host_id}:{dimension_id}:{url_hash}")
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Add (member, score). Duplicate member updates the existing score
    /// unconditionally — used for `high`/`normal` enqueue and for
    /// re-inserting a popped member that couldn't fit the internal queue.
    async fn enqueue(
        &self,
        host_id: HostId,
        priority: Priority,
        member: &QueueMember,
        score: i64,
    ) -> Result<(), DaemonError>;

    /// Atomic "insert if absent, else lower the existing score only if the
    /// new one is earlier". Used only for `autorecache`.
    async fn conditional_enqueue(
        &self,
        host_id: HostId,
        member: &QueueMember,
        score: i64,
    ) -> Result<ConditionalEnqueueOutcome, DaemonError>;

    /// Atomically remove and return the member with the lowest score.
    async fn pop_earliest(
        &self,
        host_id: HostId,
        priority: Priority,
    ) -> Result<Option<(QueueMember, i64)>, DaemonError>;

    /// Total members currently queued.
    async fn count(&self, host_id: HostId, priority: Priority) -> Result<u64, DaemonError>;

    /// Members with score <= now.
    async fn count_due(
        &self,
        host_id: HostId,
        priority: Priority,
        now: i64,
    ) -> Result<u64, DaemonError>;

    async fn set_rs_record(&self, record: &RsRecord, ttl_secs: i64) -> Result<(), DaemonError>;

    async fn list_rs_records(&self) -> Result<Vec<RsRecord>, DaemonError>;

    async fn get_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<Option<CacheMetadata>, DaemonError>;

    /// Delete a single cache metadata key; returns whether a record
    /// existed. Does not enqueue a queue cleanup: a missing metadata
    /// record is the signal readers treat as "not cached". Invalidation never needs to touch queue state.
    async fn delete_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<bool, DaemonError>;

    /// Iterate up to `limit` cache metadata keys for a host, used by the
    /// Inspection API. Bounded: at most 200 scan iterations for listing,
    /// 50000 keys for a summary.
    async fn scan_cache_metadata(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> Result<Vec<CacheMetadata>, DaemonError>;

    /// Read-only enumeration of up to `limit` queued members in score
    /// order, for the Inspection API's queue listing route. Never pops —
    /// must not interfere with Scheduler operations.
    async fn list_queue_members(
        &self,
        host_id: HostId,
        priority: Priority,
        limit: usize,
    ) -> Result<Vec<(QueueMember, i64)>, DaemonError>;
}
