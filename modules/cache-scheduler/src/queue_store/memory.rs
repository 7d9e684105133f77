//! In-memory `QueueStore` used by tests and by the Distributor/Scheduler
//! integration tests in `tests/`. Mirrors the Redis backend's semantics
//! exactly (including the conditional-enqueue tri-state) so tests written
//! against `MemoryStore` exercise real daemon logic, not a stub.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{cache_meta_key, queue_key, QueueStore};
use crate::error::DaemonError;
use crate::model::{
    CacheMetadata, ConditionalEnqueueOutcome, DimensionId, HostId, Priority, QueueMember, RsRecord,
};

/// A sorted set indexed both by score (for pop-earliest / due counting)
/// and by member (for the conditional-enqueue "is it already present"
/// check), matching what a Redis sorted set gives for free.
#[derive(Default)]
struct SortedSet {
    by_score: BTreeMap<(i64, String), ()>,
    score_of: HashMap<String, i64>,
}

impl SortedSet {
    fn upsert(&mut self, member: String, score: i64) {
        if let Some(&old) = self.score_of.get(&member) {
            self.by_score.remove(&(old, member.clone()));
        }
        self.by_score.insert((score, member.clone()), ());
        self.score_of.insert(member, score);
    }

    fn pop_earliest(&mut self) -> Option<(String, i64)> {
        let key = self.by_score.keys().next().cloned()?;
        self.by_score.remove(&key);
        self.score_of.remove(&key.1);
        Some((key.1, key.0))
    }

    fn len(&self) -> u64 {
        self.score_of.len() as u64
    }
}

#[derive(Default)]
pub struct MemoryStore {
    queues: Mutex<HashMap<String, SortedSet>>,
    rs_records: Mutex<HashMap<String, RsRecord>>,
    cache_metadata: Mutex<HashMap<String, CacheMetadata>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed a cache metadata record directly.
    pub fn put_cache_metadata(&self, host_id: HostId, dimension_id: DimensionId, url_hash: &str, meta: CacheMetadata) {
        self.cache_metadata
            .lock()
            .insert(cache_meta_key(host_id, dimension_id, url_hash), meta);
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(
        &self,
        host_id: HostId,
        priority: Priority,
        member: &QueueMember,
        score: i64,
    ) -> Result<(), DaemonError> {
        let key = queue_key(host_id, priority);
        self.queues
            .lock()
            .entry(key)
            .or_default()
            .upsert(member.serialize(), score);
        Ok(())
    }

    async fn conditional_enqueue(
        &self,
        host_id: HostId,
        member: &QueueMember,
        score: i64,
    ) -> Result<ConditionalEnqueueOutcome, DaemonError> {
        let key = queue_key(host_id, Priority::AutoRecache);
        let serialized = member.serialize();
        let mut queues = self.queues.lock();
        let set = queues.entry(key).or_default();
        match set.score_of.get(&serialized).copied() {
            None => {
                set.upsert(serialized, score);
                Ok(ConditionalEnqueueOutcome::Added)
            }
            Some(existing) if score < existing => {
                set.upsert(serialized, score);
                Ok(ConditionalEnqueueOutcome::Lowered)
            }
            Some(_) => Ok(ConditionalEnqueueOutcome::Unchanged),
        }
    }

    async fn pop_earliest(
        &self,
        host_id: HostId,
        priority: Priority,
    ) -> Result<Option<(QueueMember, i64)>, DaemonError> {
        let key = queue_key(host_id, priority);
        let mut queues = self.queues.lock();
        let Some(set) = queues.get_mut(&key) else {
            return Ok(None);
        };
        let Some((raw, score)) = set.pop_earliest() else {
            return Ok(None);
        };
        let member = QueueMember::deserialize(&raw)
            .map_err(|e| DaemonError::QueueStore(format!("corrupt member: {e}")))?;
        Ok(Some((member, score)))
    }

    async fn count(&self, host_id: HostId, priority: Priority) -> Result<u64, DaemonError> {
        let key = queue_key(host_id, priority);
        Ok(self.queues.lock().get(&key).map_or(0, SortedSet::len))
    }

    async fn count_due(
        &self,
        host_id: HostId,
        priority: Priority,
        now: i64,
    ) -> Result<u64, DaemonError> {
        let key = queue_key(host_id, priority);
        let queues = self.queues.lock();
        let Some(set) = queues.get(&key) else {
            return Ok(0);
        };
        Ok(set
            .by_score
            .keys()
            .take_while(|(score, _)| *score <= now)
            .count() as u64)
    }

    async fn set_rs_record(&self, record: &RsRecord, _ttl_secs: i64) -> Result<(), DaemonError> {
        self.rs_records
            .lock()
            .insert(record.service_id.clone(), record.clone());
        Ok(())
    }

    async fn list_rs_records(&self) -> Result<Vec<RsRecord>, DaemonError> {
        Ok(self.rs_records.lock().values().cloned().collect())
    }

    async fn get_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<Option<CacheMetadata>, DaemonError> {
        let key = cache_meta_key(host_id, dimension_id, url_hash);
        Ok(self.cache_metadata.lock().get(&key).cloned())
    }

    async fn delete_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<bool, DaemonError> {
        let key = cache_meta_key(host_id, dimension_id, url_hash);
        Ok(self.cache_metadata.lock().remove(&key).is_some())
    }

    async fn scan_cache_metadata(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> Result<Vec<CacheMetadata>, DaemonError> {
        Ok(self
            .cache_metadata
            .lock()
            .values()
            .filter(|m| m.host_id == host_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_queue_members(
        &self,
        host_id: HostId,
        priority: Priority,
        limit: usize,
    ) -> Result<Vec<(QueueMember, i64)>, DaemonError> {
        let key = queue_key(host_id, priority);
        let queues = self.queues.lock();
        let Some(set) = queues.get(&key) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(limit.min(set.by_score.len()));
        for ((score, raw), ()) in set.by_score.iter().take(limit) {
            let member = QueueMember::deserialize(raw)
                .map_err(|e| DaemonError::QueueStore(format!("corrupt member: {e}")))?;
            out.push((member, *score));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(i: i64) -> QueueMember {
        QueueMember::new(format!("https://example.com/{i}"), 1)
    }

    #[tokio::test]
    async fn pop_earliest_returns_lowest_score_first() {
        let store = MemoryStore::new();
        store.enqueue(1, Priority::High, &member(1), 30).await.unwrap();
        store.enqueue(1, Priority::High, &member(2), 10).await.unwrap();
        store.enqueue(1, Priority::High, &member(3), 20).await.unwrap();

        let (m, score) = store.pop_earliest(1, Priority::High).await.unwrap().unwrap();
        assert_eq!(m, member(2));
        assert_eq!(score, 10);
    }

    #[tokio::test]
    async fn duplicate_member_collapses_and_refreshes_score() {
        let store = MemoryStore::new();
        store.enqueue(1, Priority::High, &member(1), 30).await.unwrap();
        store.enqueue(1, Priority::High, &member(1), 10).await.unwrap();
        assert_eq!(store.count(1, Priority::High).await.unwrap(), 1);
        let (_, score) = store.pop_earliest(1, Priority::High).await.unwrap().unwrap();
        assert_eq!(score, 10);
    }

    #[tokio::test]
    async fn conditional_enqueue_tri_state() {
        let store = MemoryStore::new();
        let m = member(1);
        assert_eq!(
            store.conditional_enqueue(1, &m, 100).await.unwrap(),
            ConditionalEnqueueOutcome::Added
        );
        assert_eq!(
            store.conditional_enqueue(1, &m, 50).await.unwrap(),
            ConditionalEnqueueOutcome::Lowered
        );
        assert_eq!(
            store.conditional_enqueue(1, &m, 200).await.unwrap(),
            ConditionalEnqueueOutcome::Unchanged
        );
        let (_, score) = store.pop_earliest(1, Priority::AutoRecache).await.unwrap().unwrap();
        assert_eq!(score, 50);
    }

    #[tokio::test]
    async fn count_due_respects_now() {
        let store = MemoryStore::new();
        store.enqueue(1, Priority::AutoRecache, &member(1), 50).await.unwrap();
        store.enqueue(1, Priority::AutoRecache, &member(2), 150).await.unwrap();
        assert_eq!(store.count_due(1, Priority::AutoRecache, 100).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalidation_delete_returns_zero_or_one() {
        let store = MemoryStore::new();
        assert!(!store.delete_cache_metadata(1, 1, "abc").await.unwrap());
        store.put_cache_metadata(
            1,
            1,
            "abc",
            CacheMetadata {
                host_id: 1,
                dimension_id: 1,
                url: "https://example.com/x".to_owned(),
                size_bytes: 10,
                disk_size_bytes: 10,
                created_at: 0,
                expires_at: 100,
                status_code: 200,
                source: crate::model::CacheSource::Render,
                index_status: "indexed".to_owned(),
                last_bot_hit: None,
            },
        );
        assert!(store.delete_cache_metadata(1, 1, "abc").await.unwrap());
        assert!(!store.delete_cache_metadata(1, 1, "abc").await.unwrap());
    }
}
