//! Production `QueueStore` backed by Redis sorted sets, hashes, and a
//! single Lua script for the conditional-enqueue tri-state.
//!
//! The conditional-insert must be a single server-observable operation;
//! `redis::Script` (a single `EVAL` round trip) gives exactly that
//! without us hand-rolling a CAS loop.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{cache_meta_key, queue_key, rs_record_key, QueueStore, RS_REGISTRY_LIST_KEY};
use crate::error::DaemonError;
use crate::model::{
    CacheMetadata, CacheSource, ConditionalEnqueueOutcome, DimensionId, HostId, Priority,
    QueueMember, RsRecord,
};

/// `KEYS[1]` = queue key, `ARGV[1]` = member, `ARGV[2]` = new score.
/// Returns 0 = added, 1 = lowered, 2 = unchanged.
const CONDITIONAL_ENQUEUE_SCRIPT: &str = r"
local existing = redis.call('ZSCORE', KEYS[1], ARGV[1])
if existing == false then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
    return 0
end
local new_score = tonumber(ARGV[2])
local old_score = tonumber(existing)
if new_score < old_score then
    redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
    return 1
end
return 2
";

pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisStore {
    /// # Errors
    /// Returns an error if the Redis URL is malformed or the initial
    /// connection attempt fails.
    pub async fn connect(redis_url: &str) -> Result<Self, DaemonError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DaemonError::QueueStore(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| DaemonError::QueueStore(format!("redis connect failed: {e}")))?;
        Ok(Self {
            conn,
            script: Script::new(CONDITIONAL_ENQUEUE_SCRIPT),
        })
    }

    fn map_err(e: redis::RedisError) -> DaemonError {
        DaemonError::QueueStore(e.to_string())
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn enqueue(
        &self,
        host_id: HostId,
        priority: Priority,
        member: &QueueMember,
        score: i64,
    ) -> Result<(), DaemonError> {
        let key = queue_key(host_id, priority);
        let mut conn = self.conn.clone();
        let _: () = conn
            .zadd(key, member.serialize(), score)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn conditional_enqueue(
        &self,
        host_id: HostId,
        member: &QueueMember,
        score: i64,
    ) -> Result<ConditionalEnqueueOutcome, DaemonError> {
        let key = queue_key(host_id, Priority::AutoRecache);
        let mut conn = self.conn.clone();
        let outcome: i64 = self
            .script
            .key(key)
            .arg(member.serialize())
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(match outcome {
            0 => ConditionalEnqueueOutcome::Added,
            1 => ConditionalEnqueueOutcome::Lowered,
            _ => ConditionalEnqueueOutcome::Unchanged,
        })
    }

    async fn pop_earliest(
        &self,
        host_id: HostId,
        priority: Priority,
    ) -> Result<Option<(QueueMember, i64)>, DaemonError> {
        let key = queue_key(host_id, priority);
        let mut conn = self.conn.clone();
        let popped: Vec<(String, i64)> = conn.zpopmin(key, 1).await.map_err(Self::map_err)?;
        let Some((raw, score)) = popped.into_iter().next() else {
            return Ok(None);
        };
        let member = QueueMember::deserialize(&raw)
            .map_err(|e| DaemonError::QueueStore(format!("corrupt member: {e}")))?;
        Ok(Some((member, score)))
    }

    async fn count(&self, host_id: HostId, priority: Priority) -> Result<u64, DaemonError> {
        let key = queue_key(host_id, priority);
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(key).await.map_err(Self::map_err)?;
        Ok(count)
    }

    async fn count_due(
        &self,
        host_id: HostId,
        priority: Priority,
        now: i64,
    ) -> Result<u64, DaemonError> {
        let key = queue_key(host_id, priority);
        let mut conn = self.conn.clone();
        let count: u64 = conn
            .zcount(key, i64::MIN, now)
            .await
            .map_err(Self::map_err)?;
        Ok(count)
    }

    async fn set_rs_record(&self, record: &RsRecord, ttl_secs: i64) -> Result<(), DaemonError> {
        let key = rs_record_key(&record.service_id);
        let payload = serde_json::to_string(record)
            .map_err(|e| DaemonError::QueueStore(format!("encode rs record: {e}")))?;
        let mut conn = self.conn.clone();
        let ttl: u64 = ttl_secs.max(1).unsigned_abs();
        let _: () = conn.set_ex(&key, &payload, ttl).await.map_err(Self::map_err)?;
        let _: () = conn
            .hset(RS_REGISTRY_LIST_KEY, &record.service_id, &payload)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn list_rs_records(&self) -> Result<Vec<RsRecord>, DaemonError> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, String)> = conn
            .hgetall(RS_REGISTRY_LIST_KEY)
            .await
            .map_err(Self::map_err)?;
        let mut records = Vec::with_capacity(entries.len());
        for (service_id, payload) in entries {
            match serde_json::from_str::<RsRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(service_id, error = %e, "malformed RS registry entry, skipping");
                }
            }
        }
        Ok(records)
    }

    async fn get_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<Option<CacheMetadata>, DaemonError> {
        let key = cache_meta_key(host_id, dimension_id, url_hash);
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(&key).await.map_err(Self::map_err)?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_cache_metadata(host_id, dimension_id, &fields).map(Some)
    }

    async fn delete_cache_metadata(
        &self,
        host_id: HostId,
        dimension_id: DimensionId,
        url_hash: &str,
    ) -> Result<bool, DaemonError> {
        let key = cache_meta_key(host_id, dimension_id, url_hash);
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(&key).await.map_err(Self::map_err)?;
        Ok(deleted > 0)
    }

    async fn scan_cache_metadata(
        &self,
        host_id: HostId,
        limit: usize,
    ) -> Result<Vec<CacheMetadata>, DaemonError> {
        // Bounded SCAN, capped at 200 iterations for listing; each
        // iteration yields a batch of keys, never a single blocking KEYS call.
        let mut conn = self.conn.clone();
        let pattern = format!("meta:cache:{host_id}:*");
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        for _ in 0..200 {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_err)?;
            for key in keys {
                if out.len() >= limit {
                    return Ok(out);
                }
                let fields: std::collections::HashMap<String, String> =
                    conn.hgetall(&key).await.map_err(Self::map_err)?;
                if fields.is_empty() {
                    continue;
                }
                if let Some((dimension_id, url_hash)) = parse_meta_key_suffix(&key, host_id) {
                    match parse_cache_metadata(host_id, dimension_id, &fields) {
                        Ok(meta) => out.push(meta),
                        Err(e) => tracing::warn!(key = %key, error = %e, "malformed cache metadata, skipping"),
                    }
                    let _ = url_hash;
                }
            }
            cursor = next_cursor;
            if cursor == 0 || out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn list_queue_members(
        &self,
        host_id: HostId,
        priority: Priority,
        limit: usize,
    ) -> Result<Vec<(QueueMember, i64)>, DaemonError> {
        let key = queue_key(host_id, priority);
        let mut conn = self.conn.clone();
        let raw: Vec<(String, i64)> = conn
            .zrangebyscore_withscores(key, i64::MIN, i64::MAX)
            .await
            .map_err(Self::map_err)?;
        let mut out = Vec::with_capacity(raw.len().min(limit));
        for (member, score) in raw.into_iter().take(limit) {
            let member = QueueMember::deserialize(&member)
                .map_err(|e| DaemonError::QueueStore(format!("corrupt member: {e}")))?;
            out.push((member, score));
        }
        Ok(out)
    }
}

fn parse_meta_key_suffix(key: &str, host_id: HostId) -> Option<(DimensionId, String)> {
    let prefix = format!("meta:cache:{host_id}:");
    let rest = key.strip_prefix(&prefix)?;
    let mut parts = rest.splitn(2, ':');
    let dimension_id: DimensionId = parts.next()?.parse().ok()?;
    let url_hash = parts.next()?.to_owned();
    Some((dimension_id, url_hash))
}

fn parse_cache_metadata(
    host_id: HostId,
    dimension_id: DimensionId,
    fields: &std::collections::HashMap<String, String>,
) -> Result<CacheMetadata, DaemonError> {
    let get = |field: &str| -> Result<&String, DaemonError> {
        fields
            .get(field)
            .ok_or_else(|| DaemonError::QueueStore(format!("cache metadata missing field {field}")))
    };
    let parse_i64 = |field: &str| -> Result<i64, DaemonError> {
        get(field)?
            .parse()
            .map_err(|_| DaemonError::QueueStore(format!("cache metadata field {field} not an integer")))
    };
    Ok(CacheMetadata {
        host_id,
        dimension_id,
        url: get("url")?.clone(),
        size_bytes: parse_i64("size_bytes")?.max(0) as u64,
        disk_size_bytes: parse_i64("disk_size_bytes")?.max(0) as u64,
        created_at: parse_i64("created_at")?,
        expires_at: parse_i64("expires_at")?,
        status_code: parse_i64("status_code")?.clamp(0, u16::MAX as i64) as u16,
        source: if get("source")?.as_str() == "bypass" {
            CacheSource::Bypass
        } else {
            CacheSource::Render
        },
        index_status: get("index_status")?.clone(),
        last_bot_hit: fields.get("last_bot_hit").and_then(|v| v.parse().ok()),
    })
}
