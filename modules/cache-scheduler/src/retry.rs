//! Retry Manager (C7): decides whether a failed dispatch gets another
//! attempt, with exponential backoff, or is discarded.

use std::sync::Arc;

use crate::internal_queue::InternalQueue;
use crate::metrics::Counters;
use crate::model::InternalEntry;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: i64,
}

pub struct RetryManager {
    internal_queue: Arc<InternalQueue>,
    config: RetryConfig,
    counters: Arc<Counters>,
}

impl RetryManager {
    #[must_use]
    pub fn new(internal_queue: Arc<InternalQueue>, config: RetryConfig, counters: Arc<Counters>) -> Self {
        Self {
            internal_queue,
            config,
            counters,
        }
    }

    /// Process one failed dispatch. Discards the entry once `retry_count`
    /// reaches `max_retries` (logged at WARN); otherwise bumps the retry
    /// count, stamps `last_attempt_at`, computes the next backoff window
    /// as `base_delay * 2^(retry_count - 1)`, and re-enqueues into C3. A
    /// full C3 at re-enqueue time loses the entry, logged CRITICAL
    ///.
    pub fn handle_failure(&self, mut entry: InternalEntry, now: i64) {
        entry.retry_count += 1;
        entry.last_attempt_at = Some(now);

        if entry.retry_count >= self.config.max_retries {
            self.counters.record_discard();
            tracing::warn!(
                url = %entry.url,
                host_id = entry.host_id,
                retry_count = entry.retry_count,
                "max retries reached, discarding entry"
            );
            return;
        }

        self.counters.record_retry();
        let backoff = self.config.base_delay_secs.saturating_mul(1_i64 << (entry.retry_count - 1));
        entry.next_retry_after = now.saturating_add(backoff);

        if !self.internal_queue.enqueue(entry.clone()) {
            tracing::error!(
                critical = true,
                url = %entry.url,
                host_id = entry.host_id,
                "internal queue full on retry re-enqueue — entry lost"
            );
        }
    }

    pub fn handle_failures(&self, entries: Vec<InternalEntry>, now: i64) {
        for entry in entries {
            self.handle_failure(entry, now);
        }
    }
}
