//! Autorecache Scheduler (C8): lets an operator or the internal HTTP
//! surface register a due-time recache for a single URL/dimension pair,
//! deduplicated against whatever is already queued.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DaemonError;
use crate::model::{ConditionalEnqueueOutcome, HostId, QueueMember};
use crate::queue_store::{with_independent_timeout, QueueStore};
use crate::url_normalize::normalize_url;

pub struct AutorecacheScheduler {
    store: Arc<dyn QueueStore>,
    queue_store_timeout: Duration,
}

impl AutorecacheScheduler {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, queue_store_timeout: Duration) -> Self {
        Self { store, queue_store_timeout }
    }

    /// Normalize `url`, then conditionally enqueue it at `due_at` into the
    /// autorecache queue for `host_id`. Logs the tri-state outcome: a
    /// pending entry due earlier always wins.
    pub async fn schedule(
        &self,
        host_id: HostId,
        raw_url: &str,
        dimension_id: i64,
        due_at: i64,
    ) -> Result<ConditionalEnqueueOutcome, DaemonError> {
        let normalized = normalize_url(raw_url)?;
        let member = QueueMember::new(normalized, dimension_id);
        let member_url = member.url.clone();
        let store = self.store.clone();
        let outcome = with_independent_timeout(self.queue_store_timeout, async move {
            store.conditional_enqueue(host_id, &member, due_at).await
        })
        .await?;
        tracing::debug!(
            host_id,
            url = %member_url,
            dimension_id,
            due_at,
            outcome = ?outcome,
            "autorecache scheduled"
        );
        Ok(outcome)
    }
}
