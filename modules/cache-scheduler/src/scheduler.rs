//! Scheduler Loop (C5): the periodic tick that promotes work from the
//! Recache Queues into the Internal Queue and drives the Distributor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::autorecache::AutorecacheScheduler;
use crate::capacity::CapacityOracle;
use crate::config::SchedulerConfig;
use crate::distributor::Distributor;
use crate::error::DaemonError;
use crate::internal_queue::InternalQueue;
use crate::metrics::Counters;
use crate::model::{ConditionalEnqueueOutcome, HostId, InternalEntry, Priority};
use crate::queue_store::QueueStore;
use crate::retry::RetryManager;

/// The long-lived set of handles a single Scheduler owns: the only
/// long-running task in the daemon.
pub struct SchedulerHandle {
    store: Arc<dyn QueueStore>,
    internal_queue: Arc<InternalQueue>,
    capacity_oracle: CapacityOracle,
    distributor: Distributor,
    retry_manager: RetryManager,
    autorecache: AutorecacheScheduler,
    config: SchedulerConfig,
    counters: Arc<Counters>,
    paused: AtomicBool,
    last_tick: RwLock<Option<i64>>,
    tick_count: AtomicU64,
}

impl SchedulerHandle {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        internal_queue: Arc<InternalQueue>,
        capacity_oracle: CapacityOracle,
        distributor: Distributor,
        retry_manager: RetryManager,
        config: SchedulerConfig,
        counters: Arc<Counters>,
    ) -> Self {
        let autorecache = AutorecacheScheduler::new(store.clone(), config.queue_store_timeout);
        Self {
            store,
            internal_queue,
            capacity_oracle,
            distributor,
            retry_manager,
            autorecache,
            config,
            counters,
            paused: AtomicBool::new(false),
            last_tick: RwLock::new(None),
            tick_count: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_tick(&self) -> Option<i64> {
        *self.last_tick.read()
    }

    #[must_use]
    pub fn internal_queue_len(&self) -> usize {
        self.internal_queue.len()
    }

    #[must_use]
    pub fn internal_queue_capacity(&self) -> usize {
        self.internal_queue.capacity()
    }

    pub async fn autorecache(
        &self,
        host_id: HostId,
        raw_url: &str,
        dimension_id: i64,
        due_at: i64,
    ) -> Result<ConditionalEnqueueOutcome, DaemonError> {
        self.autorecache.schedule(host_id, raw_url, dimension_id, due_at).await
    }

    /// Run the tick loop until `cancel` fires. The tick body itself
    /// (`tick`) is exposed separately so tests can drive single ticks
    /// deterministically without a live timer.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    let now = unix_now();
                    if let Err(e) = self.tick(now).await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// One tick body. Returns the number of entries
    /// promoted this tick, mostly useful for tests.
    pub async fn tick(&self, now: i64) -> Result<usize, DaemonError> {
        let started = std::time::Instant::now();
        *self.last_tick.write() = Some(now);
        let tick_index = self.tick_count.fetch_add(1, Ordering::SeqCst);

        if self.is_paused() {
            tracing::debug!("scheduler paused, skipping tick body");
            self.record_tick_duration(started);
            return Ok(0);
        }

        let available_capacity = self.capacity_oracle.available_capacity(now).await?;
        let free_slots = self
            .config
            .max_internal_queue
            .saturating_sub(self.internal_queue.len());
        #[allow(clippy::cast_sign_loss)]
        let promote_limit = free_slots.min(available_capacity.max(0) as usize);

        let mut promoted = 0usize;
        let hosts = self.config.sorted_host_ids();

        promoted += self.promote_pass(&hosts, Priority::High, promote_limit - promoted, now).await?;

        let run_slow_cadence = tick_index % self.config.normal_check_every_n_ticks == 0;
        if run_slow_cadence {
            promoted += self
                .promote_pass(&hosts, Priority::Normal, promote_limit.saturating_sub(promoted), now)
                .await?;
            promoted += self
                .promote_due_autorecache(&hosts, promote_limit.saturating_sub(promoted), now)
                .await?;
        }

        #[allow(clippy::cast_sign_loss)]
        let dispatch_batch = self.internal_queue.dequeue(available_capacity.max(0) as usize);
        if !dispatch_batch.is_empty() {
            let outcome = self.distributor.dispatch(dispatch_batch, now).await;
            self.counters.record_dispatch(outcome.succeeded.len() as u64, outcome.failed.len() as u64);
            tracing::info!(
                succeeded = outcome.succeeded.len(),
                failed = outcome.failed.len(),
                "dispatch pass complete"
            );
            self.retry_manager.handle_failures(outcome.failed, now);
        }

        tracing::info!(
            tick = tick_index,
            promoted,
            internal_queue_len = self.internal_queue.len(),
            internal_queue_capacity = self.config.max_internal_queue,
            available_capacity,
            "tick complete"
        );

        self.record_tick_duration(started);
        Ok(promoted)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn record_tick_duration(&self, started: std::time::Instant) {
        self.counters.record_tick_duration(started.elapsed().as_micros() as u64);
    }

    /// One pass over all configured hosts, popping at most one member per
    /// host from `priority`'s queue, bounded by `limit` total entries
    ///.
    async fn promote_pass(
        &self,
        hosts: &[HostId],
        priority: Priority,
        limit: usize,
        now: i64,
    ) -> Result<usize, DaemonError> {
        let mut promoted = 0usize;
        for &host_id in hosts {
            if promoted >= limit {
                break;
            }
            let Some((member, score)) = self.store.pop_earliest(host_id, priority).await? else {
                continue;
            };
            let entry = InternalEntry::fresh(host_id, member.clone(), now);
            if self.internal_queue.enqueue(entry) {
                promoted += 1;
            } else {
                tracing::info!(host_id, priority = %priority, url = %member.url, "internal queue full, re-added to queue store");
                self.store.enqueue(host_id, priority, &member, score).await?;
            }
        }
        Ok(promoted)
    }

    /// `autorecache` pass restricted to entries already due.
    async fn promote_due_autorecache(
        &self,
        hosts: &[HostId],
        limit: usize,
        now: i64,
    ) -> Result<usize, DaemonError> {
        let mut promoted = 0usize;
        for &host_id in hosts {
            if promoted >= limit {
                break;
            }
            let due = self.store.count_due(host_id, Priority::AutoRecache, now).await?;
            if due == 0 {
                continue;
            }
            let Some((member, score)) = self.store.pop_earliest(host_id, Priority::AutoRecache).await? else {
                continue;
            };
            if score > now {
                // Popped something not actually due (possible under
                // concurrent writers); put it back unchanged.
                self.store.enqueue(host_id, Priority::AutoRecache, &member, score).await?;
                continue;
            }
            let entry = InternalEntry::fresh(host_id, member.clone(), now);
            if self.internal_queue.enqueue(entry) {
                promoted += 1;
            } else {
                tracing::info!(host_id, url = %member.url, "internal queue full, re-added to queue store");
                self.store.enqueue(host_id, Priority::AutoRecache, &member, score).await?;
            }
        }
        Ok(promoted)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
