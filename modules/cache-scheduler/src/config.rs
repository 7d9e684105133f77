//! Domain configuration consumed by the Scheduler, Ingestion, and
//! Inspection components. The app crate's own `AppConfig` (figment
//! layers, CLI, env) builds one of these at startup; this crate stays
//! free of any config-loading machinery so it is usable from tests
//! without a YAML file in sight.

use std::collections::HashMap;
use std::time::Duration;

use crate::capacity::CapacityConfig;
use crate::model::{HostConfig, HostId};
use crate::retry::RetryConfig;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// `NormalCheckInterval / TickInterval`, floored, minimum 1.
    pub normal_check_every_n_ticks: u64,
    pub max_internal_queue: usize,
    pub dispatch_timeout: Duration,
    /// Per-operation timeout applied to queue-store calls made from
    /// request handlers, independent of the handler's own cancellation
    /// (see `queue_store::with_independent_timeout`).
    pub queue_store_timeout: Duration,
    pub retry: RetryConfig,
    pub capacity: CapacityConfig,
    pub hosts: HashMap<HostId, HostConfig>,
    pub shared_secret: String,
    pub pause_resume_enabled: bool,
    /// Fatal vs warn on a missing shared secret at startup.
    pub strict_mode: bool,
    pub stale_ttl_secs: i64,
}

impl SchedulerConfig {
    #[must_use]
    pub fn sorted_host_ids(&self) -> Vec<HostId> {
        let mut ids: Vec<_> = self.hosts.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
