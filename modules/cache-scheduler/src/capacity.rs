//! RS Capacity Oracle (C4): queries the RS registry, returns free capacity
//! after reserving a configurable fraction for online traffic.

use std::sync::Arc;

use crate::queue_store::QueueStore;

#[derive(Debug, Clone, Copy)]
pub struct CapacityConfig {
    pub registry_ttl_secs: i64,
    /// Fraction of free tabs reserved for online (non-recache) traffic,
    /// in `[0, 1)`.
    pub reservation_fraction: f64,
}

#[derive(Clone)]
pub struct CapacityOracle {
    store: Arc<dyn QueueStore>,
    config: CapacityConfig,
}

impl CapacityOracle {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, config: CapacityConfig) -> Self {
        Self { store, config }
    }

    /// `available_for_recache = max(0, total_free_tabs - floor(total_free_tabs * reservation_pct))`
    /// over healthy RS instances only. Zero if none are healthy.
    pub async fn available_capacity(&self, now: i64) -> Result<i64, crate::error::DaemonError> {
        let records = self.store.list_rs_records().await?;
        let total_free_tabs: i64 = records
            .iter()
            .filter(|r| r.is_healthy(now, self.config.registry_ttl_secs))
            .map(super::model::RsRecord::free_tabs)
            .sum();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let reserved = (total_free_tabs as f64 * self.config.reservation_fraction).floor() as i64;
        Ok((total_free_tabs - reserved).max(0))
    }
}
