//! Plain atomic counters the process-level metrics exporter
//! (`apps/cache-daemon/src/metrics.rs`) reads at scrape time. Kept
//! dependency-free here: the domain crate has no ambient-stack
//! dependency on a metrics client, only the numbers a client would need.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Counters {
    dispatch_succeeded: AtomicU64,
    dispatch_failed: AtomicU64,
    retries_issued: AtomicU64,
    discards: AtomicU64,
    last_tick_duration_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountersSnapshot {
    pub dispatch_succeeded: u64,
    pub dispatch_failed: u64,
    pub retries_issued: u64,
    pub discards: u64,
    pub last_tick_duration_micros: u64,
}

impl Counters {
    pub fn record_dispatch(&self, succeeded: u64, failed: u64) {
        self.dispatch_succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.dispatch_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_duration(&self, micros: u64) {
        self.last_tick_duration_micros.store(micros, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            dispatch_succeeded: self.dispatch_succeeded.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            retries_issued: self.retries_issued.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            last_tick_duration_micros: self.last_tick_duration_micros.load(Ordering::Relaxed),
        }
    }
}
