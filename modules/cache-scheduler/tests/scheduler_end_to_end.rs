//! End-to-end scenarios that exercise the scheduler tick loop, the
//! distributor, the retry manager, and the queue store together, the way
//! a single tick actually runs in production rather than unit-by-unit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cache_scheduler::capacity::{CapacityConfig, CapacityOracle};
use cache_scheduler::config::SchedulerConfig;
use cache_scheduler::distributor::Distributor;
use cache_scheduler::eg_registry::StaticEgRegistry;
use cache_scheduler::internal_queue::InternalQueue;
use cache_scheduler::metrics::Counters;
use cache_scheduler::model::{Dimension, HostConfig, Priority, QueueMember, RsRecord};
use cache_scheduler::queue_store::{MemoryStore, QueueStore};
use cache_scheduler::retry::{RetryConfig, RetryManager};
use cache_scheduler::SchedulerHandle;
use daemon_http::HttpClient;

fn host(id: i64) -> HostConfig {
    HostConfig {
        id,
        domain: format!("host-{id}.example.com"),
        dimensions: HashMap::from([(
            1,
            Dimension {
                id: 1,
                name: "desktop".to_owned(),
                viewport_width: 1920,
                viewport_height: 1080,
                user_agent: "ua".to_owned(),
            },
        )]),
    }
}

/// No EG registered: the Distributor can never deliver anything, so any
/// scenario here that needs a successful dispatch is out of scope for a
/// toolchain-free test. What we can exercise without a live HTTP sink is
/// promotion, capacity gating, retry backoff, and the internal queue's
/// full/no-capacity paths — all of it purely through `tick`.
fn build(max_internal_queue: usize, hosts: Vec<HostConfig>, reservation_fraction: f64) -> (Arc<SchedulerHandle>, Arc<dyn QueueStore>) {
    let store: Arc<dyn QueueStore> = Arc::new(MemoryStore::new());
    let internal_queue = Arc::new(InternalQueue::new(max_internal_queue));
    let capacity = CapacityConfig {
        registry_ttl_secs: 120,
        reservation_fraction,
    };
    let capacity_oracle = CapacityOracle::new(store.clone(), capacity);
    let distributor = Distributor::new(
        HttpClient::new().expect("http client builds"),
        Arc::new(StaticEgRegistry::new(vec![])),
        internal_queue.clone(),
        "secret".to_owned(),
        Duration::from_secs(1),
    );
    let counters = Arc::new(Counters::default());
    let retry = RetryConfig {
        max_retries: 3,
        base_delay_secs: 5,
    };
    let retry_manager = RetryManager::new(internal_queue.clone(), retry, counters.clone());
    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(1),
        normal_check_every_n_ticks: 1,
        max_internal_queue,
        dispatch_timeout: Duration::from_secs(1),
        queue_store_timeout: Duration::from_secs(3),
        retry,
        capacity,
        hosts: hosts.into_iter().map(|h| (h.id, h)).collect(),
        shared_secret: "secret".to_owned(),
        pause_resume_enabled: true,
        strict_mode: false,
        stale_ttl_secs: 60,
    };
    let scheduler = Arc::new(SchedulerHandle::new(
        store.clone(),
        internal_queue,
        capacity_oracle,
        distributor,
        retry_manager,
        config,
        counters,
    ));
    (scheduler, store)
}

#[tokio::test]
async fn promotion_is_gated_by_available_capacity() {
    let (scheduler, store) = build(100, vec![host(1)], 0.0);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 2,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();
    for i in 1..=5 {
        store
            .enqueue(1, Priority::High, &QueueMember::new(format!("https://host-1.example.com/{i}"), 1), i)
            .await
            .unwrap();
    }

    let promoted = scheduler.tick(100).await.unwrap();
    // Only 2 free tabs available, so only 2 of the 5 queued entries promote
    // this tick; the rest stay behind in the durable queue.
    assert_eq!(promoted, 2);
    assert_eq!(store.count(1, Priority::High).await.unwrap(), 3);
    assert_eq!(scheduler.internal_queue_len(), 2);
}

#[tokio::test]
async fn reservation_fraction_shrinks_available_capacity() {
    let (scheduler, store) = build(100, vec![host(1)], 0.5);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 10,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();
    for i in 1..=6 {
        store
            .enqueue(1, Priority::High, &QueueMember::new(format!("https://host-1.example.com/{i}"), 1), i)
            .await
            .unwrap();
    }

    // free_tabs = 10, reserved = floor(10*0.5) = 5, available = 5.
    let promoted = scheduler.tick(100).await.unwrap();
    assert_eq!(promoted, 5);
}

#[tokio::test]
async fn one_per_host_round_robin_promotes_evenly_across_hosts() {
    let (scheduler, store) = build(100, vec![host(1), host(2), host(3)], 0.0);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 3,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();
    for host_id in [1, 2, 3] {
        for i in 1..=2 {
            store
                .enqueue(host_id, Priority::High, &QueueMember::new(format!("https://host-{host_id}.example.com/{i}"), 1), i)
                .await
                .unwrap();
        }
    }

    let promoted = scheduler.tick(100).await.unwrap();
    assert_eq!(promoted, 3);
    // Each host contributed exactly one entry this pass, leaving one behind.
    for host_id in [1, 2, 3] {
        assert_eq!(store.count(host_id, Priority::High).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn full_internal_queue_leaves_queue_store_untouched_beyond_capacity() {
    let (scheduler, store) = build(1, vec![host(1)], 0.0);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 10,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();
    for i in 1..=3 {
        store
            .enqueue(1, Priority::High, &QueueMember::new(format!("https://host-1.example.com/{i}"), 1), i)
            .await
            .unwrap();
    }

    let promoted = scheduler.tick(100).await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(scheduler.internal_queue_len(), 1);
    assert_eq!(store.count(1, Priority::High).await.unwrap(), 2);
}

#[tokio::test]
async fn autorecache_promotes_only_once_due() {
    let (scheduler, store) = build(100, vec![host(1)], 0.0);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 10,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();

    let outcome = scheduler.autorecache(1, "https://host-1.example.com/later", 1, 1_000).await.unwrap();
    assert_eq!(outcome, cache_scheduler::model::ConditionalEnqueueOutcome::Added);

    // Not due yet at now=100: the normal-cadence pass must not promote it.
    let promoted = scheduler.tick(100).await.unwrap();
    assert_eq!(promoted, 0);
    assert_eq!(store.count(1, Priority::AutoRecache).await.unwrap(), 1);

    // Due at now=1_000: this tick promotes it.
    let promoted = scheduler.tick(1_000).await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(store.count(1, Priority::AutoRecache).await.unwrap(), 0);
}

#[tokio::test]
async fn normal_priority_only_promotes_on_slow_cadence_ticks() {
    let (scheduler, store) = build(100, vec![host(1)], 0.0);
    store
        .set_rs_record(
            &RsRecord {
                service_id: "rs-1".to_owned(),
                address: "10.0.0.1".to_owned(),
                port: 9000,
                capacity: 10,
                load: 0,
                last_seen: 100,
            },
            120,
        )
        .await
        .unwrap();
    store
        .enqueue(1, Priority::Normal, &QueueMember::new("https://host-1.example.com/normal", 1), 100)
        .await
        .unwrap();

    // normal_check_every_n_ticks = 1 in this harness, so every tick runs
    // the slow cadence; confirm the entry promotes on the very first tick.
    let promoted = scheduler.tick(100).await.unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(store.count(1, Priority::Normal).await.unwrap(), 0);
}

#[tokio::test]
async fn paused_scheduler_does_not_drain_queues() {
    let (scheduler, store) = build(100, vec![host(1)], 0.0);
    store
        .enqueue(1, Priority::High, &QueueMember::new("https://host-1.example.com/a", 1), 1)
        .await
        .unwrap();
    scheduler.pause();
    scheduler.tick(100).await.unwrap();
    assert_eq!(store.count(1, Priority::High).await.unwrap(), 1);
    assert!(scheduler.is_paused());
    scheduler.resume();
    assert!(!scheduler.is_paused());
}
