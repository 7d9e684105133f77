use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use cache_scheduler::capacity::{CapacityConfig, CapacityOracle};
use cache_scheduler::distributor::Distributor;
use cache_scheduler::eg_registry::StaticEgRegistry;
use cache_scheduler::inspection::StatusReporter;
use cache_scheduler::ingestion::IngestionService;
use cache_scheduler::internal_queue::InternalQueue;
use cache_scheduler::metrics::Counters;
use cache_scheduler::model::EgEndpoint;
use cache_scheduler::queue_store::{MemoryStore, QueueStore, RedisStore};
use cache_scheduler::retry::RetryManager;
use cache_scheduler::{SchedulerConfig, SchedulerHandle};
use daemon_http::HttpClient;

use cache_daemon::config::AppConfig;
use cache_daemon::http::{self, AppState};

/// Cluster-wide scheduler for background re-rendering of cached pages.
#[derive(Parser)]
#[command(name = "cache-daemon")]
#[command(about = "Cache Daemon: schedules recache work across Render Services")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the main HTTP server (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration (YAML) and exit.
    #[arg(long)]
    print_config: bool,

    /// Log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Waits for SIGTERM (or Ctrl-C on platforms without SIGTERM) and cancels
/// `cancel`, the root token that drives shutdown for the scheduler loop
/// and both HTTP listeners.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received ctrl-c");
        }
        cancel.cancel();
    });
}

#[allow(clippy::cast_possible_truncation)]
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn build_scheduler_config(app: &AppConfig) -> SchedulerConfig {
    let hosts = app.resolved_host_configs();
    let tick_interval = Duration::from_secs(app.scheduler.tick_interval_secs.max(1));
    let normal_interval = Duration::from_secs(app.scheduler.normal_check_interval_secs.max(1));
    #[allow(clippy::cast_possible_truncation)]
    let normal_check_every_n_ticks = (normal_interval.as_secs() / tick_interval.as_secs()).max(1);

    SchedulerConfig {
        tick_interval,
        normal_check_every_n_ticks,
        max_internal_queue: app.scheduler.max_internal_queue,
        dispatch_timeout: Duration::from_secs(app.scheduler.dispatch_timeout_secs),
        queue_store_timeout: Duration::from_secs(app.scheduler.queue_store_timeout_secs.max(1)),
        retry: cache_scheduler::retry::RetryConfig {
            max_retries: app.scheduler.max_retries,
            base_delay_secs: app.scheduler.base_retry_delay_secs,
        },
        capacity: CapacityConfig {
            registry_ttl_secs: app.scheduler.registry_ttl_secs,
            reservation_fraction: app.scheduler.reservation_fraction,
        },
        hosts,
        shared_secret: app.shared_secret.clone().unwrap_or_default(),
        pause_resume_enabled: app.pause_resume_enabled,
        strict_mode: app.strict_mode,
        stale_ttl_secs: app.scheduler.stale_ttl_secs,
    }
}

async fn build_queue_store(url: &str) -> Result<Arc<dyn QueueStore>> {
    if url.starts_with("memory:") {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = RedisStore::connect(url).await.context("connecting to redis queue store")?;
    Ok(Arc::new(store))
}

fn parse_eg_addresses(addresses: &[String]) -> Vec<EgEndpoint> {
    addresses
        .iter()
        .enumerate()
        .map(|(idx, address)| EgEndpoint {
            id: format!("eg-{idx}"),
            address: address.clone(),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    app_config.apply_cli_overrides(cli.port, None);

    if cli.print_config {
        println!("{}", app_config.to_yaml().context("rendering effective configuration")?);
        return Ok(());
    }

    init_tracing(cli.verbose);

    if let Err(detail) = app_config.validate() {
        tracing::error!(critical = true, detail, "fatal configuration error");
        anyhow::bail!("invalid configuration: {detail}");
    }
    if app_config.shared_secret.is_none() {
        if app_config.strict_mode {
            anyhow::bail!("shared_secret is required when strict_mode is enabled");
        }
        tracing::warn!("no shared_secret configured; all authenticated routes will reject every request");
    }

    let store = build_queue_store(&app_config.queue_store_url).await?;
    let scheduler_config = build_scheduler_config(&app_config);
    let internal_queue = Arc::new(InternalQueue::new(scheduler_config.max_internal_queue));
    let capacity_oracle = CapacityOracle::new(store.clone(), scheduler_config.capacity);
    let eg_registry = Arc::new(StaticEgRegistry::new(parse_eg_addresses(&app_config.eg_addresses)));
    let http_client = HttpClient::new().context("building outbound http client")?;
    let distributor = Distributor::new(
        http_client,
        eg_registry,
        internal_queue.clone(),
        scheduler_config.shared_secret.clone(),
        scheduler_config.dispatch_timeout,
    );
    let counters = Arc::new(Counters::default());
    let retry_manager = RetryManager::new(internal_queue.clone(), scheduler_config.retry, counters.clone());
    let scheduler = Arc::new(SchedulerHandle::new(
        store.clone(),
        internal_queue.clone(),
        capacity_oracle.clone(),
        distributor,
        retry_manager,
        scheduler_config.clone(),
        counters,
    ));

    let ingestion = Arc::new(IngestionService::new(store.clone(), scheduler_config.clone()));
    let status_reporter = Arc::new(StatusReporter::new(
        uuid::Uuid::new_v4().to_string(),
        unix_now(),
        store.clone(),
        internal_queue,
        capacity_oracle,
        scheduler_config.clone(),
    ));
    let metrics = Arc::new(cache_daemon::metrics::Metrics::new().context("constructing metrics registry")?);

    let hosts: HashMap<i64, cache_scheduler::model::HostConfig> = scheduler_config.hosts.clone();

    let state = AppState {
        scheduler: scheduler.clone(),
        store,
        ingestion,
        status_reporter,
        metrics,
        shared_secret: scheduler_config.shared_secret.clone(),
        pause_resume_enabled: scheduler_config.pause_resume_enabled,
        stale_ttl_secs: scheduler_config.stale_ttl_secs,
        hosts: Arc::new(hosts),
        queue_store_timeout: scheduler_config.queue_store_timeout,
    };

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let scheduler_loop = tokio::spawn(scheduler.run(cancel.clone()));

    let main_listener = TcpListener::bind(&app_config.server.bind_address)
        .await
        .with_context(|| format!("binding main listener on {}", app_config.server.bind_address))?;
    tracing::info!(addr = %app_config.server.bind_address, "main http server listening");
    let main_router = http::build_router(state.clone());
    let main_cancel = cancel.clone();
    let main_server = tokio::spawn(async move {
        axum::serve(main_listener, main_router)
            .with_graceful_shutdown(async move { main_cancel.cancelled().await })
            .await
    });

    let metrics_listener = TcpListener::bind(&app_config.server.metrics_bind_address)
        .await
        .with_context(|| format!("binding metrics listener on {}", app_config.server.metrics_bind_address))?;
    tracing::info!(addr = %app_config.server.metrics_bind_address, "metrics server listening");
    let metrics_router = http::build_metrics_router(state);
    let metrics_cancel = cancel.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_router)
            .with_graceful_shutdown(async move {
                metrics_cancel.cancelled().await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
            .await
    });

    let _ = scheduler_loop.await;
    if let Err(e) = main_server.await.context("main http server task panicked")? {
        tracing::error!(error = %e, "main http server exited with error");
    }
    if let Err(e) = metrics_server.await.context("metrics server task panicked")? {
        tracing::error!(error = %e, "metrics server exited with error");
    }

    Ok(())
}
