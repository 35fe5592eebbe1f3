//! Shoal - an S3-compatible placement gateway.
//!
//! Fronts a pool of heterogeneous backend S3 buckets as a single logical
//! namespace: selects a backend per object key, records the placement,
//! monitors backend health and capacity, and hands out presigned URLs
//! against the chosen backend.
//!
//! # Usage
//!
//! ```text
//! shoal-server [config.yaml]
//! ```
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SHOAL_CONFIG` | `config.yaml` | Configuration file path (the first CLI argument wins) |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `server.log_level`) |
//!
//! The configuration file hot-reloads while the gateway is running.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use shoal_core::config::Config;
use shoal_core::health::Target;
use shoal_core::{
    Balancer, BucketRegistry, ConfigManager, GatewayMetrics, HealthMonitor, MetricsReporter,
    S3Checker,
};
use shoal_http::{ApiState, ControlPlaneService};
use shoal_presign::Presigner;
use shoal_store::PlacementStore;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the configured level.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// The configuration file path: first CLI argument, then `SHOAL_CONFIG`,
/// then `config.yaml`.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SHOAL_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_owned())
        .into()
}

/// Reconcile the monitor's target set with the registry: drop vanished
/// buckets, (re-)register the rest with fresh client handles.
fn sync_monitor_targets(monitor: &HealthMonitor, registry: &BucketRegistry) {
    let desired: HashSet<String> = registry.names().into_iter().collect();
    for id in monitor.target_ids() {
        if !desired.contains(&id) {
            monitor.unregister(&id);
        }
    }
    for bucket in registry.get_all() {
        monitor.register(Target {
            id: bucket.name().to_owned(),
            client: bucket.client(),
        });
    }
}

/// Accept connections until `shutdown` fires, then drain.
async fn serve(
    listener: TcpListener,
    service: ControlPlaneService,
    read_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let graceful = GracefulShutdown::new();
    let mut http = HttpConnBuilder::new(TokioExecutor::new());
    http.http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                debug!(%peer, "connection accepted");

                let io = TokioIo::new(stream);
                let connection = http.serve_connection_with_upgrades(io, service.clone());
                let connection = graceful.watch(connection.into_owned());
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(error = %e, "connection closed with error");
                    }
                });
            }
        }
    }

    info!("draining connections");
    graceful.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path();
    let manager = ConfigManager::new(&config_path)
        .with_context(|| format!("load configuration from {}", config_path.display()))?;
    let config = manager.get_config();

    init_tracing(&config.server.log_level)?;
    info!(path = %config_path.display(), buckets = config.buckets.len(), "configuration loaded");

    // The service container: registry, balancer, store, presigner,
    // metrics, health monitor.
    let registry = Arc::new(BucketRegistry::new());
    registry.apply_snapshot(&config.buckets);

    let balancer = Arc::new(Balancer::new(Arc::clone(&registry), &config.balancer)?);
    let store = Arc::new(
        PlacementStore::connect(&config.database.dsn)
            .await
            .with_context(|| format!("open placement store {}", config.database.dsn))?,
    );
    let presigner = Arc::new(Presigner::default());
    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(GatewayMetrics::new()));

    let reporter = Arc::new(MetricsReporter::new(
        Arc::downgrade(&registry),
        metrics.clone(),
    ));
    let checker = Arc::new(S3Checker::new(
        config.health.interval(),
        config.health.timeout(),
    ));
    let monitor = Arc::new(HealthMonitor::new(checker, reporter));
    sync_monitor_targets(&monitor, &registry);

    // Hot-reload wiring: each subscriber rebuilds its own state from the
    // published snapshot.
    {
        let registry = Arc::clone(&registry);
        let balancer = Arc::clone(&balancer);
        let monitor = Arc::clone(&monitor);
        manager.subscribe(move |config: Arc<Config>| {
            registry.apply_snapshot(&config.buckets);
            if let Err(e) = balancer.rebuild(&config.balancer) {
                error!(error = %e, "balancer rebuild failed, keeping previous strategy");
            }
            sync_monitor_targets(&monitor, &registry);
        });
    }
    manager.start();

    let shutdown = CancellationToken::new();
    Arc::clone(&monitor).start(shutdown.child_token()).await;

    let state = Arc::new(ApiState {
        registry,
        balancer: Arc::clone(&balancer),
        store,
        presigner,
        metrics,
        shutdown: shutdown.clone(),
    });
    let service = ControlPlaneService::new(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, strategy = balancer.strategy_name(), "gateway listening");

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("received shutdown signal");
            shutdown.cancel();
        });
    }

    serve(
        listener,
        service,
        Duration::from_secs(config.server.read_timeout),
        shutdown,
    )
    .await?;

    monitor.stop();
    manager.shutdown();
    info!("gateway stopped");
    Ok(())
}
