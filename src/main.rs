//! ipset controller binary
//!
//! Wires the set store, shard pool, expiry scheduler and action intake
//! together, and serves health/metrics over HTTP.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use ipset_controller::action::Dispatcher;
use ipset_controller::config::{ControllerConfig, StoreBackend};
use ipset_controller::controller::Controller;
use ipset_controller::expiry::ExpiryScheduler;
use ipset_controller::health::{self, AppState};
use ipset_controller::metrics::ControllerMetrics;
use ipset_controller::nats::NatsConsumer;
use ipset_controller::shard::ShardPool;
use ipset_controller::store::{IpsetStore, MemorySetStore, SetStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = ControllerConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ipset_controller={}", config.log_level).parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_shards = config.max_shards,
        backend = ?config.store_backend,
        "Starting ipset controller"
    );

    // Initialize metrics
    let metrics = ControllerMetrics::install()?;
    info!("Prometheus metrics initialized");

    let store: Arc<dyn SetStore> = match config.store_backend {
        StoreBackend::Ipset => Arc::new(
            IpsetStore::new(config.ipset_bin.clone(), config.sudo_bin.clone(), metrics.clone())
                .with_max_elements(config.shard_max_elements)
                .with_umbrella_size(config.max_shards),
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory set store - no kernel sets are touched");
            Arc::new(MemorySetStore::new())
        }
    };

    // Provision the shard pool; the controller cannot work without it
    let pool = ShardPool::new(
        &config.set_prefix,
        config.umbrella_set.clone(),
        config.max_shards,
        store,
        metrics.clone(),
    )?;
    if let Err(e) = pool.ensure_shards().await {
        metrics.record_error(e.error_type_label());
        error!(error = %e, "Failed to provision shard pool");
        return Err(e.into());
    }

    let (scheduler, expiry) = ExpiryScheduler::new(metrics.clone());
    let controller = Arc::new(Controller::new(pool, expiry, metrics.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(Arc::clone(&controller)));

    let dispatcher = Dispatcher::new(
        Arc::clone(&controller),
        config.dispatch_concurrency,
        metrics.clone(),
    );

    // Connect to NATS if configured; a configured but unreachable queue is fatal
    let nats = if let Some(ref url) = config.nats_url {
        match NatsConsumer::connect(
            url,
            &config.nats_stream,
            &config.nats_subject,
            &config.nats_consumer,
            metrics.clone(),
        )
        .await
        {
            Ok(consumer) => {
                info!(url, "Connected to NATS");
                Some(consumer)
            }
            Err(e) => {
                metrics.record_error(e.error_type_label());
                metrics.set_nats_connected(false);
                error!(error = %e, "Failed to connect to NATS");
                return Err(e.into());
            }
        }
    } else {
        info!("No NATS_URL configured - running in local mode");
        None
    };

    // Start health server
    let app_state = AppState {
        controller: Arc::clone(&controller),
        nats: nats.clone(),
        metrics: metrics.clone(),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health_router,
    );

    let intake = async {
        match nats {
            Some(ref consumer) => consumer.run(dispatcher).await,
            None => std::future::pending().await,
        }
    };

    // Run everything concurrently
    tokio::select! {
        result = intake => {
            if let Err(e) = result {
                metrics.record_error(e.error_type_label());
                error!(error = %e, "Action intake stopped");
            }
        }
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Graceful shutdown
    info!("Shutting down controller...");

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    scheduler_task.abort();

    if config.teardown_on_exit {
        controller.pool().teardown().await;
    }

    info!("Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
