//! Auction service entry point.

use anyhow::Result;
use auction_service::{create_router, AppState, AuctionScheduler, Config, Hub, MessageRouter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use store::Store;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());

    if config.features.enable_logging {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
            )
            .init();
    }

    info!("Starting auction service");
    info!("Configuration:");
    info!("  SERVER_PORT: {}", config.server.port);
    info!("  SERVER_ENV: {}", config.server.env);
    info!("  METRICS_PORT: {}", config.server.metrics_port);
    info!(
        "  DB: {}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.name
    );
    info!("  SWEEP_INTERVAL: {:?}", config.server.sweep_interval);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.server.metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!(
        "Prometheus metrics server started on port {}",
        config.server.metrics_port
    );

    // Connect to Postgres
    let store = Arc::new(Store::connect(&config.database).await?);

    // Shutdown signal observed by the sweeper, timers, and connection pumps
    let shutdown = CancellationToken::new();

    let hub = Arc::new(Hub::new());

    // Spawn the auction scheduler
    let scheduler = Arc::new(AuctionScheduler::new(
        store.clone(),
        hub.clone(),
        config.server.sweep_interval,
        shutdown.clone(),
    ));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let router = Arc::new(MessageRouter::new(hub.clone(), store.clone()));

    let state = Arc::new(AppState {
        hub: hub.clone(),
        store: store.clone(),
        router,
        config: config.clone(),
        shutdown: shutdown.clone(),
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Auction service listening on {}", addr);

    // Run server with graceful shutdown
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    // Stop the sweeper and timers, then tear down connections and the pool
    info!("Shutting down...");
    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    hub.shutdown();
    store.close().await;

    info!("Auction service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
