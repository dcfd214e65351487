//! Gateway service entry point.
//!
//! WebSocket-to-TCP session gateway for the game-server fleet.

use anyhow::Result;
use external_services::{ConsulClient, KvClient};
use gateway::{create_router, AppState, ClientRegistry, Config, DiscoveryService, FleetRegistry};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    init_tracing(&config)?;

    info!("Starting gateway");
    info!("Configuration:");
    info!("  ws listen:        {}:{}", config.gateway.host, config.gateway.ws_port);
    info!("  metrics port:     {}", config.gateway.metrics_port);
    info!("  max connections:  {}", config.gateway.max_connections);
    info!(
        "  socket timeouts:  read {}s / write {}s",
        config.gateway.read_timeout_s, config.gateway.write_timeout_s
    );
    info!("  consul:           {} ({})", config.consul.address, config.consul.service_name);
    info!(
        "  redis:            {} db={} pool={}",
        config.redis.address, config.redis.db, config.redis.pool_size
    );

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.gateway.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.gateway.metrics_port);

    // Shared KV client for the player affinity map
    let kv = KvClient::connect(
        &config.redis.address,
        &config.redis.password,
        config.redis.db,
    )
    .await?;
    info!("Connected to Redis at {}", config.redis.address);

    let clients = Arc::new(ClientRegistry::new());
    let fleet = Arc::new(FleetRegistry::new());

    // Discovery task keeps the fleet registry in sync with Consul
    let consul = ConsulClient::new(&config.consul.address);
    let discovery = DiscoveryService::new(
        consul,
        config.consul.service_name.clone(),
        Duration::from_secs(config.consul.query_interval_s),
        fleet.clone(),
        clients.clone(),
    );
    let (discovery_shutdown_tx, discovery_shutdown_rx) = mpsc::channel(1);
    let discovery_handle = tokio::spawn(discovery.run(discovery_shutdown_rx));

    let state = Arc::new(AppState {
        config: config.clone(),
        clients,
        fleet,
        affinity: Arc::new(kv),
    });

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.ws_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down discovery...");
    let _ = discovery_shutdown_tx.send(()).await;
    let _ = discovery_handle.await;

    info!("Gateway stopped");
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logger.level.clone()));

    match &config.logger.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
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
