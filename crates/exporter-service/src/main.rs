//! Node Services Metrics Exporter
//!
//! Subscribes to the STAI daemon's metrics broadcast and serves the node's
//! state as Prometheus metrics.
//!
//! # Servers
//!
//! - HTTP server for `/metrics`, `/healthz`, `/ready` (default: 0.0.0.0:9914)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing
//! 3. Initialize Prometheus recorder for exporter self-metrics
//! 4. Declare every node instrument (one handler per service)
//! 5. Build the daemon websocket connector (mutual TLS, required)
//! 6. Build the HTTP RPC client and geo lookup (optional)
//! 7. Start the HTTP server
//! 8. Run the connection lifecycle until a shutdown signal arrives

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use exporter_service::config::{Config, LogFormat};
use exporter_service::dispatch::EventDispatcher;
use exporter_service::geo::{GeoLookup, MaxMindGeo};
use exporter_service::instruments::InstrumentRegistry;
use exporter_service::lifecycle::ConnectionLifecycle;
use exporter_service::observability::metrics::init_metrics_recorder;
use exporter_service::observability::{exporter_router, ExportState, HealthState};
use exporter_service::rpc::daemon::{DaemonRequester, WebsocketConnector};
use exporter_service::rpc::http::HttpRpcClient;
use exporter_service::rpc::tls::{client_config, ServiceIdentity};
use exporter_service::rpc::{BulkFetcher, DaemonConnector, RpcRequester};
use exporter_service::services::{initialize_all, ServiceContext};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration first: it decides log level and format
    let config = Config::from_env()?;

    init_tracing(&config);

    info!("Starting metrics exporter");
    info!(config = ?config, "Configuration loaded successfully");

    // Must happen before any self-metric is recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let registry = Arc::new(InstrumentRegistry::new(config.network_prefix.as_str()));
    let health_state = Arc::new(HealthState::new());

    // Primary channel: failure to load the daemon client identity is fatal
    let daemon_tls = client_config(&ServiceIdentity::private(&config, "daemon")).map_err(|e| {
        error!(error = %e, "Failed to load daemon TLS material");
        e
    })?;
    let connector: Arc<dyn DaemonConnector> = Arc::new(WebsocketConnector::new(
        config.daemon_url(),
        &config.network_prefix,
        daemon_tls,
    ));

    let (requester, outbound) = DaemonRequester::channel(config.network_prefix.as_str());
    let mut ctx = ServiceContext::new(Arc::new(requester) as Arc<dyn RpcRequester>);

    // Secondary channel and geo lookup are optional
    match HttpRpcClient::new(&config) {
        Ok(client) => ctx = ctx.with_bulk(Arc::new(client) as Arc<dyn BulkFetcher>),
        Err(e) => warn!(
            error = %e,
            "HTTP RPC unavailable, crawler countries and harvester plot listings disabled"
        ),
    }
    match &config.maxmind_db_path {
        Some(path) => match MaxMindGeo::open(path) {
            Ok(geo) => ctx = ctx.with_geo(Arc::new(geo) as Arc<dyn GeoLookup>),
            Err(e) => error!(
                error = %e,
                path = %path.display(),
                "Failed to open geo database, country mapping disabled"
            ),
        },
        None => info!("No geo database configured, country mapping disabled"),
    }

    let handlers = initialize_all(&registry, &ctx).map_err(|e| {
        error!(error = %e, "Failed to declare instruments");
        e
    })?;
    let dispatcher = EventDispatcher::with_handlers(config.network_prefix.as_str(), handlers);

    let shutdown_token = CancellationToken::new();

    // Bind listener BEFORE spawning to fail fast on bind errors
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %metrics_addr, "Failed to bind metrics server");
            format!("Failed to bind metrics server to {metrics_addr}: {e}")
        })?;
    info!(addr = %metrics_addr, "Metrics server bound successfully");

    let app = exporter_router(ExportState {
        registry: Arc::clone(&registry),
        handle: prometheus_handle,
        health: Arc::clone(&health_state),
    });
    let server_token = shutdown_token.child_token();
    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("Metrics server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, initiating graceful shutdown...");
        signal_token.cancel();
    });

    let lifecycle = ConnectionLifecycle::new(
        connector,
        dispatcher,
        outbound,
        Arc::clone(&health_state),
        config.network_prefix.as_str(),
        config.reconnect_interval,
    );
    let result = lifecycle.run(shutdown_token.child_token()).await;

    // Stops the HTTP server on a fatal lifecycle error too
    shutdown_token.cancel();
    if let Err(e) = server_task.await {
        warn!(error = %e, "Metrics server task failed to join");
    }

    result?;
    info!("Metrics exporter shutdown complete");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
