//! Test server harness for HTTP tests
//!
//! Provides `TestExporterServer`, which serves the real exporter router on a
//! random local port.

use axum::Router;
use exporter_service::instruments::InstrumentRegistry;
use exporter_service::observability::{exporter_router, ExportState, HealthState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the exporter's HTTP server.
///
/// The self-metrics handle comes from a recorder that is built but never
/// installed, so tests do not touch the global recorder.
///
/// # Example
/// ```rust,ignore
/// let server = TestExporterServer::spawn().await?;
/// let response = reqwest::get(format!("{}/healthz", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestExporterServer {
    addr: SocketAddr,
    registry: Arc<InstrumentRegistry>,
    health: Arc<HealthState>,
    handle: JoinHandle<()>,
}

impl TestExporterServer {
    /// Spawn a server over a fresh `stai` registry.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(Arc::new(InstrumentRegistry::new("stai"))).await
    }

    /// Spawn a server over `registry`.
    pub async fn spawn_with(registry: Arc<InstrumentRegistry>) -> Result<Self, anyhow::Error> {
        let health = Arc::new(HealthState::new());
        let app: Router = exporter_router(ExportState {
            registry: Arc::clone(&registry),
            handle: PrometheusBuilder::new().build_recorder().handle(),
            health: Arc::clone(&health),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            registry,
            health,
            handle,
        })
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Registry rendered by `/metrics`.
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Readiness state behind `/ready`.
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }
}

impl Drop for TestExporterServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
