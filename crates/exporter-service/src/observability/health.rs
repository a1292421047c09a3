//! HTTP surface of the exporter.
//!
//! - `GET /metrics` - node instruments followed by exporter self-metrics
//! - `GET /healthz` - liveness probe, fixed `200 Ok` body
//! - `GET /ready` - readiness probe (is the daemon session up?)
//!
//! # Health State
//!
//! `ready` is true while a daemon session is open. The lifecycle controller
//! flips it on connect and clears it on disconnect and shutdown.

use crate::instruments::registry::EXPORT_CONTENT_TYPE;
use crate::instruments::InstrumentRegistry;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Readiness state shared between the lifecycle controller and `/ready`.
#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (not ready).
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the daemon session as up.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the daemon session as down (disconnect or shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Check if the daemon session is up.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// State behind the exporter router.
#[derive(Clone)]
pub struct ExportState {
    pub registry: Arc<InstrumentRegistry>,
    /// Renders the exporter's own metrics.
    pub handle: PrometheusHandle,
    pub health: Arc<HealthState>,
}

/// Create the exporter router.
///
/// `/metrics` reads the registry concurrently with the event path; it never
/// fails.
pub fn exporter_router(state: ExportState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(state): State<ExportState>) -> impl IntoResponse {
    let mut body = state.registry.export();
    body.push_str(&state.handle.render());
    ([(header::CONTENT_TYPE, EXPORT_CONTENT_TYPE)], body)
}

/// Liveness probe handler.
///
/// Answers as long as the process is serving HTTP.
async fn liveness_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Ok")
}

/// Readiness probe handler.
///
/// Returns 503 Service Unavailable while no daemon session is open.
async fn readiness_handler(State(state): State<ExportState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ServiceKind;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    fn state() -> ExportState {
        ExportState {
            registry: Arc::new(InstrumentRegistry::new("stai")),
            handle: PrometheusBuilder::new().build_recorder().handle(),
            health: Arc::new(HealthState::new()),
        }
    }

    async fn get_path(app: Router, path: &str) -> axum::response::Response {
        let request = Request::builder()
            .uri(path)
            .body(Body::empty())
            .expect("Failed to build request");
        app.oneshot(request).await.expect("Failed to send request")
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new();
        assert!(!state.is_ready(), "Should not be ready by default");

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_healthz_returns_fixed_body() {
        let response = get_path(exporter_router(state()), "/healthz").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Ok");
    }

    #[tokio::test]
    async fn test_ready_follows_health_state() {
        let state = state();
        let app = exporter_router(state.clone());

        let response = get_path(app.clone(), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health.set_ready();
        let response = get_path(app, "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_renders_registry() {
        let state = state();
        let mut synced = state
            .registry
            .gauge(ServiceKind::Wallet, "synced", "Wallet sync state")
            .unwrap();
        synced.set(1.0);

        let response = get_path(exporter_router(state), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            EXPORT_CONTENT_TYPE
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("stai_wallet_synced 1"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let response = get_path(exporter_router(state()), "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
