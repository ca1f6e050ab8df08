//! HTTP exporter: Prometheus metrics and camera health.

use crate::config::MetricsSettings;
use crate::metrics::MetricsRegistry;
use crate::session::{CameraState, CameraStatus};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("server error: {0}")]
    Server(String),
}

/// Where the exporter listens.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl From<&MetricsSettings> for MetricsServerConfig {
    fn from(settings: &MetricsSettings) -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], settings.port).into(),
        }
    }
}

/// Body of the `/health` endpoint, built from the last camera listing
/// the registry observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// `"ok"` when at least one camera is bound and none is unplugged,
    /// `"degraded"` otherwise.
    pub status: &'static str,
    /// Cameras still attached.
    pub connected: usize,
    /// Cameras initialized or streaming.
    pub ready: usize,
    /// Per-camera state and clock offset.
    pub cameras: Vec<CameraStatus>,
}

impl HealthReport {
    /// Summarizes a camera listing.
    pub fn from_cameras(cameras: Vec<CameraStatus>) -> Self {
        let connected = cameras.iter().filter(|c| c.connected).count();
        let ready = cameras
            .iter()
            .filter(|c| c.connected && c.state >= CameraState::Initialized)
            .count();
        let healthy = connected > 0 && connected == cameras.len();
        Self {
            status: if healthy { "ok" } else { "degraded" },
            connected,
            ready,
            cameras,
        }
    }

    /// 200 when healthy, 503 otherwise.
    pub fn status_code(&self) -> StatusCode {
        if self.status == "ok" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// HTTP server exposing `/metrics` and `/health` over a shared registry.
pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: Arc<MetricsRegistry>,
}

impl MetricsServer {
    /// Creates a server; the caller keeps observing into `registry`.
    pub fn new(config: MetricsServerConfig, registry: Arc<MetricsRegistry>) -> Self {
        Self { config, registry }
    }

    /// Serves until the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = router(self.registry);
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

fn router(registry: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    match registry.encode() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Encoding metrics failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(registry): State<Arc<MetricsRegistry>>) -> Response {
    let report = HealthReport::from_cameras(registry.cameras());
    (report.status_code(), Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(serial: &str, state: CameraState, connected: bool) -> CameraStatus {
        CameraStatus {
            serial: serial.to_owned(),
            state,
            clock_offset: (state != CameraState::Found).then_some(0.25),
            connected,
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = MetricsServerConfig::from(&MetricsSettings { port: 9191 });
        assert_eq!(config.bind_addr.port(), 9191);
    }

    #[test]
    fn test_health_counts_ready_cameras() {
        let report = HealthReport::from_cameras(vec![
            status("A", CameraState::Streaming, true),
            status("B", CameraState::Initialized, true),
            status("C", CameraState::Found, true),
        ]);
        assert_eq!(report.status, "ok");
        assert_eq!(report.connected, 3);
        assert_eq!(report.ready, 2);
        assert_eq!(report.status_code(), StatusCode::OK);
    }

    #[test]
    fn test_health_degraded_without_cameras_or_when_unplugged() {
        let empty = HealthReport::from_cameras(Vec::new());
        assert_eq!(empty.status, "degraded");
        assert_eq!(empty.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let unplugged = HealthReport::from_cameras(vec![
            status("A", CameraState::Initialized, true),
            status("B", CameraState::Initialized, false),
        ]);
        assert_eq!(unplugged.status, "degraded");
        assert_eq!(unplugged.ready, 1);
    }

    #[tokio::test]
    async fn test_health_endpoint_reflects_observed_cameras() {
        let registry = Arc::new(MetricsRegistry::new().unwrap());
        let response = health_handler(State(Arc::clone(&registry))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        registry.observe_cameras(&[status("A", CameraState::Initialized, true)]);
        let response = health_handler(State(registry)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
