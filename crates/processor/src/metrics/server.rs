//! HTTP server for the Prometheus endpoint
//!
//! Serves `/metrics`, `/health` and `/ready` until the cancellation token
//! fires.

use super::registry::MetricsRegistry;
use super::MetricsError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl MetricsServerConfig {
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, MetricsError> {
        self.address().parse().map_err(|e| MetricsError::BindError {
            address: self.address(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })
    }
}

impl From<&metricflow_config::MetricsConfig> for MetricsServerConfig {
    fn from(config: &metricflow_config::MetricsConfig) -> Self {
        Self::new(config.bind_address.clone(), config.port)
    }
}

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthStatus {
    pub fn healthy_with_uptime(uptime: Duration) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Readiness status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone)]
struct ServerState {
    registry: Arc<MetricsRegistry>,
    ready: Arc<AtomicBool>,
    start_time: Instant,
}

/// HTTP server exposing the registry
pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: Arc<MetricsRegistry>,
    ready: Arc<AtomicBool>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig) -> Self {
        Self::with_registry(config, MetricsRegistry::global())
    }

    pub fn with_registry(config: MetricsServerConfig, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            registry,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag flipped by the pipelines once their consumers are subscribed
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn config(&self) -> &MetricsServerConfig {
        &self.config
    }

    fn router(&self) -> Router {
        let state = ServerState {
            registry: self.registry.clone(),
            ready: self.ready.clone(),
            start_time: Instant::now(),
        };
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), MetricsError> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MetricsError::BindError {
                address: self.config.address(),
                source: e,
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), MetricsError> {
        if let Ok(local) = listener.local_addr() {
            info!("Metrics server listening on http://{}", local);
        }
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| MetricsError::ServerStartError(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<ServerState>) -> Response {
    debug!("Metrics endpoint called");
    match state.registry.encode() {
        Ok(metrics) => (
            StatusCode::OK,
            [(
                "content-type",
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy_with_uptime(state.start_time.elapsed()))
}

async fn ready_handler(State(state): State<ServerState>) -> Response {
    if state.ready.load(Ordering::Acquire) {
        (
            StatusCode::OK,
            Json(ReadinessStatus {
                ready: true,
                message: None,
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessStatus {
                ready: false,
                message: Some("pipelines starting".to_string()),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_socket_addr() {
        let config = MetricsServerConfig::new("127.0.0.1", 8080);
        assert_eq!(config.socket_addr().unwrap().port(), 8080);
        assert!(MetricsServerConfig::new("not an address", 1).socket_addr().is_err());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = Arc::new(MetricsRegistry::new());
        let counter = prometheus_client::metrics::counter::Counter::<u64>::default();
        registry
            .registry()
            .write()
            .register("metric_input", "input", counter.clone());
        counter.inc_by(4);

        let server = MetricsServer::with_registry(MetricsServerConfig::default(), registry);
        let response = server
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("metric_input_total 4"));
    }

    #[tokio::test]
    async fn test_ready_follows_flag() {
        let server = MetricsServer::with_registry(
            MetricsServerConfig::default(),
            Arc::new(MetricsRegistry::new()),
        );
        let request = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let response = server.router().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        server.readiness().store(true, Ordering::Release);
        let response = server.router().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = MetricsServer::with_registry(
            MetricsServerConfig::default(),
            Arc::new(MetricsRegistry::new()),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));
        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
