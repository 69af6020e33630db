//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (ready while connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{GeneratorState, PriceGenerator, StreamingClient};
use crate::domain::connection::ConnectionState;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Feed connection status.
    pub connection: ConnectionInfo,
    /// Subscriber statistics.
    pub subscribers: SubscriberInfo,
    /// Generator status.
    pub generator: GeneratorInfo,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected.
    Healthy,
    /// Connecting or recovering.
    Degraded,
    /// Disconnected or failed.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection state name.
    pub state: String,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// Automatic reconnection attempts so far.
    pub reconnect_attempts: u64,
}

/// Subscriber statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Active subscribers.
    pub active: usize,
    /// Updates delivered.
    pub delivered: u64,
    /// Updates dropped for lagging subscribers.
    pub dropped: u64,
}

/// Generator status.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorInfo {
    /// Whether a generator is running.
    pub generating: bool,
    /// Ticks completed.
    pub ticks: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: Arc<StreamingClient>,
    generator: Option<Arc<PriceGenerator>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        client: Arc<StreamingClient>,
        generator: Option<Arc<PriceGenerator>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            client,
            generator,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.client.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let connection_state = state.client.current_state();
    let broadcast = state.client.broadcast_stats();
    let generator = state
        .generator
        .as_ref()
        .map_or(GeneratorInfo { generating: false, ticks: 0 }, |g| GeneratorInfo {
            generating: g.state() == GeneratorState::Generating,
            ticks: g.ticks(),
        });

    HealthResponse {
        status: determine_health_status(&connection_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection: ConnectionInfo {
            state: connection_state.as_str().to_string(),
            connected: connection_state.is_connected(),
            last_error: state.client.last_error().map(|e| e.to_string()),
            reconnect_attempts: state.client.reconnect_attempts(),
        },
        subscribers: SubscriberInfo {
            active: broadcast.subscribers,
            delivered: broadcast.delivered,
            dropped: broadcast.dropped,
        },
        generator,
    }
}

const fn determine_health_status(state: &ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Disconnected | ConnectionState::Failed(_) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::TransportFactory;
    use crate::application::services::test_support::{FakeTransportFactory, OpenBehavior};
    use crate::application::services::{ConnectionConfig, StreamingConfig};
    use crate::domain::connection::ErrorKind;
    use crate::infrastructure::websocket::ManualReachability;

    fn state(behavior: OpenBehavior) -> Arc<HealthServerState> {
        let config = StreamingConfig {
            connection: ConnectionConfig {
                url: "ws://127.0.0.1:9/feed".to_string(),
                reconnect_delay: Duration::from_secs(60),
                ..ConnectionConfig::default()
            },
            ..StreamingConfig::default()
        };
        let factory: Arc<dyn TransportFactory> = Arc::new(FakeTransportFactory::new(behavior));
        let client = StreamingClient::new(config, factory, Arc::new(ManualReachability::new(true)));
        Arc::new(HealthServerState::new("0.1.0".to_string(), client, None))
    }

    async fn get(state: &Arc<HealthServerState>, path: &str) -> (StatusCode, String) {
        let response = router(Arc::clone(state))
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(
            determine_health_status(&ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&ConnectionState::Failed(ErrorKind::Timeout)),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let state = state(OpenBehavior::Succeed);
        assert_eq!(get(&state, "/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn readiness_tracks_connection() {
        let state = state(OpenBehavior::Succeed);
        assert_eq!(get(&state, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);

        state.client.connect().await.unwrap();
        assert_eq!(get(&state, "/readyz").await.0, StatusCode::OK);

        state.client.disconnect().await;
        assert_eq!(get(&state, "/readyz").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_last_error() {
        let state = state(OpenBehavior::Fail("refused".to_string()));
        assert!(state.client.connect().await.is_err());

        let (status, body) = get(&state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["connection"]["state"], "failed");
        assert_eq!(json["connection"]["last_error"], "connection failed: refused");
        assert_eq!(json["generator"]["generating"], false);

        state.client.disconnect().await;
    }
}
