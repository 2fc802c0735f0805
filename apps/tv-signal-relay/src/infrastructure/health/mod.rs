//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, session status reporting, and Prometheus metrics.
//! Used by hosting platforms, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /` - Plain `RESPONSE 200` keepalive for hosting platforms
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness check (simple OK)
//! - `GET /readyz` - Readiness check (registry accepting changes)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SubscriptionRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Subscriber session counts.
    pub sessions: SessionsStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every supervised subscriber is streaming.
    Healthy,
    /// Some supervised subscribers are reconnecting.
    Degraded,
    /// No supervised subscriber is streaming, or the registry is shut down.
    Unhealthy,
}

/// Subscriber session counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionsStatus {
    /// Known subscribers.
    pub subscribers: usize,
    /// Subscribers with a running supervisor.
    pub supervised: usize,
    /// Sessions past their handshake.
    pub streaming: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<SubscriptionRegistry>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
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
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, "RESPONSE 200")
}

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
    if state.registry.is_shut_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let sessions = SessionsStatus {
        subscribers: state.registry.len(),
        supervised: state.registry.active_sessions(),
        streaming: state.registry.streaming_sessions(),
    };

    HealthResponse {
        status: determine_health_status(sessions, state.registry.is_shut_down()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        sessions,
    }
}

fn determine_health_status(sessions: SessionsStatus, shut_down: bool) -> HealthStatus {
    if shut_down {
        return HealthStatus::Unhealthy;
    }
    match (sessions.supervised, sessions.streaming) {
        (0, _) => HealthStatus::Healthy,
        (_, 0) => HealthStatus::Unhealthy,
        (supervised, streaming) if streaming >= supervised => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listener could not be bound.
    #[error("health server cannot listen on port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Socket error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::RecordingSink;
    use crate::infrastructure::config::TradingViewSettings;
    use crate::infrastructure::tradingview::{ReconnectConfig, SessionConfig};

    fn sessions(supervised: usize, streaming: usize) -> SessionsStatus {
        SessionsStatus {
            subscribers: supervised,
            supervised,
            streaming,
        }
    }

    fn state() -> Arc<HealthServerState> {
        let registry = SubscriptionRegistry::new(
            Arc::new(SessionConfig {
                auth_token: None,
                endpoint: TradingViewSettings::default(),
                handshake_timeout: Duration::from_secs(1),
                idle_timeout: Duration::from_secs(1),
                channel_capacity: 1,
            }),
            ReconnectConfig::default(),
            Arc::new(RecordingSink::new()),
        );
        Arc::new(HealthServerState::new("0.1.0".to_string(), Arc::new(registry)))
    }

    async fn request(state: Arc<HealthServerState>, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn determine_status_from_sessions() {
        assert_eq!(determine_health_status(sessions(0, 0), false), HealthStatus::Healthy);
        assert_eq!(determine_health_status(sessions(3, 3), false), HealthStatus::Healthy);
        assert_eq!(determine_health_status(sessions(3, 1), false), HealthStatus::Degraded);
        assert_eq!(determine_health_status(sessions(2, 0), false), HealthStatus::Unhealthy);
        assert_eq!(determine_health_status(sessions(0, 0), true), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_and_readiness_answer_plain_text() {
        assert_eq!(request(state(), "/").await, (StatusCode::OK, "RESPONSE 200".to_string()));
        assert_eq!(request(state(), "/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn shut_down_registry_is_unhealthy() {
        let state = state();
        state.registry.shutdown().await;

        let (status, body) = request(state, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let (status, body) = request(state(), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["sessions"]["streaming"], 0);
    }

    #[tokio::test]
    async fn readiness_follows_registry_shutdown() {
        let state = state();
        assert_eq!(request(state.clone(), "/readyz").await.0, StatusCode::OK);

        state.registry.shutdown().await;
        assert_eq!(
            request(state, "/readyz").await,
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY".to_string())
        );
    }
}
