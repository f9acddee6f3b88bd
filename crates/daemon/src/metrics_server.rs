//! Health and metrics HTTP server
//!
//! `GET /health` answers 200 while the pipeline is live and 503 once it has
//! stopped or crashed. `GET /metrics` returns the counters as JSON.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

use crate::metrics::{MetricsSnapshot, SharedMetrics};

/// Errors that can occur when running the health server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub uptime_seconds: f64,
}

/// Handler for GET /health
async fn get_health(State(metrics): State<SharedMetrics>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status) = if metrics.is_live() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    let body = HealthResponse {
        status: status.to_string(),
        uptime_seconds: metrics.uptime().as_secs_f64(),
    };
    (code, Json(body))
}

/// Handler for GET /metrics
async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: metrics.snapshot(),
        uptime_seconds: metrics.uptime().as_secs_f64(),
    })
}

/// Creates the axum Router with health and metrics endpoints
pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

/// Runs the health server on 0.0.0.0:`port` until `shutdown` resolves
pub async fn run_metrics_server<F>(
    metrics: SharedMetrics,
    port: u16,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_metrics_router(metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
