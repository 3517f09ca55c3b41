//! HTTP exposition for the metric registry

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{error, info};

use crate::metrics::KernelMetrics;

async fn metrics_handler(State(metrics): State<Arc<KernelMetrics>>) -> impl IntoResponse {
    metrics.gather_text()
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// Router exposing `/metrics` and `/health`
pub fn router(metrics: Arc<KernelMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

/// Bind and serve the exposition endpoint until the process exits
pub async fn serve(metrics: Arc<KernelMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "failed to bind metrics endpoint");
            return Err(e.into());
        }
    };

    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
