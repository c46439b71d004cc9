//! A minimal health-check HTTP surface, run alongside the SMTP listener so
//! the demo binary stays trivially probeable by an external supervisor.
//! Not a metrics exporter: no schema, just liveness.

use anyhow::Result;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use log::{error, info};
use tokio::net::TcpListener;

async fn health_check_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Binds to `bind_address:port` and serves `/health` until the process
/// stops or the listener errors.
pub async fn run_health_server(bind_address: String, port: u16) -> Result<()> {
    let app = Router::new().route("/health", get(health_check_handler));
    let addr_str = format!("{bind_address}:{port}");

    let listener = TcpListener::bind(&addr_str).await.map_err(|e| {
        error!("Failed to bind health check server to {addr_str}: {e}");
        anyhow::anyhow!("Failed to bind health check server: {e}")
    })?;

    info!("Health check server listening on {addr_str}");

    axum::serve(listener, app).await.map_err(|e| {
        error!("Health check server error: {e}");
        anyhow::anyhow!("Health check server failed: {e}")
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_handler_returns_200() {
        let response = health_check_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
