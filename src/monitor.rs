//! Health and statistics listener on the monitor address.

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::proxy::handlers::not_found_handler;
use crate::registry::{Registry, RegistryStats};

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

pub fn create_router(registry: Registry) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .fallback(not_found_handler)
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleet-controller".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn stats_handler(State(registry): State<Registry>) -> Json<RegistryStats> {
    Json(registry.stats().await)
}

pub struct MonitorServer {
    listener: TcpListener,
    registry: Registry,
}

impl MonitorServer {
    pub async fn bind(addr: &str, registry: Registry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Monitor listening on {}", self.local_addr()?);
        axum::serve(self.listener, create_router(self.registry))
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;
        Ok(())
    }
}
