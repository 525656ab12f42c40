use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::forward::Forwarder;
use super::handlers;
use super::routes::RouteTable;
use crate::error::Result;
use crate::registry::Registry;
use crate::runtime::RuntimeConnector;

/// Proxy state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub routes: Arc<RouteTable>,
    pub forwarder: Forwarder,
    pub runtime: Arc<dyn RuntimeConnector>,
    /// Registry prefix for images pulled by `/server`
    pub image_registry: String,
}

impl AppState {
    pub fn new(
        registry: Registry,
        forwarder: Forwarder,
        runtime: Arc<dyn RuntimeConnector>,
        image_registry: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            routes: Arc::new(RouteTable::standard()),
            forwarder,
            runtime,
            image_registry: image_registry.into(),
        }
    }
}

/// Every request goes through the route table rather than axum's router so
/// that `{name}` captures may span several path segments.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(handlers::dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// The client-facing dispatching proxy
pub struct ProxyServer {
    listener: TcpListener,
    state: AppState,
}

impl ProxyServer {
    pub async fn bind(addr: &str, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, state })
    }

    pub fn from_listener(listener: TcpListener, state: AppState) -> Self {
        Self { listener, state }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until shutdown, letting in-flight requests finish
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Proxy server listening on {}", self.local_addr()?);
        let app = create_router(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        tracing::debug!("Proxy server stopped");
        Ok(())
    }
}
