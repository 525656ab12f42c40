use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use super::frame::{read_frame, ACK_FAILED, ACK_OK};
use super::handler::ReportHandler;
use crate::error::Result;
use crate::registry::Registry;
use crate::{log_error, log_protocol_event};

/// Accepts report connections from runtime hosts
pub struct ReportServer {
    listener: TcpListener,
    registry: Registry,
}

impl ReportServer {
    pub async fn bind(addr: &str, registry: Registry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry })
    }

    pub fn from_listener(listener: TcpListener, registry: Registry) -> Self {
        Self { listener, registry }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until shutdown. Open connections are dropped on return.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("Report server listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let registry = self.registry.clone();
                            connections.spawn(serve_connection(stream, peer, registry));
                        },
                        Err(e) => log_error!(e, "accepting report connection"),
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {},
                _ = shutdown.changed() => break,
            }
        }

        connections.shutdown().await;
        tracing::debug!("Report server stopped");
        Ok(())
    }
}

/// Serve frames from one host until it disconnects
pub async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, registry: Registry) {
    tracing::debug!(peer = %peer, "Report connection opened");
    let handler = ReportHandler::new(registry, Some(peer.ip()));

    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(peer = %peer, "Report connection read failed: {}", e);
                break;
            },
        };

        let ack = match handler.handle_payload(&payload).await {
            Ok(command) => {
                log_protocol_event!("report", command, peer);
                ACK_OK
            },
            Err(e) => {
                tracing::warn!(peer = %peer, code = e.to_error_code(), "Report rejected: {}", e);
                ACK_FAILED
            },
        };

        if let Err(e) = stream.write_all(&[ack]).await {
            tracing::debug!(peer = %peer, "Failed to acknowledge report: {}", e);
            break;
        }
    }

    tracing::debug!(peer = %peer, "Report connection closed");
}
