use chrono::Utc;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::message::{GossipCommand, Heartbeat};
use crate::envelope::split_command;
use crate::error::{ControllerError, Result};
use crate::log_protocol_event;
use crate::registry::{HeartbeatOutcome, Registry};

/// Largest datagram the receiver accepts
pub const MAX_DATAGRAM_LEN: usize = 2048;

const RECEIVE_BACKOFF_BASE: Duration = Duration::from_millis(50);
const RECEIVE_BACKOFF_MAX: Duration = Duration::from_secs(2);
/// Consecutive receive failures logged at debug before escalating to warn
const RECEIVE_QUIET_FAILURES: u32 = 2;

/// Pause after the `failures`-th consecutive receive error: doubles from
/// 50 ms, capped at 2 s
fn receive_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RECEIVE_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(RECEIVE_BACKOFF_MAX)
}

/// Multicast endpoint shared by the receive loop and the heartbeat emitter
#[derive(Debug, Clone)]
pub struct MulticastServer {
    socket: Arc<UdpSocket>,
    group: SocketAddr,
}

impl MulticastServer {
    /// Bind the group port on all interfaces and join the group
    pub async fn bind(group: SocketAddrV4) -> Result<Self> {
        let socket =
            UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port())).await?;
        socket
            .join_multicast_v4(*group.ip(), Ipv4Addr::UNSPECIFIED)
            .map_err(|e| {
                ControllerError::InvalidAddress(format!(
                    "cannot join multicast group {}: {}",
                    group, e
                ))
            })?;
        socket.set_multicast_loop_v4(true)?;

        tracing::info!(group = %group, "Joined multicast group");
        Ok(Self::from_socket(socket, SocketAddr::V4(group)))
    }

    /// Use an already bound socket; datagrams are sent to `group`
    pub fn from_socket(socket: UdpSocket, group: SocketAddr) -> Self {
        Self {
            socket: Arc::new(socket),
            group,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<usize> {
        Ok(self.socket.send_to(payload, self.group).await?)
    }

    /// Receive datagrams and apply them to the registry until shutdown
    pub async fn run(&self, registry: Registry, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buffer = [0u8; MAX_DATAGRAM_LEN];
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    match received {
                        Ok((len, peer)) => {
                            failures = 0;
                            log_protocol_event!("gossip", "datagram", peer);
                            handle_datagram(&registry, &buffer[..len]).await;
                        },
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            if failures > RECEIVE_QUIET_FAILURES {
                                tracing::warn!(failures, "Multicast receive failing: {}", e);
                            } else {
                                tracing::debug!("Multicast receive failed: {}", e);
                            }
                            tokio::select! {
                                _ = tokio::time::sleep(receive_backoff(failures)) => {},
                                _ = shutdown.changed() => {
                                    tracing::debug!("Multicast receiver stopping");
                                    return Ok(());
                                },
                            }
                        },
                    }
                },
                _ = shutdown.changed() => {
                    tracing::debug!("Multicast receiver stopping");
                    return Ok(());
                },
            }
        }
    }
}

/// Apply one gossip datagram. Returns the outcome when it was a valid heartbeat.
pub async fn handle_datagram(registry: &Registry, datagram: &[u8]) -> Option<HeartbeatOutcome> {
    let Some((data, command)) = split_command(datagram) else {
        tracing::debug!(len = datagram.len(), "Dropping malformed gossip datagram");
        return None;
    };

    let Some(command) = GossipCommand::from_wire(command) else {
        tracing::trace!(
            command = %String::from_utf8_lossy(command),
            "Ignoring unknown gossip command"
        );
        return None;
    };

    match command {
        GossipCommand::AgentInternalHeartbeat
        | GossipCommand::ContainerRuntimeInternalHeartbeat
        | GossipCommand::ControllerProxyHeartbeat
        | GossipCommand::ControllerInternalHeartbeat => {
            handle_heartbeat(registry, command, data).await
        },
    }
}

async fn handle_heartbeat(
    registry: &Registry,
    command: GossipCommand,
    data: &[u8],
) -> Option<HeartbeatOutcome> {
    let heartbeat = match Heartbeat::parse(data) {
        Ok(heartbeat) => heartbeat,
        Err(e) => return refresh_known_sender(registry, command, data, e).await,
    };

    let outcome = registry
        .record_heartbeat(
            &heartbeat.address,
            &heartbeat.hostname,
            command.role(),
            heartbeat.status,
            Utc::now(),
        )
        .await;
    Some(outcome)
}

/// A heartbeat that fails to parse still proves a known sender is alive, as
/// long as its address field is readable.
async fn refresh_known_sender(
    registry: &Registry,
    command: GossipCommand,
    data: &[u8],
    error: ControllerError,
) -> Option<HeartbeatOutcome> {
    let address = std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.split(' ').next())
        .filter(|address| !address.is_empty());

    if let Some(address) = address {
        if registry.update_endpoint(address, Utc::now()).await {
            tracing::debug!(
                command = %command,
                address,
                "Refreshed endpoint from malformed heartbeat: {}",
                error
            );
            return Some(HeartbeatOutcome::Refreshed);
        }
    }
    tracing::warn!(command = %command, "Dropping heartbeat: {}", error);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EndpointRole;

    #[tokio::test]
    async fn test_heartbeat_creates_then_refreshes() {
        let registry = Registry::new();
        let datagram = b"tcp://10.0.0.5:4243 node5 1 container_runtime_internal_heartbeat";

        assert_eq!(
            handle_datagram(&registry, datagram).await,
            Some(HeartbeatOutcome::Joined)
        );
        assert_eq!(
            handle_datagram(&registry, datagram).await,
            Some(HeartbeatOutcome::Refreshed)
        );

        let hosts = registry.runtime_hosts().await;
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname, "node5");
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_are_dropped() {
        let registry = Registry::new();

        assert_eq!(handle_datagram(&registry, b"nospace").await, None);
        assert_eq!(handle_datagram(&registry, b"a b c something_else").await, None);
        assert_eq!(
            handle_datagram(&registry, b"10.0.0.1:1 host notanumber agent_internal_heartbeat")
                .await,
            None
        );
        assert_eq!(registry.stats().await.endpoints, 0);
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_refreshes_known_endpoint() {
        let registry = Registry::new();
        let joined_at = Utc::now() - chrono::Duration::seconds(30);
        registry
            .record_heartbeat(
                "tcp://10.0.0.7:4243",
                "node7",
                EndpointRole::ContainerRuntimeInternal,
                1,
                joined_at,
            )
            .await;

        let outcome = handle_datagram(
            &registry,
            b"tcp://10.0.0.7:4243 node7 notanumber container_runtime_internal_heartbeat",
        )
        .await;
        assert_eq!(outcome, Some(HeartbeatOutcome::Refreshed));

        let endpoint = registry.endpoint("tcp://10.0.0.7:4243").await.unwrap();
        assert!(endpoint.last_seen > joined_at);
        assert_eq!(endpoint.status, 1);

        // A wrong field count from a known sender refreshes it too
        assert_eq!(
            handle_datagram(&registry, b"tcp://10.0.0.7:4243 container_runtime_internal_heartbeat")
                .await,
            Some(HeartbeatOutcome::Refreshed)
        );
        // Unknown senders are never created from a malformed heartbeat
        assert_eq!(
            handle_datagram(
                &registry,
                b"tcp://10.0.0.8:4243 node8 bad container_runtime_internal_heartbeat"
            )
            .await,
            None
        );
        assert!(!registry.endpoint_exists("tcp://10.0.0.8:4243").await);
    }

    #[test]
    fn test_receive_backoff_doubles_and_caps() {
        assert_eq!(receive_backoff(1), Duration::from_millis(50));
        assert_eq!(receive_backoff(2), Duration::from_millis(100));
        assert_eq!(receive_backoff(4), Duration::from_millis(400));
        assert_eq!(receive_backoff(6), Duration::from_millis(1600));
        assert_eq!(receive_backoff(7), Duration::from_secs(2));
        assert_eq!(receive_backoff(u32::MAX), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_receive_loop_applies_datagrams_until_shutdown() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = socket.local_addr().unwrap();
        let server = MulticastServer::from_socket(socket, target);

        let registry = Registry::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let server = server.clone();
            let registry = registry.clone();
            tokio::spawn(async move { server.run(registry, shutdown_rx).await })
        };

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"tcp://10.0.0.9:7000 agent9 1 agent_internal_heartbeat", target)
            .await
            .unwrap();

        let mut joined = false;
        for _ in 0..50 {
            if registry.endpoint_exists("tcp://10.0.0.9:7000").await {
                joined = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(joined);
        assert_eq!(
            registry.agents().await[0].role,
            EndpointRole::AgentInternal
        );

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}
