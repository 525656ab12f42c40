use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::message::{GossipCommand, Heartbeat};
use super::server::MulticastServer;
use crate::registry::Registry;

/// Periodically announces this controller and evicts silent peers
#[derive(Debug, Clone)]
pub struct HeartbeatEmitter {
    server: MulticastServer,
    registry: Registry,
    announcements: Vec<(GossipCommand, Heartbeat)>,
    interval: Duration,
    max_age: Duration,
}

impl HeartbeatEmitter {
    pub fn new(
        server: MulticastServer,
        registry: Registry,
        interval: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            server,
            registry,
            announcements: Vec::new(),
            interval,
            max_age,
        }
    }

    /// Add a heartbeat to send on every tick
    pub fn announce(mut self, command: GossipCommand, heartbeat: Heartbeat) -> Self {
        self.announcements.push((command, heartbeat));
        self
    }

    /// One emit-then-evict cycle
    pub async fn tick(&self) {
        for (command, heartbeat) in &self.announcements {
            if let Err(e) = self.server.send(&heartbeat.encode(*command)).await {
                tracing::warn!(command = %command, "Failed to send heartbeat: {}", e);
            }
        }

        let evicted = self.registry.clean_offline_endpoints(self.max_age).await;
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "Eviction sweep finished");
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    tracing::debug!("Heartbeat emitter stopping");
                    return;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Endpoint, EndpointRole};
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_tick_sends_announcements_and_evicts() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = MulticastServer::from_socket(socket, target);

        let registry = Registry::new();
        registry
            .add_endpoint(Endpoint::peer(
                "tcp://10.0.0.3:1",
                "old",
                EndpointRole::AgentInternal,
                1,
                Utc::now() - ChronoDuration::seconds(30),
            ))
            .await;

        let emitter = HeartbeatEmitter::new(
            server,
            registry.clone(),
            Duration::from_secs(3),
            Duration::from_secs(6),
        )
        .announce(
            GossipCommand::ControllerInternalHeartbeat,
            Heartbeat::new("tcp://127.0.0.1:9002", "ctl", 1),
        );

        emitter.tick().await;

        let mut buffer = [0u8; 256];
        let (len, _) = listener.recv_from(&mut buffer).await.unwrap();
        assert_eq!(
            &buffer[..len],
            b"tcp://127.0.0.1:9002 ctl 1 controller_internal_heartbeat"
        );
        assert!(!registry.endpoint_exists("tcp://10.0.0.3:1").await);
    }
}
