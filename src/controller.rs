//! Wires the registry, gossip, report, proxy and monitor components together
//! and owns their shutdown.

use std::net::SocketAddrV4;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::{split_protocol_address, Config};
use crate::error::{ControllerError, Result};
use crate::gossip::{GossipCommand, Heartbeat, HeartbeatEmitter, MulticastServer};
use crate::monitor::MonitorServer;
use crate::proxy::{AppState, Forwarder, ProxyServer};
use crate::registry::{Endpoint, EndpointRole, Registry};
use crate::report::ReportServer;
use crate::runtime::{HttpRuntimeConnector, RuntimeConnector};

pub struct Controller {
    config: Config,
    registry: Registry,
    runtime: Arc<dyn RuntimeConnector>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self> {
        let runtime = Arc::new(HttpRuntimeConnector::new(config.timeout())?);
        Ok(Self::with_runtime(config, runtime))
    }

    pub fn with_runtime(config: Config, runtime: Arc<dyn RuntimeConnector>) -> Self {
        let registry = Registry::with_cascade_on_eviction(config.cascade_on_eviction);
        Self {
            config,
            registry,
            runtime,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// This controller's own endpoints; they never expire
    pub async fn register_self(&self, hostname: &str) {
        for (address, role) in [
            (&self.config.internal_addr, EndpointRole::ControllerInternal),
            (&self.config.proxy_addr, EndpointRole::ControllerProxy),
        ] {
            self.registry
                .add_endpoint(Endpoint::local(
                    address.as_str(),
                    hostname,
                    role,
                    self.config.status,
                ))
                .await;
        }
    }

    /// Bind every listener, then serve until `shutdown` flips or a component
    /// fails. Bind failures are returned before anything is spawned.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = &self.config;
        let hostname = config.resolved_hostname();
        self.register_self(&hostname).await;

        let group: SocketAddrV4 = config.multicast_addr.parse().map_err(|_| {
            ControllerError::InvalidAddress(format!(
                "invalid multicast address {}",
                config.multicast_addr
            ))
        })?;
        let multicast = MulticastServer::bind(group).await?;

        let (_, internal) = split_protocol_address(&config.internal_addr)?;
        let report = ReportServer::bind(internal, self.registry.clone()).await?;

        let (_, proxy_addr) = split_protocol_address(&config.proxy_addr)?;
        let state = AppState::new(
            self.registry.clone(),
            Forwarder::new(config.timeout())?,
            self.runtime.clone(),
            config.image_registry.clone(),
        );
        let proxy = ProxyServer::bind(proxy_addr, state).await?;

        let (_, monitor_addr) = split_protocol_address(&config.monitor_addr)?;
        let monitor = MonitorServer::bind(monitor_addr, self.registry.clone()).await?;

        let emitter = HeartbeatEmitter::new(
            multicast.clone(),
            self.registry.clone(),
            config.heartbeat_interval(),
            config.max_heartbeat_age(),
        )
        .announce(
            GossipCommand::ControllerProxyHeartbeat,
            Heartbeat::new(config.proxy_addr.as_str(), hostname.as_str(), config.status),
        )
        .announce(
            GossipCommand::ControllerInternalHeartbeat,
            Heartbeat::new(config.internal_addr.as_str(), hostname.as_str(), config.status),
        );

        // Components stop on their own signal so a failing one can stop the rest
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        {
            let registry = self.registry.clone();
            let stop = stop_rx.clone();
            tasks.spawn(async move { ("gossip", multicast.run(registry, stop).await) });
        }
        {
            let stop = stop_rx.clone();
            tasks.spawn(async move {
                emitter.run(stop).await;
                ("heartbeat", Ok(()))
            });
        }
        let stop = stop_rx.clone();
        tasks.spawn(async move { ("report", report.run(stop).await) });
        let stop = stop_rx.clone();
        tasks.spawn(async move { ("proxy", proxy.run(stop).await) });
        tasks.spawn(async move { ("monitor", monitor.run(stop_rx).await) });

        tracing::info!(hostname = %hostname, "Controller started");

        let outcome = tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Shutdown requested");
                Ok(())
            },
            Some(joined) = tasks.join_next() => match joined {
                Ok((component, Ok(()))) => Err(ControllerError::runtime(format!(
                    "{} stopped unexpectedly",
                    component
                ))),
                Ok((component, Err(e))) => {
                    tracing::error!(component, "Component failed: {}", e);
                    Err(e)
                },
                Err(e) => Err(ControllerError::runtime(format!("component task panicked: {}", e))),
            },
        };

        let _ = stop_tx.send(true);
        let grace = config.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "Grace period of {:?} elapsed, aborting remaining tasks",
                grace
            );
            tasks.shutdown().await;
        }

        tracing::info!("Controller stopped");
        outcome
    }
}
