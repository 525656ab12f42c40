//! Authoritative in-memory view of cluster membership and resources.
//!
//! Every index lives behind one lock so that a mutation updates all of them
//! in a single critical section: an endpoint can never be evicted halfway
//! through a lookup, and the role index never disagrees with the primary
//! store. No I/O happens while the lock is held.

pub mod models;

pub use models::{
    address_ip, authority, ContainerRecord, Endpoint, EndpointLifetime, EndpointRole,
    ImageRecord, RegistryStats,
};

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::log_registry_operation;

/// Result of applying a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// First heartbeat from this address; the endpoint was created
    Joined,
    /// Known endpoint; only `last_seen` was refreshed
    Refreshed,
}

#[derive(Debug, Default)]
struct Inner {
    endpoints: HashMap<String, Endpoint>,
    by_role: HashMap<EndpointRole, BTreeSet<String>>,
    containers: HashMap<String, ContainerRecord>,
    images: HashMap<String, ImageRecord>,
    container_hosts: HashMap<String, String>,
    image_hosts: HashMap<String, String>,
    /// Runtime host address → sequence number of its last new-container assignment
    assignments: HashMap<String, u64>,
    assignment_seq: u64,
}

impl Inner {
    fn insert_endpoint(&mut self, endpoint: Endpoint) {
        if let Some(previous) = self.endpoints.get(&endpoint.address) {
            if previous.role != endpoint.role {
                if let Some(members) = self.by_role.get_mut(&previous.role) {
                    members.remove(&endpoint.address);
                }
            }
        }
        self.by_role
            .entry(endpoint.role)
            .or_default()
            .insert(endpoint.address.clone());
        self.endpoints.insert(endpoint.address.clone(), endpoint);
    }

    fn remove_endpoint(&mut self, address: &str) -> Option<Endpoint> {
        let endpoint = self.endpoints.remove(address)?;
        if let Some(members) = self.by_role.get_mut(&endpoint.role) {
            members.remove(address);
        }
        self.assignments.remove(address);
        Some(endpoint)
    }

    fn members(&self, role: EndpointRole) -> impl Iterator<Item = &Endpoint> {
        self.by_role
            .get(&role)
            .into_iter()
            .flatten()
            .filter_map(|address| self.endpoints.get(address))
    }

    fn remove_resources_of(&mut self, host: &str) -> (usize, usize) {
        let containers: Vec<String> = self
            .container_hosts
            .iter()
            .filter(|(_, owner)| owner.as_str() == host)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &containers {
            self.container_hosts.remove(id);
            self.containers.remove(id);
        }

        let images: Vec<String> = self
            .image_hosts
            .iter()
            .filter(|(_, owner)| owner.as_str() == host)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &images {
            self.image_hosts.remove(id);
            self.images.remove(id);
        }

        (containers.len(), images.len())
    }
}

/// Shared handle to the cluster registry. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
    cascade_on_eviction: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that drops container and image records owned by an evicted host
    pub fn with_cascade_on_eviction(cascade: bool) -> Self {
        Self {
            inner: Arc::default(),
            cascade_on_eviction: cascade,
        }
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Insert or overwrite the endpoint keyed by its address
    pub async fn add_endpoint(&self, endpoint: Endpoint) {
        log_registry_operation!("add_endpoint", endpoint.address, endpoint.role.to_string());
        self.inner.write().await.insert_endpoint(endpoint);
    }

    pub async fn endpoint_exists(&self, address: &str) -> bool {
        self.inner.read().await.endpoints.contains_key(address)
    }

    pub async fn endpoint(&self, address: &str) -> Option<Endpoint> {
        self.inner.read().await.endpoints.get(address).cloned()
    }

    /// Refresh `last_seen` only. Returns `false` if the endpoint is unknown.
    pub async fn update_endpoint(&self, address: &str, timestamp: DateTime<Utc>) -> bool {
        match self.inner.write().await.endpoints.get_mut(address) {
            Some(endpoint) => {
                endpoint.last_seen = timestamp;
                true
            },
            None => false,
        }
    }

    /// Create the endpoint on first sight, otherwise refresh its timestamp.
    /// Hostname and status of a known endpoint are left untouched.
    pub async fn record_heartbeat(
        &self,
        address: &str,
        hostname: &str,
        role: EndpointRole,
        status: i32,
        now: DateTime<Utc>,
    ) -> HeartbeatOutcome {
        let mut inner = self.inner.write().await;
        if let Some(endpoint) = inner.endpoints.get_mut(address) {
            endpoint.last_seen = now;
            return HeartbeatOutcome::Refreshed;
        }

        inner.insert_endpoint(Endpoint::peer(address, hostname, role, status, now));
        drop(inner);

        tracing::info!(address, hostname, role = %role, "Endpoint joined");
        HeartbeatOutcome::Joined
    }

    /// Evict every peer endpoint not seen within `max_age`
    pub async fn clean_offline_endpoints(&self, max_age: Duration) -> Vec<Endpoint> {
        self.clean_offline_endpoints_at(Utc::now(), max_age).await
    }

    pub async fn clean_offline_endpoints_at(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Vec<Endpoint> {
        let mut inner = self.inner.write().await;

        let stale: Vec<String> = inner
            .endpoints
            .values()
            .filter(|endpoint| endpoint.is_stale(now, max_age))
            .map(|endpoint| endpoint.address.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for address in stale {
            if let Some(endpoint) = inner.remove_endpoint(&address) {
                if self.cascade_on_eviction {
                    let (containers, images) = inner.remove_resources_of(&address);
                    if containers + images > 0 {
                        tracing::info!(
                            address = %address,
                            containers,
                            images,
                            "Dropped resources of evicted host"
                        );
                    }
                }
                evicted.push(endpoint);
            }
        }
        drop(inner);

        for endpoint in &evicted {
            tracing::info!(
                address = %endpoint.address,
                role = %endpoint.role,
                "Endpoint evicted after missing heartbeats"
            );
        }
        evicted
    }

    /// Endpoints of one role, ordered by address
    pub async fn endpoints_by_role(&self, role: EndpointRole) -> Vec<Endpoint> {
        self.inner.read().await.members(role).cloned().collect()
    }

    pub async fn agents(&self) -> Vec<Endpoint> {
        self.endpoints_by_role(EndpointRole::AgentInternal).await
    }

    pub async fn runtime_hosts(&self) -> Vec<Endpoint> {
        self.endpoints_by_role(EndpointRole::ContainerRuntimeInternal)
            .await
    }

    /// Controllers as seen by clients: their proxy endpoints
    pub async fn controllers(&self) -> Vec<Endpoint> {
        self.endpoints_by_role(EndpointRole::ControllerProxy).await
    }

    /// Uniform random choice among live endpoints of a role
    pub async fn random_endpoint(&self, role: EndpointRole) -> Option<Endpoint> {
        let inner = self.inner.read().await;
        let candidates: Vec<&Endpoint> = inner.members(role).collect();
        candidates.choose(&mut rand::rng()).map(|e| (*e).clone())
    }

    /// Pick the runtime host that least recently received a new container.
    /// Hosts never picked come first; ties go to the lowest address.
    pub async fn select_host_for_new_container(&self) -> Option<Endpoint> {
        let mut inner = self.inner.write().await;

        let chosen = inner
            .members(EndpointRole::ContainerRuntimeInternal)
            .min_by_key(|endpoint| {
                (
                    inner.assignments.get(&endpoint.address).copied().unwrap_or(0),
                    endpoint.address.clone(),
                )
            })
            .cloned()?;

        inner.assignment_seq += 1;
        let seq = inner.assignment_seq;
        inner.assignments.insert(chosen.address.clone(), seq);

        log_registry_operation!("assign_new_container", chosen.address);
        Some(chosen)
    }

    /// Runtime host whose address carries the given IP
    pub async fn resolve_runtime_host_by_ip(&self, ip: IpAddr) -> Option<String> {
        self.inner
            .read()
            .await
            .members(EndpointRole::ContainerRuntimeInternal)
            .find(|endpoint| address_ip(&endpoint.address) == Some(ip))
            .map(|endpoint| endpoint.address.clone())
    }

    // ------------------------------------------------------------------
    // Containers and images
    // ------------------------------------------------------------------

    /// Upsert a container; the latest report wins
    pub async fn register_container(&self, id: impl Into<String>, record: ContainerRecord) {
        let id = id.into();
        log_registry_operation!("register_container", id, record.host.clone());
        let mut inner = self.inner.write().await;
        inner.container_hosts.insert(id.clone(), record.host.clone());
        inner.containers.insert(id, record);
    }

    pub async fn unregister_container(&self, id: &str) -> bool {
        log_registry_operation!("unregister_container", id);
        let mut inner = self.inner.write().await;
        inner.container_hosts.remove(id);
        inner.containers.remove(id).is_some()
    }

    /// Upsert an image; the latest report wins
    pub async fn register_image(&self, id: impl Into<String>, record: ImageRecord) {
        let id = id.into();
        log_registry_operation!("register_image", id, record.host.clone());
        let mut inner = self.inner.write().await;
        inner.image_hosts.insert(id.clone(), record.host.clone());
        inner.images.insert(id, record);
    }

    pub async fn unregister_image(&self, id: &str) -> bool {
        log_registry_operation!("unregister_image", id);
        let mut inner = self.inner.write().await;
        inner.image_hosts.remove(id);
        inner.images.remove(id).is_some()
    }

    /// Owning host of a container, `None` if unknown or unowned
    pub async fn lookup_by_container_id(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .container_hosts
            .get(id)
            .filter(|host| !host.is_empty())
            .cloned()
    }

    /// Owning host of an image, `None` if unknown or unowned
    pub async fn lookup_by_image_id(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .image_hosts
            .get(id)
            .filter(|host| !host.is_empty())
            .cloned()
    }

    /// All containers, newest first
    pub async fn all_containers(&self) -> Vec<ContainerRecord> {
        let mut containers: Vec<ContainerRecord> =
            self.inner.read().await.containers.values().cloned().collect();
        containers.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
        containers
    }

    /// All images, newest first
    pub async fn all_images(&self) -> Vec<ImageRecord> {
        let mut images: Vec<ImageRecord> =
            self.inner.read().await.images.values().cloned().collect();
        images.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
        images
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let count = |role: EndpointRole| inner.by_role.get(&role).map(BTreeSet::len).unwrap_or(0);
        RegistryStats {
            endpoints: inner.endpoints.len(),
            agents: count(EndpointRole::AgentInternal),
            runtime_hosts: count(EndpointRole::ContainerRuntimeInternal),
            controller_internals: count(EndpointRole::ControllerInternal),
            controller_proxies: count(EndpointRole::ControllerProxy),
            containers: inner.containers.len(),
            images: inner.images.len(),
        }
    }
}
