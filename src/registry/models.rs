use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;

/// Role a cluster participant announces in its heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EndpointRole {
    AgentInternal,
    ContainerRuntimeInternal,
    ControllerInternal,
    ControllerProxy,
}

impl EndpointRole {
    pub const ALL: [EndpointRole; 4] = [
        EndpointRole::AgentInternal,
        EndpointRole::ContainerRuntimeInternal,
        EndpointRole::ControllerInternal,
        EndpointRole::ControllerProxy,
    ];
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EndpointRole::AgentInternal => "agent_internal",
            EndpointRole::ContainerRuntimeInternal => "container_runtime_internal",
            EndpointRole::ControllerInternal => "controller_internal",
            EndpointRole::ControllerProxy => "controller_proxy",
        };
        f.write_str(name)
    }
}

/// Whether an endpoint belongs to this controller or was learned from the network.
/// Local endpoints are never evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointLifetime {
    Local,
    Peer,
}

/// A network-addressable cluster participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    /// `scheme://host:port`, unique within the registry
    pub address: String,
    pub hostname: String,
    pub role: EndpointRole,
    pub status: i32,
    #[serde(rename = "Timestamp", with = "chrono::serde::ts_seconds")]
    pub last_seen: DateTime<Utc>,
    pub lifetime: EndpointLifetime,
}

impl Endpoint {
    pub fn peer(
        address: impl Into<String>,
        hostname: impl Into<String>,
        role: EndpointRole,
        status: i32,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            address: address.into(),
            hostname: hostname.into(),
            role,
            status,
            last_seen,
            lifetime: EndpointLifetime::Peer,
        }
    }

    pub fn local(
        address: impl Into<String>,
        hostname: impl Into<String>,
        role: EndpointRole,
        status: i32,
    ) -> Self {
        Self {
            lifetime: EndpointLifetime::Local,
            ..Self::peer(address, hostname, role, status, Utc::now())
        }
    }

    pub fn is_local(&self) -> bool {
        self.lifetime == EndpointLifetime::Local
    }

    /// Peer endpoints go stale once `now - last_seen` exceeds `max_age`
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        if self.is_local() {
            return false;
        }
        let age_ms = (now - self.last_seen).num_milliseconds();
        age_ms > i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX)
    }

    /// The `host:port` part of the address
    pub fn authority(&self) -> &str {
        authority(&self.address)
    }
}

/// Strip a `scheme://` prefix from an address.
pub fn authority(address: &str) -> &str {
    address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address)
}

/// IP part of an address, when the host is a literal IP
pub fn address_ip(address: &str) -> Option<IpAddr> {
    let (host, _port) = authority(address).rsplit_once(':')?;
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

/// Container as reported by a runtime host. Fields the controller does not
/// interpret are kept in `extra` and served back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    #[serde(rename = "Id", alias = "ID")]
    pub id: String,
    #[serde(rename = "Image", default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(rename = "Command", default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(rename = "Created", default)]
    pub created: i64,
    #[serde(rename = "Status", default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(rename = "Names", default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Address of the owning runtime host
    #[serde(rename = "Host", default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Image as reported by a runtime host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "Id", alias = "ID")]
    pub id: String,
    #[serde(rename = "RepoTags", default, skip_serializing_if = "Vec::is_empty")]
    pub repo_tags: Vec<String>,
    #[serde(rename = "Created", default)]
    pub created: i64,
    #[serde(rename = "Size", default)]
    pub size: u64,
    #[serde(rename = "VirtualSize", default)]
    pub virtual_size: u64,
    #[serde(rename = "ParentId", default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    #[serde(rename = "Host", default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Counts of everything the registry currently tracks
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub endpoints: usize,
    pub agents: usize,
    pub runtime_hosts: usize,
    pub controller_internals: usize,
    pub controller_proxies: usize,
    pub containers: usize,
    pub images: usize,
}
