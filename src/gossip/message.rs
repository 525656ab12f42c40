use crate::envelope::join_command;
use crate::error::{ControllerError, Result};
use crate::registry::EndpointRole;
use std::fmt;

/// Commands carried by gossip datagrams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GossipCommand {
    AgentInternalHeartbeat,
    ContainerRuntimeInternalHeartbeat,
    ControllerProxyHeartbeat,
    ControllerInternalHeartbeat,
}

impl GossipCommand {
    pub fn from_wire(command: &[u8]) -> Option<Self> {
        match command {
            b"agent_internal_heartbeat" => Some(Self::AgentInternalHeartbeat),
            b"container_runtime_internal_heartbeat" | b"docker_internal_heartbeat" => {
                Some(Self::ContainerRuntimeInternalHeartbeat)
            },
            b"controller_proxy_heartbeat" => Some(Self::ControllerProxyHeartbeat),
            b"controller_internal_heartbeat" => Some(Self::ControllerInternalHeartbeat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentInternalHeartbeat => "agent_internal_heartbeat",
            Self::ContainerRuntimeInternalHeartbeat => "container_runtime_internal_heartbeat",
            Self::ControllerProxyHeartbeat => "controller_proxy_heartbeat",
            Self::ControllerInternalHeartbeat => "controller_internal_heartbeat",
        }
    }

    /// Role of the endpoint announcing itself with this command
    pub fn role(self) -> EndpointRole {
        match self {
            Self::AgentInternalHeartbeat => EndpointRole::AgentInternal,
            Self::ContainerRuntimeInternalHeartbeat => EndpointRole::ContainerRuntimeInternal,
            Self::ControllerProxyHeartbeat => EndpointRole::ControllerProxy,
            Self::ControllerInternalHeartbeat => EndpointRole::ControllerInternal,
        }
    }

    pub fn for_role(role: EndpointRole) -> Self {
        match role {
            EndpointRole::AgentInternal => Self::AgentInternalHeartbeat,
            EndpointRole::ContainerRuntimeInternal => Self::ContainerRuntimeInternalHeartbeat,
            EndpointRole::ControllerProxy => Self::ControllerProxyHeartbeat,
            EndpointRole::ControllerInternal => Self::ControllerInternalHeartbeat,
        }
    }
}

impl fmt::Display for GossipCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a heartbeat: `<address> <hostname> <status>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub address: String,
    pub hostname: String,
    pub status: i32,
}

impl Heartbeat {
    pub fn new(address: impl Into<String>, hostname: impl Into<String>, status: i32) -> Self {
        Self {
            address: address.into(),
            hostname: hostname.into(),
            status,
        }
    }

    /// Parse the data part of a heartbeat datagram. Exactly three fields.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| ControllerError::InvalidHeartbeat("payload is not UTF-8".into()))?;

        let fields: Vec<&str> = text.split(' ').collect();
        let [address, hostname, status] = fields.as_slice() else {
            return Err(ControllerError::InvalidHeartbeat(format!(
                "expected 3 fields, got {}: {:?}",
                fields.len(),
                text
            )));
        };

        if address.is_empty() {
            return Err(ControllerError::InvalidHeartbeat("empty address".into()));
        }
        let status = status.parse().map_err(|_| {
            ControllerError::InvalidHeartbeat(format!("status is not an integer: {:?}", status))
        })?;

        Ok(Self::new(*address, *hostname, status))
    }

    /// Full datagram for this heartbeat under the given command
    pub fn encode(&self, command: GossipCommand) -> Vec<u8> {
        let data = format!("{} {} {}", self.address, self.hostname, self.status);
        join_command(data.as_bytes(), command.as_str())
    }
}
