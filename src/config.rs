use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".fleet-controller";
const CONFIG_FILE: &str = "config.toml";

/// Resolved controller configuration.
///
/// Sources, lowest priority first:
///   1. built-in defaults
///   2. TOML file (`--config`, or `~/.fleet-controller/config.toml` if present)
///   3. environment variables:
///      FLEET_MULTICAST_ADDR, FLEET_PROXY_ADDR, FLEET_MONITOR_ADDR,
///      FLEET_INTERNAL_ADDR, FLEET_TIMEOUT, FLEET_HOSTNAME
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Multicast group and port used for heartbeats, `ip:port`
    pub multicast_addr: String,
    /// Address the dispatching proxy listens on, `tcp://host:port`
    pub proxy_addr: String,
    /// Address of the health/statistics listener, `tcp://host:port`
    pub monitor_addr: String,
    /// Address of the report listener, `tcp://host:port`
    pub internal_addr: String,
    /// Backend response timeout in seconds
    pub timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub shutdown_grace_secs: u64,
    /// Advertised hostname; the system hostname when unset
    pub hostname: Option<String>,
    /// Health code advertised in this controller's heartbeats
    pub status: i32,
    /// Registry prefix used when a runtime host has to pull an image
    pub image_registry: String,
    /// Drop container/image records owned by an evicted host
    pub cascade_on_eviction: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            multicast_addr: "239.255.43.99:1889".to_string(),
            proxy_addr: "tcp://127.0.0.1:9000".to_string(),
            monitor_addr: "tcp://127.0.0.1:9001".to_string(),
            internal_addr: "tcp://127.0.0.1:9002".to_string(),
            timeout_secs: 5,
            heartbeat_interval_secs: 3,
            shutdown_grace_secs: 5,
            hostname: None,
            status: 1,
            image_registry: String::new(),
            cascade_on_eviction: false,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ControllerError::ConfigError(e.to_string()))
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Resolve the effective configuration: explicit file, else the default
    /// file if it exists, else defaults; then environment overrides.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var("FLEET_MULTICAST_ADDR") {
            self.multicast_addr = value;
        }
        if let Ok(value) = std::env::var("FLEET_PROXY_ADDR") {
            self.proxy_addr = value;
        }
        if let Ok(value) = std::env::var("FLEET_MONITOR_ADDR") {
            self.monitor_addr = value;
        }
        if let Ok(value) = std::env::var("FLEET_INTERNAL_ADDR") {
            self.internal_addr = value;
        }
        if let Ok(value) = std::env::var("FLEET_TIMEOUT") {
            self.timeout_secs = value.parse().map_err(|_| {
                ControllerError::ConfigError(format!("FLEET_TIMEOUT is not a number: {}", value))
            })?;
        }
        if let Ok(value) = std::env::var("FLEET_HOSTNAME") {
            self.hostname = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ControllerError::ConfigError(
                "heartbeat_interval_secs must be greater than zero".into(),
            ));
        }
        self.multicast_addr
            .parse::<std::net::SocketAddrV4>()
            .map_err(|_| {
                ControllerError::ConfigError(format!(
                    "multicast_addr must be an IPv4 ip:port, got {}",
                    self.multicast_addr
                ))
            })?;
        for addr in [&self.proxy_addr, &self.monitor_addr, &self.internal_addr] {
            split_protocol_address(addr)?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// An endpoint is considered dead after two missed heartbeat intervals
    pub fn max_heartbeat_age(&self) -> Duration {
        self.heartbeat_interval() * 2
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_string())
        })
    }
}

/// Split `proto://host:port` into its protocol and socket address parts.
/// An address without a protocol is treated as `tcp`.
pub fn split_protocol_address(address: &str) -> Result<(&str, &str)> {
    let (proto, addr) = address.split_once("://").unwrap_or(("tcp", address));
    if proto != "tcp" {
        return Err(ControllerError::InvalidAddress(format!(
            "unsupported protocol {} in {}",
            proto, address
        )));
    }
    if addr.rsplit_once(':').is_none() {
        return Err(ControllerError::InvalidAddress(format!(
            "missing port in {}",
            address
        )));
    }
    Ok((proto, addr))
}
