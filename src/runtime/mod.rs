//! Boundary to the container runtime running on each host.
//!
//! The controller only needs three calls: pull an image, create a container,
//! start it. [`RuntimeClient`] speaks the runtime's REST API over reqwest;
//! tests substitute their own [`ContainerRuntime`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::split_protocol_address;
use crate::error::{ControllerError, Result};

/// Body of a container-create call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerOptions {
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Cmd", default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(rename = "Env", default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Anything else is passed to the runtime untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContainerOptions {
    pub fn for_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container, returning its id
    async fn create_container(&self, options: &ContainerOptions) -> Result<String>;

    async fn start_container(&self, id: &str, host_config: &Value) -> Result<()>;

    async fn pull_image(&self, reference: &str) -> Result<()>;
}

/// Produces a runtime handle for a runtime host address
pub trait RuntimeConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn ContainerRuntime>>;
}

#[derive(Deserialize)]
struct CreatedContainer {
    #[serde(rename = "Id")]
    id: String,
}

/// REST client for one runtime host
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    client: reqwest::Client,
    base_url: String,
}

impl RuntimeClient {
    pub fn new(client: reqwest::Client, address: &str) -> Result<Self> {
        let (_, authority) = split_protocol_address(address)?;
        Ok(Self {
            client,
            base_url: format!("http://{}", authority),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            format!("runtime answered {}", status)
        } else {
            body.trim().to_string()
        };
        Err(ControllerError::runtime(message))
    }
}

#[async_trait]
impl ContainerRuntime for RuntimeClient {
    async fn create_container(&self, options: &ContainerOptions) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/containers/create", self.base_url))
            .json(options)
            .send()
            .await?;
        let created: CreatedContainer = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str, host_config: &Value) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/containers/{}/start", self.base_url, id))
            .json(host_config)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/images/create", self.base_url))
            .query(&[("fromImage", reference)])
            .send()
            .await?;
        // The pull progresses while the body streams; wait for it to finish
        Self::check(response).await?.bytes().await?;
        Ok(())
    }
}

/// Connector building [`RuntimeClient`]s that share one connection pool
#[derive(Debug, Clone)]
pub struct HttpRuntimeConnector {
    client: reqwest::Client,
}

impl HttpRuntimeConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl RuntimeConnector for HttpRuntimeConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn ContainerRuntime>> {
        Ok(Arc::new(RuntimeClient::new(self.client.clone(), address)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_from_endpoint_address() {
        let client = RuntimeClient::new(reqwest::Client::new(), "tcp://10.0.0.1:4243").unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.1:4243");

        let bare = RuntimeClient::new(reqwest::Client::new(), "10.0.0.2:4243").unwrap();
        assert_eq!(bare.base_url(), "http://10.0.0.2:4243");

        assert!(RuntimeClient::new(reqwest::Client::new(), "unix:///var/run/docker.sock").is_err());
    }

    #[test]
    fn test_container_options_shape() {
        let mut options = ContainerOptions::for_image("busybox");
        options.extra.insert("Hostname".into(), json!("vm-1"));

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value, json!({"Image": "busybox", "Hostname": "vm-1"}));
    }
}
