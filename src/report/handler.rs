use serde::de::DeserializeOwned;
use std::net::IpAddr;

use super::command::ReportCommand;
use crate::envelope::split_command;
use crate::error::{ControllerError, Result};
use crate::registry::{ContainerRecord, ImageRecord, Registry};

/// Applies report payloads from one connected runtime host
#[derive(Debug, Clone)]
pub struct ReportHandler {
    registry: Registry,
    peer_ip: Option<IpAddr>,
}

impl ReportHandler {
    pub fn new(registry: Registry, peer_ip: Option<IpAddr>) -> Self {
        Self { registry, peer_ip }
    }

    /// Handle one frame payload (`<data> <command>`)
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<ReportCommand> {
        let (data, command) = split_command(payload).ok_or(ControllerError::MalformedEnvelope)?;
        let command = ReportCommand::from_wire(command).ok_or_else(|| {
            ControllerError::UnknownCommand(String::from_utf8_lossy(command).into_owned())
        })?;

        self.handle(command, data).await?;
        Ok(command)
    }

    pub async fn handle(&self, command: ReportCommand, data: &[u8]) -> Result<()> {
        match command {
            ReportCommand::ImageList => {
                let images: Vec<ImageRecord> = decode(data)?;
                for image in images {
                    self.register_image(image).await;
                }
            },
            ReportCommand::ImageCreated | ReportCommand::ImageUpdated => {
                let image: ImageRecord = decode(data)?;
                self.register_image(image).await;
            },
            ReportCommand::ImageDeleted => {
                let image: ImageRecord = decode(data)?;
                self.registry.unregister_image(&image.id).await;
            },
            ReportCommand::ContainerList => {
                let containers: Vec<ContainerRecord> = decode(data)?;
                for container in containers {
                    self.register_container(container).await;
                }
            },
            ReportCommand::ContainerCreated | ReportCommand::ContainerUpdated => {
                let container: ContainerRecord = decode(data)?;
                self.register_container(container).await;
            },
            ReportCommand::ContainerDeleted => {
                let id = container_id(data)?;
                self.registry.unregister_container(&id).await;
            },
        }
        Ok(())
    }

    async fn register_image(&self, mut image: ImageRecord) {
        if image.host.is_empty() {
            image.host = self.owner().await;
        }
        self.registry.register_image(image.id.clone(), image).await;
    }

    async fn register_container(&self, mut container: ContainerRecord) {
        if container.host.is_empty() {
            container.host = self.owner().await;
        }
        self.registry
            .register_container(container.id.clone(), container)
            .await;
    }

    /// Owner of a record that did not name its host: the runtime host at the
    /// peer's IP, else empty so lookups treat the record as unowned.
    async fn owner(&self) -> String {
        let Some(ip) = self.peer_ip else {
            return String::new();
        };
        self.registry
            .resolve_runtime_host_by_ip(ip)
            .await
            .unwrap_or_default()
    }
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
}

/// The deletion payload is the bare id; a JSON string is accepted too
fn container_id(data: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(data)
        .map_err(|_| ControllerError::BadParameter("container id is not UTF-8".into()))?
        .trim();

    let id = if text.starts_with('"') {
        serde_json::from_str::<String>(text)?
    } else {
        text.to_string()
    };

    if id.is_empty() {
        return Err(ControllerError::BadParameter("empty container id".into()));
    }
    Ok(id)
}
