//! The `/server` resource: provision a container on a runtime host in the
//! background, or delete one through its owner.

use axum::http::Uri;
use std::sync::Arc;

use super::models::{CreateServerRequest, ServerAccepted};
use crate::error::{ControllerError, Result};
use crate::registry::{Endpoint, Registry};
use crate::runtime::{ContainerOptions, RuntimeConnector};

/// Background provisioning job for one accepted request
pub struct Provision {
    pub request_id: String,
    pub host: Endpoint,
    pub request: CreateServerRequest,
    pub image_registry: String,
}

/// Validate a create request and pick its runtime host.
/// The caller answers with [`ServerAccepted`] and spawns [`Provision::run`].
pub async fn accept_create(
    registry: &Registry,
    request: CreateServerRequest,
    image_registry: &str,
) -> Result<Provision> {
    if request.image_id.trim().is_empty() {
        return Err(ControllerError::BadParameter("image_id is required".into()));
    }

    let host = registry
        .select_host_for_new_container()
        .await
        .ok_or(ControllerError::MissingRoute)?;

    Ok(Provision {
        request_id: uuid::Uuid::new_v4().to_string(),
        host,
        request,
        image_registry: image_registry.to_string(),
    })
}

impl Provision {
    pub fn accepted(&self) -> ServerAccepted {
        ServerAccepted::new(self.request_id.clone())
    }

    /// Image reference to pull and run, qualified by the configured registry
    pub fn image_reference(&self) -> String {
        let image = self.request.image_id.trim();
        let registry = self.image_registry.trim_end_matches('/');
        if registry.is_empty() {
            image.to_string()
        } else {
            format!("{}/{}", registry, image)
        }
    }

    /// Pull (when no host has the image), create and start the container
    pub async fn run(
        self,
        registry: Registry,
        connector: Arc<dyn RuntimeConnector>,
    ) -> Result<String> {
        let runtime = connector.connect(&self.host.address)?;
        let reference = self.image_reference();

        if registry.lookup_by_image_id(&self.request.image_id).await.is_none() {
            tracing::info!(request_id = %self.request_id, image = %reference, "Pulling image");
            runtime.pull_image(&reference).await?;
        }

        let options = ContainerOptions {
            image: reference,
            cmd: self.request.cmd.clone(),
            env: self.request.env.clone(),
            ..ContainerOptions::default()
        };
        let id = runtime.create_container(&options).await?;

        let host_config = self
            .request
            .host_config
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        runtime.start_container(&id, &host_config).await?;

        tracing::info!(
            request_id = %self.request_id,
            host = %self.host.address,
            container = %id,
            "Server provisioned"
        );
        Ok(id)
    }
}

/// Single id from the `id` parameter of `DELETE /server`
pub fn delete_target(id_param: Option<&str>) -> Result<String> {
    let ids = id_param.map(str::trim).unwrap_or_default();
    if ids.is_empty() {
        return Err(ControllerError::BadParameter("id is required".into()));
    }

    let mut parts = ids.split(',');
    match (parts.next(), parts.next()) {
        (Some(id), None) => Ok(id.trim().to_string()),
        _ => Err(ControllerError::BadParameter(
            "deleting multiple servers at once is not supported".into(),
        )),
    }
}

/// Same request aimed at `path`, keeping the query string
pub fn rewrite_path(uri: &Uri, path: &str) -> Result<Uri> {
    let target = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    target
        .parse()
        .map_err(|_| ControllerError::BadParameter(format!("invalid path {}", path)))
}
