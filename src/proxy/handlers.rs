use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Query, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    Form,
};
use std::collections::HashMap;

use super::models::CreateServerRequest;
use super::routes::Dispatch;
use super::server::AppState;
use super::vm;
use crate::error::ControllerError;
use crate::registry::authority;

/// Largest `/server` request body accepted
const MAX_SERVER_BODY: usize = 64 * 1024;
/// Largest form body buffered to find a routing parameter
const MAX_FORM_BODY: usize = 64 * 1024;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

type Params = HashMap<String, String>;

fn query_params(request: &Request) -> Params {
    Query::<Params>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .unwrap_or_default()
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with(FORM_CONTENT_TYPE))
}

/// Parameters from a url-encoded form body. The body is buffered and put back
/// unchanged so the backend still receives it. Other bodies are left alone.
async fn form_params(request: Request) -> Result<(Request, Params), ControllerError> {
    if !is_form(&request) {
        return Ok((request, Params::new()));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_FORM_BODY)
        .await
        .map_err(|e| ControllerError::BadParameter(format!("unreadable body: {}", e)))?;

    let form_request = axum::http::Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
        .body(Body::from(bytes.clone()))
        .map_err(|e| ControllerError::BadParameter(e.to_string()))?;
    let params = Form::<Params>::from_request(form_request, &())
        .await
        .map(|Form(params)| params)
        .unwrap_or_default();

    Ok((Request::from_parts(parts, Body::from(bytes)), params))
}

/// Non-empty parameter, reduced to `host:port` if it carries a scheme
fn host_param(params: &Params) -> Option<String> {
    params
        .get("host")
        .map(|host| authority(host.trim()).to_string())
        .filter(|host| !host.is_empty())
}

/// Entry point for every proxied request
pub async fn dispatch(State(state): State<AppState>, mut request: Request) -> Response {
    let Some(route) = state.routes.resolve(request.method(), request.uri().path()) else {
        return not_found_handler().await.into_response();
    };
    let params = query_params(&request);
    let name = route.name.unwrap_or_default();

    match route.dispatch {
        Dispatch::ExplicitHost => {
            let host = host_param(&params);
            state.forwarder.forward(host.as_deref(), request).await
        },
        Dispatch::HostOrRandom => {
            let host = match host_param(&params) {
                Some(host) => Some(host),
                None => random_runtime_host(&state).await,
            };
            state.forwarder.forward(host.as_deref(), request).await
        },
        Dispatch::ListImages => match host_param(&params) {
            Some(host) => state.forwarder.forward(Some(&host), request).await,
            None => Json(state.registry.all_images().await).into_response(),
        },
        Dispatch::ListContainers => match host_param(&params) {
            Some(host) => state.forwarder.forward(Some(&host), request).await,
            None => Json(state.registry.all_containers().await).into_response(),
        },
        Dispatch::ByImage => {
            let host = state.registry.lookup_by_image_id(&name).await;
            forward_to_owner(&state, host, request).await
        },
        Dispatch::ByContainer => {
            let host = state.registry.lookup_by_container_id(&name).await;
            forward_to_owner(&state, host, request).await
        },
        Dispatch::Commit => {
            let (request, form) = match form_params(request).await {
                Ok(read) => read,
                Err(e) => return e.into_response(),
            };
            // Form fields take precedence over the query string
            let mut params = params;
            params.extend(form);

            let host = match params.get("container").filter(|id| !id.is_empty()) {
                Some(container) => state
                    .registry
                    .lookup_by_container_id(container)
                    .await
                    .map(|owner| authority(&owner).to_string()),
                None => host_param(&params),
            };
            state.forwarder.forward(host.as_deref(), request).await
        },
        Dispatch::CreateContainer => {
            let host = state.registry.select_host_for_new_container().await;
            let host = host.map(|endpoint| endpoint.authority().to_string());
            state.forwarder.forward(host.as_deref(), request).await
        },
        Dispatch::ListControllers => Json(state.registry.controllers().await).into_response(),
        Dispatch::ListRuntimeHosts => Json(state.registry.runtime_hosts().await).into_response(),
        Dispatch::ListAgents => Json(state.registry.agents().await).into_response(),
        Dispatch::CreateServer => create_server(state, request).await,
        Dispatch::DeleteServer => {
            let id = match vm::delete_target(params.get("id").map(String::as_str)) {
                Ok(id) => id,
                Err(e) => return e.into_response(),
            };
            match vm::rewrite_path(request.uri(), &format!("/containers/{}", id)) {
                Ok(uri) => *request.uri_mut() = uri,
                Err(e) => return e.into_response(),
            }
            let host = state.registry.lookup_by_container_id(&id).await;
            forward_to_owner(&state, host, request).await
        },
        Dispatch::ServerAction(action) => {
            let path = format!("/containers/{}/{}", name, action);
            match vm::rewrite_path(request.uri(), &path) {
                Ok(uri) => *request.uri_mut() = uri,
                Err(e) => return e.into_response(),
            }
            let host = state.registry.lookup_by_container_id(&name).await;
            forward_to_owner(&state, host, request).await
        },
    }
}

async fn forward_to_owner(state: &AppState, owner: Option<String>, request: Request) -> Response {
    let host = owner.map(|owner| authority(&owner).to_string());
    state.forwarder.forward(host.as_deref(), request).await
}

async fn random_runtime_host(state: &AppState) -> Option<String> {
    state
        .registry
        .random_endpoint(crate::registry::EndpointRole::ContainerRuntimeInternal)
        .await
        .map(|endpoint| endpoint.authority().to_string())
}

/// `POST /server`: validate, answer 201 at once, provision in the background
async fn create_server(state: AppState, request: Request) -> Response {
    let body: Bytes = match axum::body::to_bytes(request.into_body(), MAX_SERVER_BODY).await {
        Ok(body) => body,
        Err(e) => {
            return ControllerError::BadParameter(format!("unreadable body: {}", e))
                .into_response()
        },
    };
    let create: CreateServerRequest = match serde_json::from_slice(&body) {
        Ok(create) => create,
        Err(e) => {
            return ControllerError::BadParameter(format!("invalid JSON body: {}", e))
                .into_response()
        },
    };

    let provision = match vm::accept_create(&state.registry, create, &state.image_registry).await {
        Ok(provision) => provision,
        Err(e) => return e.into_response(),
    };
    let accepted = provision.accepted();

    let registry = state.registry.clone();
    let connector = state.runtime.clone();
    tokio::spawn(async move {
        let request_id = provision.request_id.clone();
        if let Err(e) = provision.run(registry, connector).await {
            tracing::error!(request_id = %request_id, error = %e, "Server provisioning failed");
        }
    });

    (StatusCode::CREATED, Json(accepted)).into_response()
}

/// 404 for paths outside the route table
pub async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "code": "NOT_FOUND"
        })),
    )
}
