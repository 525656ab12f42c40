//! Backend forwarding: plain HTTP through a pooled client, upgrades through a
//! raw byte tunnel.

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::{self, header, HeaderMap, HeaderValue, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::{ControllerError, Result};

/// User agent of the load balancer's liveness check
pub const MONITOR_USER_AGENT: &str = "HTTP-Monitor/1.1";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// What kind of upgrade a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upgrade {
    Tcp,
    WebSocket,
}

impl Upgrade {
    fn as_str(self) -> &'static str {
        match self {
            Upgrade::Tcp => "tcp",
            Upgrade::WebSocket => "websocket",
        }
    }
}

/// `Connection: upgrade` plus a `tcp` or `websocket` Upgrade header
pub fn requested_upgrade(headers: &HeaderMap) -> Option<Upgrade> {
    let connection = headers.get(header::CONNECTION)?.to_str().ok()?;
    let wants_upgrade = connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if !wants_upgrade {
        return None;
    }

    let upgrade = headers.get(header::UPGRADE)?.to_str().ok()?.trim();
    if upgrade == "tcp" {
        Some(Upgrade::Tcp)
    } else if upgrade.eq_ignore_ascii_case("websocket") {
        Some(Upgrade::WebSocket)
    } else {
        None
    }
}

fn is_health_check(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|agent| agent == MONITOR_USER_AGENT)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn bad_gateway(host: &str, error: impl std::fmt::Display) -> ControllerError {
    ControllerError::BadGateway(format!("{}: {}", host, error))
}

/// HTTP/1.1 request head in origin form, with a `Host` header added when the
/// client sent none
fn request_head(parts: &http::request::Parts, host: &str) -> Vec<u8> {
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut head = format!("{} {} HTTP/1.1\r\n", parts.method, target).into_bytes();
    if !parts.headers.contains_key(header::HOST) {
        head.extend_from_slice(format!("host: {}\r\n", host).as_bytes());
    }
    for (name, value) in &parts.headers {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Forwards requests to runtime hosts
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    /// `timeout` bounds connecting and waiting for the response head
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Send `request` to `host` (`host:port`), or answer locally when the
    /// request never needs a backend.
    pub async fn forward(&self, host: Option<&str>, request: Request) -> Response {
        match self.try_forward(host, request).await {
            Ok(response) => response,
            Err(e) => {
                if matches!(e, ControllerError::BadGateway(_)) {
                    tracing::warn!("Backend unreachable: {}", e);
                }
                e.into_response()
            },
        }
    }

    async fn try_forward(&self, host: Option<&str>, request: Request) -> Result<Response> {
        let version = request.version();
        if version != Version::HTTP_10 && version != Version::HTTP_11 {
            return Err(ControllerError::UnsupportedProtocol(format!("{:?}", version)));
        }

        if is_health_check(request.headers()) {
            return Ok((StatusCode::OK, "ok").into_response());
        }

        let host = match host.map(str::trim) {
            Some(host) if !host.is_empty() => host,
            _ => return Err(ControllerError::MissingRoute),
        };

        match requested_upgrade(request.headers()) {
            Some(Upgrade::Tcp) => self.tcp_tunnel(host, request).await,
            Some(Upgrade::WebSocket) => self.websocket_tunnel(host, request).await,
            None => self.forward_http(host, request).await,
        }
    }

    async fn forward_http(&self, host: &str, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("http://{}{}", host, path);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let mut outgoing = self.client.request(parts.method, &url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            outgoing = outgoing.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let pending = outgoing.send();

        // Only the response head is bounded; bodies such as event streams
        // may stay open indefinitely.
        let backend = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| bad_gateway(host, "timed out waiting for response headers"))?
            .map_err(|e| bad_gateway(host, e))?;

        tracing::debug!(url = %url, status = %backend.status(), "Forwarded request");

        let mut response = Response::builder().status(backend.status());
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in backend.headers() {
                response_headers.append(name.clone(), value.clone());
            }
            strip_hop_by_hop(response_headers);
        }
        response
            .body(Body::from_stream(backend.bytes_stream()))
            .map_err(|e| bad_gateway(host, e))
    }

    async fn dial(&self, host: &str) -> Result<TcpStream> {
        tokio::time::timeout(self.timeout, TcpStream::connect(host))
            .await
            .map_err(|_| bad_gateway(host, "timed out connecting"))?
            .map_err(|e| bad_gateway(host, e))
    }

    /// Raw byte tunnel: the client is switched to `tcp` right away, the
    /// request head is written to the backend as-is, and from then on bytes
    /// flow both ways untouched, including whatever the backend answers.
    async fn tcp_tunnel(&self, host: &str, mut request: Request) -> Result<Response> {
        let mut backend = self.dial(host).await?;
        let client_upgrade = hyper::upgrade::on(&mut request);

        let (parts, body) = request.into_parts();
        let mut head = request_head(&parts, host);
        if let Some(len) = body.size_hint().exact().filter(|len| *len > 0) {
            let limit = usize::try_from(len).unwrap_or(usize::MAX);
            let bytes = axum::body::to_bytes(body, limit)
                .await
                .map_err(|e| ControllerError::BadParameter(format!("unreadable body: {}", e)))?;
            head.extend_from_slice(&bytes);
        }
        backend
            .write_all(&head)
            .await
            .map_err(|e| bad_gateway(host, e))?;

        let peer = host.to_string();
        tokio::spawn(async move {
            let client = match client_upgrade.await {
                Ok(client) => client,
                Err(e) => {
                    tracing::debug!(host = %peer, "Client upgrade failed: {}", e);
                    return;
                },
            };
            let mut client = TokioIo::new(client);
            match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
                Ok((up, down)) => {
                    tracing::debug!(host = %peer, kind = "tcp", up, down, "Tunnel closed")
                },
                Err(e) => tracing::debug!(host = %peer, "Tunnel closed with error: {}", e),
            }
        });

        tracing::info!(host, kind = Upgrade::Tcp.as_str(), "Tunnel established");
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, Upgrade::Tcp.as_str())
            .body(Body::empty())
            .map_err(|e| bad_gateway(host, e))
    }

    /// Replay the upgrade request to the backend and, once it switches
    /// protocols, splice the two upgraded connections together.
    async fn websocket_tunnel(&self, host: &str, mut request: Request) -> Result<Response> {
        let upgrade = Upgrade::WebSocket;
        let stream = self.dial(host).await?;

        let (mut sender, connection) =
            hyper::client::conn::http1::handshake::<_, Body>(TokioIo::new(stream))
                .await
                .map_err(|e| bad_gateway(host, e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.with_upgrades().await {
                tracing::debug!("Tunnel backend connection ended: {}", e);
            }
        });

        let client_upgrade = hyper::upgrade::on(&mut request);

        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let (mut parts, body) = request.into_parts();
        parts.uri = path.parse().map_err(|e| bad_gateway(host, e))?;
        parts.version = Version::HTTP_11;
        if !parts.headers.contains_key(header::HOST) {
            if let Ok(value) = HeaderValue::from_str(host) {
                parts.headers.insert(header::HOST, value);
            }
        }

        let mut backend = sender
            .send_request(http::Request::from_parts(parts, body))
            .await
            .map_err(|e| bad_gateway(host, e))?;

        if backend.status() != StatusCode::SWITCHING_PROTOCOLS {
            tracing::debug!(
                host,
                kind = upgrade.as_str(),
                status = %backend.status(),
                "Backend declined upgrade"
            );
            return Ok(backend.map(Body::new));
        }

        let backend_upgrade = hyper::upgrade::on(&mut backend);
        let peer = host.to_string();
        tokio::spawn(async move {
            let (client, backend) = match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::debug!(host = %peer, "Upgrade failed: {}", e);
                    return;
                },
            };

            let mut client = TokioIo::new(client);
            let mut backend = TokioIo::new(backend);
            match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
                Ok((up, down)) => tracing::debug!(
                    host = %peer,
                    kind = upgrade.as_str(),
                    up,
                    down,
                    "Tunnel closed"
                ),
                Err(e) => tracing::debug!(host = %peer, "Tunnel closed with error: {}", e),
            }
        });

        tracing::info!(host, kind = upgrade.as_str(), "Tunnel established");
        Ok(backend.map(|_| Body::empty()))
    }
}
