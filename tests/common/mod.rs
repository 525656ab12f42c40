//! Common utilities for integration tests
//!
//! Spawns controller components on ephemeral ports and provides small fake
//! backends that stand in for runtime hosts.

#![allow(dead_code)] // Not every test file uses every helper

use assert_cmd::Command;
use async_trait::async_trait;
use axum::{body::Bytes, extract::Request, http::StatusCode, response::IntoResponse, Router};
use chrono::Utc;
use fleet_controller::error::Result;
use fleet_controller::proxy::{AppState, Forwarder, ProxyServer};
use fleet_controller::registry::{ContainerRecord, Endpoint, EndpointRole, Registry};
use fleet_controller::report::ReportServer;
use fleet_controller::runtime::{ContainerOptions, ContainerRuntime, RuntimeConnector};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Get the path to the `fleet-controller` binary
#[allow(deprecated)] // cargo_bin() is deprecated but needed for fallback
pub fn fleet_binary() -> PathBuf {
    std::env::var("CARGO_BIN_EXE_fleet-controller")
        .map(PathBuf::from)
        .unwrap_or_else(|_| assert_cmd::cargo::cargo_bin("fleet-controller"))
}

/// Command with the home directory and FLEET_* variables isolated
pub fn fleet_command() -> Command {
    let mut cmd = Command::new(fleet_binary());
    cmd.env("HOME", "/nonexistent")
        .env_remove("FLEET_MULTICAST_ADDR")
        .env_remove("FLEET_PROXY_ADDR")
        .env_remove("FLEET_MONITOR_ADDR")
        .env_remove("FLEET_INTERNAL_ADDR")
        .env_remove("FLEET_TIMEOUT")
        .env_remove("FLEET_HOSTNAME")
        .env_remove("RUST_LOG");
    cmd
}

pub fn runtime_endpoint(addr: SocketAddr) -> Endpoint {
    Endpoint::peer(
        format!("tcp://{}", addr),
        "runtime",
        EndpointRole::ContainerRuntimeInternal,
        1,
        Utc::now(),
    )
}

pub fn container_on(id: &str, host: SocketAddr) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        image: "busybox".to_string(),
        command: String::new(),
        created: Utc::now().timestamp(),
        status: "Up".to_string(),
        names: vec![format!("/{}", id)],
        host: format!("tcp://{}", host),
        extra: serde_json::Map::new(),
    }
}

/// Address nothing listens on
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Running proxy; stops when dropped
pub struct TestProxy {
    pub addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn spawn_proxy(registry: Registry, runtime: Arc<dyn RuntimeConnector>) -> TestProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let state = AppState::new(
        registry,
        Forwarder::new(Duration::from_secs(2)).unwrap(),
        runtime,
        "",
    );
    let server = ProxyServer::from_listener(listener, state);
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));
    TestProxy { addr, shutdown }
}

pub struct TestReportServer {
    pub addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl TestReportServer {
    pub fn address(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

impl Drop for TestReportServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn spawn_report_server(registry: Registry) -> TestReportServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = ReportServer::from_listener(listener, registry);
    let addr = server.local_addr().unwrap();

    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));
    TestReportServer { addr, shutdown }
}

/// HTTP backend answering `202` with `<method> <path?query> <body>` and an
/// `x-backend` header carrying `name`
pub async fn spawn_http_backend(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |request: Request| async move {
        let method = request.method().clone();
        let uri = request.uri().clone();
        let body: Bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
            .await
            .unwrap_or_default();
        (
            StatusCode::ACCEPTED,
            [("x-backend", name)],
            format!("{} {} {}", method, uri, String::from_utf8_lossy(&body)),
        )
            .into_response()
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Backend that accepts a `tcp` upgrade and then echoes every byte
pub async fn spawn_tcp_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(echo_after_upgrade(stream));
        }
    });
    addr
}

async fn echo_after_upgrade(mut stream: TcpStream) {
    if read_head(&mut stream).await.is_none() {
        return;
    }
    let response = "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n";
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }

    let mut buffer = [0u8; 1024];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buffer[..n]).await.is_err() {
                    return;
                }
            },
        }
    }
}

/// Plain TCP service echoing every byte it receives, request head included.
/// It never answers with an HTTP status line of its own.
pub async fn spawn_raw_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Read an HTTP head up to the blank line
pub async fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8(head).ok()
}

/// WebSocket backend echoing every message
pub async fn spawn_websocket_echo_backend() -> SocketAddr {
    use futures_util::{SinkExt, StreamExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if message.is_close() {
                        break;
                    }
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Runtime connector that must never be used
pub struct NoRuntime;

impl RuntimeConnector for NoRuntime {
    fn connect(&self, address: &str) -> Result<Arc<dyn ContainerRuntime>> {
        panic!("unexpected runtime connection to {}", address);
    }
}

/// Runtime that records every call
#[derive(Default)]
pub struct RecordingRuntime {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn create_container(&self, options: &ContainerOptions) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("create {}", options.image));
        Ok("created-1".to_string())
    }

    async fn start_container(&self, id: &str, _host_config: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(format!("start {}", id));
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("pull {}", reference));
        Ok(())
    }
}

/// Connector handing out one shared [`RecordingRuntime`]
#[derive(Default)]
pub struct RecordingConnector {
    pub runtime: Arc<RecordingRuntime>,
    pub connected: Mutex<Vec<String>>,
}

impl RuntimeConnector for RecordingConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn ContainerRuntime>> {
        self.connected.lock().unwrap().push(address.to_string());
        Ok(self.runtime.clone())
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
