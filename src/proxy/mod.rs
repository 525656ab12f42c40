//! Client-facing reverse proxy.
//!
//! Requests are matched against a fixed route table, a backend runtime host
//! is chosen by the route's dispatch policy, and the request is forwarded.
//! Upgrade requests (`tcp`, `websocket`) become raw byte tunnels.

pub mod forward;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;
pub mod vm;

pub use forward::{requested_upgrade, Forwarder, Upgrade, MONITOR_USER_AGENT};
pub use models::{CreateServerRequest, ServerAccepted};
pub use routes::{Dispatch, RouteMatch, RouteTable};
pub use server::{create_router, AppState, ProxyServer};
