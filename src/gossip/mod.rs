//! Multicast membership: heartbeat codec, receive loop, and the periodic
//! emit/evict timer.

pub mod heartbeat;
pub mod message;
pub mod server;

pub use heartbeat::HeartbeatEmitter;
pub use message::{GossipCommand, Heartbeat};
pub use server::{handle_datagram, MulticastServer, MAX_DATAGRAM_LEN};
