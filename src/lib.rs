pub mod cli;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod gossip;
pub mod logging;
pub mod monitor;
pub mod proxy;
pub mod registry;
pub mod report;
pub mod runtime;
