use clap::{Parser, Subcommand};
use std::path::PathBuf;

const LONG_ABOUT: &str = r#"
Fleet Controller - membership, state index and dispatching proxy for a fleet
of container hosts.

Listeners (defaults):
  multicast  239.255.43.99:1889     heartbeats from agents, runtimes, controllers
  internal   tcp://127.0.0.1:9002   framed state reports from runtime hosts
  proxy      tcp://127.0.0.1:9000   client API, forwarded to the owning host
  monitor    tcp://127.0.0.1:9001   /health and /stats

Configuration is read from ~/.fleet-controller/config.toml (or --config) and
FLEET_* environment variables.
"#;

#[derive(Parser, Clone)]
#[command(name = "fleet-controller")]
#[command(about = "Cluster controller for container hosts")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output (-q)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output logs in JSON format
    #[arg(long)]
    pub json: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the controller until interrupted
    Start {
        /// Write logs to ~/.fleet-controller/logs instead of stdout
        #[arg(long)]
        log_file: bool,
    },

    /// Print the resolved configuration as JSON
    Config,
}
