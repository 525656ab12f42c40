use anyhow::Context;
use clap::Parser;
use fleet_controller::cli::{Cli, Commands};
use fleet_controller::config::Config;
use fleet_controller::controller::Controller;
use fleet_controller::error::ControllerError;
use fleet_controller::logging::{
    cleanup_old_logs, init_logging, log_file_path, ApplicationMode, LoggingConfig,
};
use std::time::Duration;
use tokio::sync::watch;

/// Seconds to wait before restarting a failed controller
const RESTART_COUNTDOWN: u64 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LoggingConfig::from_args(cli.quiet, cli.verbose > 0, cli.json);
    if let Commands::Start { log_file: true } = cli.command {
        log_config = LoggingConfig::for_mode(ApplicationMode::Controller);
        log_config.json_format = cli.json;
        log_config.file_output = log_file_path();
    }

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Commands::Start { log_file: true } = cli.command {
        if let Some(dir) = log_file_path().as_deref().and_then(|p| p.parent()) {
            let retention_days = std::env::var("FLEET_LOG_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7);
            cleanup_old_logs(dir, retention_days).ok();
        }
    }

    if let Err(e) = run(cli).await {
        let response = match e.downcast_ref::<ControllerError>() {
            Some(controller_error) => controller_error.to_error_response(),
            None => ControllerError::runtime(format!("{:#}", e)).to_error_response(),
        };
        match serde_json::to_string_pretty(&response) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
        Commands::Start { .. } => start(config).await,
    }
}

/// Run the controller, restarting it after failures until a shutdown signal
async fn start(config: Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    loop {
        let controller = Controller::new(config.clone()).context("Failed to build controller")?;
        let result = controller.run(shutdown_rx.clone()).await;

        if *shutdown_rx.borrow() {
            return result.context("Controller failed during shutdown");
        }
        match result {
            Ok(()) => return Ok(()),
            Err(e) => tracing::error!(code = e.to_error_code(), "Controller failed: {}", e),
        }

        for remaining in (1..=RESTART_COUNTDOWN).rev() {
            tracing::info!("Restarting controller in {}s", remaining);
            let mut wait = shutdown_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {},
                _ = wait.changed() => return Ok(()),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
