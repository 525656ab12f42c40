//! Controller logging setup
//!
//! Structured logging through `tracing`, with human-readable or JSON output
//! and optional daily-rotated log files for long-running controller processes.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to output
    pub level: Level,
    /// Enable colored output
    pub color: bool,
    /// Show timestamps
    pub show_timestamps: bool,
    /// Show target/module name
    pub show_target: bool,
    /// Enable JSON format for machine parsing
    pub json_format: bool,
    /// Emit span close events
    pub enable_spans: bool,
    /// Write to a daily-rotated file instead of stdout
    pub file_output: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            color: true,
            show_timestamps: false,
            show_target: false,
            json_format: false,
            enable_spans: false,
            file_output: None,
        }
    }
}

impl LoggingConfig {
    pub fn for_mode(mode: ApplicationMode) -> Self {
        match mode {
            ApplicationMode::Controller => Self {
                level: Level::INFO,
                color: false,
                show_timestamps: true,
                show_target: true,
                json_format: false,
                enable_spans: false,
                file_output: None,
            },
            ApplicationMode::Cli => Self::default(),
            ApplicationMode::Test => Self {
                level: Level::DEBUG,
                color: false,
                show_timestamps: true,
                show_target: true,
                json_format: false,
                enable_spans: true,
                file_output: None,
            },
        }
    }

    /// Create config from CLI arguments
    pub fn from_args(quiet: bool, verbose: bool, json: bool) -> Self {
        let level = if verbose {
            Level::DEBUG
        } else if quiet {
            Level::ERROR
        } else {
            Level::INFO
        };

        Self {
            level,
            color: !quiet && !json && io::stdout().is_terminal(),
            show_timestamps: true,
            show_target: verbose,
            json_format: json,
            enable_spans: verbose,
            file_output: None,
        }
    }
}

/// Application modes with different logging requirements
#[derive(Debug, Clone, Copy)]
pub enum ApplicationMode {
    /// Long-running controller daemon
    Controller,
    /// One-shot CLI commands
    Cli,
    /// Test mode - maximum detail
    Test,
}

/// Initialize the logging system
pub fn init_logging(config: LoggingConfig) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fleet_controller={}", config.level)));

    let registry = Registry::default().with(env_filter);

    let span_events = if config.enable_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if let Some(log_file) = config.file_output {
        let directory = log_file.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file path")
        })?;
        let file_name = log_file.file_name().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file name")
        })?;
        let file_appender = tracing_appender::rolling::daily(directory, file_name);

        if config.json_format {
            fmt::layer()
                .json()
                .with_current_span(config.enable_spans)
                .with_span_events(span_events)
                .with_writer(file_appender)
                .with_subscriber(registry)
                .init();
        } else {
            fmt::layer()
                .with_target(config.show_target)
                .with_ansi(false)
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_span_events(span_events)
                .with_writer(file_appender)
                .with_subscriber(registry)
                .init();
        }
    } else if config.json_format {
        fmt::layer()
            .json()
            .with_current_span(config.enable_spans)
            .with_span_events(span_events)
            .with_writer(io::stdout)
            .with_subscriber(registry)
            .init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_ansi(config.color)
            .with_span_events(span_events)
            .with_writer(io::stdout);

        if config.show_timestamps {
            fmt_layer
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_subscriber(registry)
                .init();
        } else {
            fmt_layer.without_time().with_subscriber(registry).init();
        }
    }

    Ok(())
}

/// Remove rotated log files (`<name>.YYYY-MM-DD`) older than `retention_days`.
///
/// Returns the number of files removed.
pub fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> io::Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let retention = std::time::Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    let now = std::time::SystemTime::now();
    let mut removed = 0;

    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !path.to_string_lossy().contains(".log.") {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        let expired = now
            .duration_since(modified)
            .map(|age| age > retention)
            .unwrap_or(false);

        if expired {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove old log file {}: {}", path.display(), e),
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, dir = %log_dir.display(), "Log cleanup completed");
    }

    Ok(removed)
}

/// Default log file for the controller daemon
pub fn log_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".fleet-controller")
            .join("logs")
            .join("controller.log")
    })
}

#[macro_export]
macro_rules! log_registry_operation {
    ($operation:expr, $key:expr) => {
        tracing::debug!(operation = $operation, key = %$key, "Registry operation")
    };
    ($operation:expr, $key:expr, $details:expr) => {
        tracing::debug!(
            operation = $operation,
            key = %$key,
            details = %$details,
            "Registry operation"
        )
    };
}

#[macro_export]
macro_rules! log_protocol_event {
    ($protocol:expr, $command:expr) => {
        tracing::trace!(protocol = $protocol, command = %$command, "Protocol event")
    };
    ($protocol:expr, $command:expr, $peer:expr) => {
        tracing::trace!(
            protocol = $protocol,
            command = %$command,
            peer = %$peer,
            "Protocol event"
        )
    };
}

/// Utility macro for structured error logging
#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Operation failed"
        )
    };
}
