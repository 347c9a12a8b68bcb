// src/logging.rs

//! Logging setup for `watchjob` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag
//! 2. `--debug`
//! 3. `[config].severity`
//! 4. `WATCHJOB_LOG` environment variable (e.g. "info", "debug")
//! 5. default to `info`
//!
//! The first three are folded by [`crate::cli::CliArgs::effective_log_level`]
//! before [`init_logging`] is called.
//!
//! Logs are sent to STDERR so that stdout carries only job output.

use anyhow::{Result, anyhow};
use tracing::Level;
use tracing_subscriber::fmt;

use crate::types::LogLevel;

/// Name of the environment variable consulted when no level was requested.
pub const LOG_ENV_VAR: &str = "WATCHJOB_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(level: Option<LogLevel>) -> Result<()> {
    let level = resolve_level(level, std::env::var(LOG_ENV_VAR).ok().as_deref());

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

fn resolve_level(requested: Option<LogLevel>, env: Option<&str>) -> Level {
    requested
        .or_else(|| env.and_then(|s| s.parse().ok()))
        .map(level_from_log_level)
        .unwrap_or(Level::INFO)
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}
