// src/errors.rs

//! Crate-wide error types.
//!
//! [`WatchjobError`] covers everything that can fail before a job ever runs
//! (config loading, validation, watcher setup). Failures of running processes
//! live in [`crate::exec::ExecError`] and are only ever logged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchjobError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job '{job}': {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchjobError>;
