// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`registry`] tracks live OS processes per job name and can kill a job's
//!   whole process groups.
//! - [`kill`] holds the platform-specific process-tree kill.
//! - [`process`] spawns one command, streams its output and reports how it
//!   ended.
//! - [`engine`] walks a [`crate::job::Job`] tree (`before`, `series`,
//!   `parallel`, `after`) and drives the process runner.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

pub mod engine;
pub mod kill;
pub mod process;
pub mod registry;

pub use engine::{Executor, JobReport, JobState};
pub use kill::kill_process_tree;
pub use process::{OutputSink, ProcessRunner};
pub use registry::{ProcessHandle, ProcessRegistry};

/// Ways a single process can fail. None of these are ever escalated past
/// logging; they are carried in [`ProcessOutcome`] for callers that care.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with {status}")]
    Exit { status: ExitStatus },

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to kill process tree of pid {pid}: {reason}")]
    Kill { pid: u32, reason: String },
}

/// How one command invocation ended.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Exited with status zero.
    Succeeded { elapsed: Duration },
    /// Ran, but exited non-zero (or waiting on it failed).
    Failed { elapsed: Duration, error: ExecError },
    /// Terminated because its cancellation token fired. Not an error.
    Cancelled { elapsed: Duration },
    /// The OS refused to start the process.
    NotStarted { error: ExecError },
}

impl ProcessOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::NotStarted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Succeeded { elapsed }
            | Self::Failed { elapsed, .. }
            | Self::Cancelled { elapsed } => Some(*elapsed),
            Self::NotStarted { .. } => None,
        }
    }
}
