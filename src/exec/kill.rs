// src/exec/kill.rs

//! Forced termination of a process together with everything it spawned.
//!
//! Every child is started as the leader of its own process group (see
//! [`crate::exec::process`]), so on Unix the group id equals the child's pid
//! and a single `killpg` reaches shells, wrappers and their descendants. On
//! Windows `taskkill /T` walks the process tree instead.

use super::ExecError;

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
pub async fn kill_process_tree(pid: u32) -> Result<(), ExecError> {
    signal_process_group(pid)
}

/// Synchronous `killpg(pid, SIGKILL)`, usable while holding a lock or from
/// `Drop`.
#[cfg(unix)]
pub fn signal_process_group(pid: u32) -> Result<(), ExecError> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ExecError::Kill {
        pid,
        reason: "pid does not fit a process group id".to_string(),
    })?;

    killpg(Pid::from_raw(raw), Signal::SIGKILL).map_err(|errno| ExecError::Kill {
        pid,
        reason: errno.to_string(),
    })
}

/// Force-kill `pid` and its whole process tree.
#[cfg(not(unix))]
pub async fn kill_process_tree(pid: u32) -> Result<(), ExecError> {
    use std::process::Stdio;

    let status = tokio::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| ExecError::Kill {
            pid,
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(ExecError::Kill {
            pid,
            reason: format!("taskkill exited with {status}"),
        })
    }
}
