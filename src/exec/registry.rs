// src/exec/registry.rs

//! Live OS processes, keyed by the name of the job that spawned them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::job::JobName;

use super::ExecError;

/// One process group spawned by the [`super::ProcessRunner`].
///
/// Shared between the runner (which owns the `Child` and reaps it) and the
/// registry (which may kill it). A handle is registered before the spawn and
/// released only after the leader was reaped and its output pipes closed, so
/// background descendants keep it alive. [`ProcessRegistry::kill_and_wait`]
/// waits for that release.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: OnceLock<u32>,
    command: String,
    /// Held while signalling and while releasing; `true` once released.
    released: Mutex<bool>,
    phase: watch::Sender<Phase>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Running,
    Exited,
}

impl ProcessHandle {
    pub fn new(pid: Option<u32>, command: impl Into<String>) -> Arc<Self> {
        let (phase, _) = watch::channel(Phase::Pending);
        let handle = Self {
            pid: OnceLock::new(),
            command: command.into(),
            released: Mutex::new(false),
            phase,
        };
        if let Some(pid) = pid {
            handle.set_pid(pid);
        }
        Arc::new(handle)
    }

    /// Record the pid once the spawn succeeded. Later calls are ignored.
    pub fn set_pid(&self, pid: u32) {
        if self.pid.set(pid).is_ok() {
            self.phase.send_if_modified(|phase| {
                let pending = *phase == Phase::Pending;
                if pending {
                    *phase = Phase::Running;
                }
                pending
            });
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn has_exited(&self) -> bool {
        *self.phase.borrow() == Phase::Exited
    }

    fn lock_released(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the group as gone. Idempotent. Once this returns, no signal is
    /// sent through this handle anymore.
    pub fn mark_exited(&self) {
        *self.lock_released() = true;
        self.phase.send_replace(Phase::Exited);
    }

    /// Resolve once [`Self::mark_exited`] has been called.
    pub async fn wait_exited(&self) {
        self.wait_phase(|phase| phase == Phase::Exited).await;
    }

    /// Resolve once the spawn either produced a pid or gave up.
    pub async fn wait_spawned(&self) {
        self.wait_phase(|phase| phase != Phase::Pending).await;
    }

    async fn wait_phase(&self, done: impl Fn(Phase) -> bool) {
        let mut rx = self.phase.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|phase| done(*phase)).await;
    }

    /// SIGKILL the process group, unless the handle was already released or
    /// never got a pid. Returns whether a signal was sent.
    ///
    /// The signal goes out under the same lock [`Self::mark_exited`] takes,
    /// so a released (and possibly recycled) group id is never signalled.
    #[cfg(unix)]
    pub fn signal_group(&self) -> Result<bool, ExecError> {
        let released = self.lock_released();
        let Some(pid) = self.pid() else {
            return Ok(false);
        };
        if *released {
            return Ok(false);
        }
        super::kill::signal_process_group(pid)?;
        Ok(true)
    }

    /// Kill the whole process tree behind this handle. See
    /// [`Self::signal_group`] for the Unix semantics.
    pub async fn kill_tree(&self) -> Result<bool, ExecError> {
        #[cfg(unix)]
        return self.signal_group();

        #[cfg(not(unix))]
        {
            let Some(pid) = self.pid() else {
                return Ok(false);
            };
            if self.has_exited() {
                return Ok(false);
            }
            super::kill::kill_process_tree(pid).await.map(|()| true)
        }
    }
}

/// Registry of live process handles per job name.
///
/// Cheap to clone; all clones share one table. The lock is only ever held
/// for the map mutation itself, never across a kill or a wait.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<JobName, Vec<Arc<ProcessHandle>>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobName, Vec<Arc<ProcessHandle>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `handle` under `name`. Anonymous jobs (empty name) are never
    /// tracked.
    pub fn register(&self, name: &str, handle: Arc<ProcessHandle>) {
        if name.is_empty() {
            return;
        }
        self.lock().entry(name.to_string()).or_default().push(handle);
    }

    /// Remove exactly this handle (by identity). Other handles for the same
    /// name stay. A no-op if a concurrent `kill_and_wait` already took it.
    pub fn unregister(&self, name: &str, handle: &Arc<ProcessHandle>) {
        if name.is_empty() {
            return;
        }
        let mut map = self.lock();
        if let Some(handles) = map.get_mut(name) {
            handles.retain(|h| !Arc::ptr_eq(h, handle));
            if handles.is_empty() {
                map.remove(name);
            }
        }
    }

    /// Snapshot of the handles currently tracked for `name`.
    pub fn handles(&self, name: &str) -> Vec<Arc<ProcessHandle>> {
        self.lock().get(name).cloned().unwrap_or_default()
    }

    pub fn len(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every handle tracked for `name`, kill each one's process tree and
    /// wait until the runner released it (leader reaped, pipes closed).
    ///
    /// A handle registered ahead of its spawn is first waited on until the
    /// spawn resolved, then signalled like any other.
    ///
    /// Kill failures are logged and skipped; the remaining handles are still
    /// attempted.
    pub async fn kill_and_wait(&self, name: &str) {
        let handles = self.lock().remove(name).unwrap_or_default();
        if handles.is_empty() {
            return;
        }
        debug!(job = %name, count = handles.len(), "removed job from process registry");

        for handle in handles {
            if handle.pid().is_none() && !handle.has_exited() {
                debug!(job = %name, cmd = %handle.command(), "process not spawned yet");
                handle.wait_spawned().await;
            }
            match handle.kill_tree().await {
                Ok(true) => {
                    info!(job = %name, pid = ?handle.pid(), cmd = %handle.command(), "stopped process group");
                }
                Ok(false) => continue,
                Err(err) => {
                    warn!(job = %name, pid = ?handle.pid(), error = %err, "failed to stop process");
                }
            }

            handle.wait_exited().await;
            debug!(job = %name, pid = ?handle.pid(), "process reaped");
        }
    }
}
