// src/exec/process.rs

//! Single-command process runner.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{CommandSpec, EnvMap};

use super::registry::{ProcessHandle, ProcessRegistry};
use super::{ExecError, ProcessOutcome};

/// Where a child's stdout/stderr end up.
///
/// Both pipes are always drained, by two independent tasks, so a chatty
/// process can never block on a full pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSink {
    /// Copy to this process's stdout / stderr.
    #[default]
    Inherit,
    /// Read and drop.
    Discard,
}

/// Spawns commands, tracks them in the [`ProcessRegistry`] while they live,
/// and reports how they ended.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    registry: ProcessRegistry,
    output: OutputSink,
}

/// How long the output pipes may stay open after the group was killed on
/// cancellation. Only a descendant that left the process group can hold
/// them that long.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Keeps a handle registered from before the spawn until the leader is
/// reaped and both output pipes are closed. Dropping it marks the handle
/// as exited and unregisters it, so nobody waits on it forever; if the
/// runner future is dropped before [`Registration::complete`], the group is
/// killed first.
struct Registration<'a> {
    registry: &'a ProcessRegistry,
    name: &'a str,
    handle: Arc<ProcessHandle>,
    completed: bool,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a ProcessRegistry, name: &'a str, handle: Arc<ProcessHandle>) -> Self {
        registry.register(name, Arc::clone(&handle));
        Self {
            registry,
            name,
            handle,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.completed {
            abandon(self.name, &self.handle);
        }
        self.handle.mark_exited();
        self.registry.unregister(self.name, &self.handle);
    }
}

#[cfg(unix)]
fn abandon(name: &str, handle: &ProcessHandle) {
    if let Err(err) = handle.signal_group() {
        debug!(job = %name, error = %err, "group kill on abandoned run failed");
    }
}

#[cfg(not(unix))]
fn abandon(name: &str, handle: &ProcessHandle) {
    debug!(job = %name, pid = ?handle.pid(), "run abandoned; direct child is killed on drop");
}

impl ProcessRunner {
    pub fn new(registry: ProcessRegistry) -> Self {
        Self {
            registry,
            output: OutputSink::Inherit,
        }
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Run `command` to completion under `name`.
    ///
    /// - `env` is merged over the inherited environment.
    /// - The child leads its own process group; when `token` fires, the whole
    ///   group is killed and the outcome is [`ProcessOutcome::Cancelled`].
    /// - The run is over once the leader exited *and* its stdout/stderr are
    ///   closed. Until then the group stays in the registry, so background
    ///   descendants are still reachable by `kill_and_wait`.
    /// - `in_parallel` only demotes the "running cmd" log line, since the
    ///   parallel node already announced its branches.
    pub async fn run(
        &self,
        token: &CancellationToken,
        name: &str,
        command: &CommandSpec,
        env: &EnvMap,
        in_parallel: bool,
    ) -> ProcessOutcome {
        let cmd_line = command.to_string();

        // Registered before the spawn: a concurrent `kill_and_wait` either
        // finds this handle or runs before it, when the token is already
        // cancelled and nothing gets spawned.
        let handle = ProcessHandle::new(None, cmd_line.clone());
        let registration = Registration::new(&self.registry, name, Arc::clone(&handle));
        if token.is_cancelled() {
            debug!(job = %name, cmd = %cmd_line, "cancelled before start");
            registration.complete();
            return ProcessOutcome::Cancelled {
                elapsed: Duration::ZERO,
            };
        }

        if in_parallel {
            debug!(job = %name, cmd = %cmd_line, "running cmd");
        } else {
            info!(job = %name, cmd = %cmd_line, "running cmd");
        }

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                registration.complete();
                let error = ExecError::Spawn {
                    program: command.program.clone(),
                    source,
                };
                if !token.is_cancelled() {
                    error!(job = %name, cmd = %cmd_line, error = %error, "failed to start cmd");
                }
                return ProcessOutcome::NotStarted { error };
            }
        };

        if let Some(pid) = child.id() {
            handle.set_pid(pid);
        }
        debug!(job = %name, pid = ?handle.pid(), "started new process");

        let drains: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| spawn_drain(out, self.output, Stream::Stdout)),
            child
                .stderr
                .take()
                .map(|err| spawn_drain(err, self.output, Stream::Stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(job = %name, pid = ?handle.pid(), "cancellation requested; killing process group");
                if let Err(err) = handle.kill_tree().await {
                    debug!(job = %name, error = %err, "group kill failed; killing direct child");
                    if let Err(err) = child.start_kill() {
                        warn!(job = %name, error = %err, "failed to kill child process");
                    }
                }
                if let Err(err) = child.wait().await {
                    warn!(job = %name, error = %err, "failed to reap cancelled process");
                }
                None
            }

            status = child.wait() => Some(status),
        };

        let group_killed = status.is_none();
        let drained = drain_until_closed(token, name, &handle, drains, group_killed).await;
        let elapsed = started.elapsed();
        registration.complete();

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match status {
            None => {
                debug!(job = %name, cmd = %cmd_line, elapsed_ms, "cmd cancelled");
                ProcessOutcome::Cancelled { elapsed }
            }
            Some(result) if drained == Drained::Cancelled => {
                debug!(job = %name, cmd = %cmd_line, ?result, "descendants cancelled after cmd exited");
                ProcessOutcome::Cancelled { elapsed }
            }
            Some(Ok(status)) if status.success() => {
                info!(job = %name, cmd = %cmd_line, elapsed_ms, "cmd succeeded");
                ProcessOutcome::Succeeded { elapsed }
            }
            Some(result) if token.is_cancelled() => {
                debug!(job = %name, cmd = %cmd_line, ?result, "cmd ended after cancellation");
                ProcessOutcome::Cancelled { elapsed }
            }
            Some(result) => {
                let error = match result {
                    Ok(status) => ExecError::Exit { status },
                    Err(err) => ExecError::Wait(err),
                };
                error!(job = %name, cmd = %cmd_line, elapsed_ms, error = %error, "cmd failed");
                ProcessOutcome::Failed { elapsed, error }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    Closed,
    Cancelled,
}

/// Wait until both output pipes hit EOF. Descendants that outlive the
/// leader keep them open; if `token` fires meanwhile, the group is killed
/// (unless `group_killed`) and the pipes get [`DRAIN_GRACE`] to close before
/// the drains are aborted.
async fn drain_until_closed(
    token: &CancellationToken,
    name: &str,
    handle: &ProcessHandle,
    drains: Vec<JoinHandle<()>>,
    group_killed: bool,
) -> Drained {
    let aborts: Vec<AbortHandle> = drains.iter().map(JoinHandle::abort_handle).collect();
    let all = async {
        for drain in drains {
            if let Err(err) = drain.await {
                if !err.is_cancelled() {
                    debug!(job = %name, error = %err, "output drain task failed");
                }
            }
        }
    };
    tokio::pin!(all);

    tokio::select! {
        biased;

        () = &mut all => return Drained::Closed,
        () = token.cancelled() => {}
    }

    if !group_killed {
        debug!(job = %name, pid = ?handle.pid(), "output still open after cancellation; killing process group");
        if let Err(err) = handle.kill_tree().await {
            debug!(job = %name, error = %err, "group kill failed");
        }
    }
    if tokio::time::timeout(DRAIN_GRACE, &mut all).await.is_err() {
        warn!(job = %name, pid = ?handle.pid(), "output pipes still open after group kill; abandoning them");
        for abort in aborts {
            abort.abort();
        }
    }
    Drained::Cancelled
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_drain<R>(reader: R, sink: OutputSink, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match (sink, stream) {
            (OutputSink::Inherit, Stream::Stdout) => forward(reader, tokio::io::stdout()).await,
            (OutputSink::Inherit, Stream::Stderr) => forward(reader, tokio::io::stderr()).await,
            (OutputSink::Discard, _) => forward(reader, tokio::io::sink()).await,
        }
    })
}

async fn forward<R, W>(mut reader: R, mut writer: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(err) = tokio::io::copy(&mut reader, &mut writer).await {
        debug!(error = %err, "output stream closed with error");
    }
}
