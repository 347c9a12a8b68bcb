// src/watch/watcher.rs

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigSection;
use crate::engine::Dispatcher;
use crate::errors::{Result, WatchjobError};

/// Knobs from `[config]` that shape the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub cooldown: Duration,
    pub batching: Duration,
    pub clear_cli: bool,
    pub buffer_size: usize,
}

impl From<&ConfigSection> for WatchOptions {
    fn from(cfg: &ConfigSection) -> Self {
        Self {
            cooldown: cfg.cooldown.get(),
            batching: cfg.batching_duration.get(),
            clear_cli: cfg.clear_cli,
            buffer_size: cfg.buffer_size.max(1),
        }
    }
}

/// Keeps the `notify` watcher alive. Dropping it stops file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish_non_exhaustive()
    }
}

impl WatcherHandle {
    /// Stop the watcher and wait for the event loop to exit.
    pub async fn shutdown(self) {
        let WatcherHandle { _inner, task } = self;
        drop(_inner);
        if let Err(err) = task.await {
            debug!(error = %err, "watch loop ended abnormally");
        }
    }
}

/// Watch `roots` recursively and dispatch changed paths until `token` is
/// cancelled.
///
/// Roots that cannot be watched are logged and skipped; it is an error only
/// if none of them can be watched.
pub fn spawn_watcher(
    roots: Vec<PathBuf>,
    dispatcher: Dispatcher,
    opts: WatchOptions,
    token: CancellationToken,
) -> Result<WatcherHandle> {
    let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(opts.buffer_size);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) || event.paths.is_empty() {
                    return;
                }
                match tx.try_send(event.paths) {
                    Ok(()) => {}
                    Err(TrySendError::Full(paths)) => {
                        warn!(?paths, "event buffer full; dropping change event");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            Err(err) => error!(error = %err, "watch error"),
        },
        Config::default(),
    )?;

    let mut watched = 0usize;
    for root in &roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                watched += 1;
                debug!(path = %root.display(), "watching path");
            }
            Err(err) => error!(path = %root.display(), error = %err, "failed to watch path"),
        }
    }
    if watched == 0 {
        return Err(WatchjobError::Config(format!(
            "none of the watch paths could be watched: {roots:?}"
        )));
    }
    info!(paths = watched, "file watcher started");

    let cwd = std::env::current_dir().ok();
    let task = tokio::spawn(event_loop(rx, dispatcher, opts, token, cwd));

    Ok(WatcherHandle {
        _inner: watcher,
        task,
    })
}

async fn event_loop(
    mut rx: mpsc::Receiver<Vec<PathBuf>>,
    dispatcher: Dispatcher,
    opts: WatchOptions,
    token: CancellationToken,
    cwd: Option<PathBuf>,
) {
    let mut last_seen: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let first = tokio::select! {
            _ = token.cancelled() => break,
            paths = rx.recv() => match paths {
                Some(paths) => paths,
                None => break,
            },
        };

        let mut batch: BTreeSet<PathBuf> = first.into_iter().collect();
        if !opts.batching.is_zero() {
            let deadline = Instant::now() + opts.batching;
            while let Ok(Some(paths)) = timeout_at(deadline, rx.recv()).await {
                batch.extend(paths);
            }
        }

        let now = Instant::now();
        last_seen.retain(|_, seen| now.duration_since(*seen) < opts.cooldown);
        let fresh: Vec<PathBuf> = batch
            .into_iter()
            .filter(|path| {
                if last_seen.contains_key(path) {
                    debug!(path = %path.display(), "change inside cooldown; ignored");
                    return false;
                }
                last_seen.insert(path.clone(), now);
                true
            })
            .collect();
        if fresh.is_empty() || token.is_cancelled() {
            continue;
        }

        if opts.clear_cli {
            clear_terminal().await;
        }
        for path in &fresh {
            info!(path = %display_path(cwd.as_deref(), path), "change detected");
        }
        dispatcher.dispatch_paths(&fresh);
    }

    debug!("watch loop ended");
}

fn display_path(cwd: Option<&Path>, path: &Path) -> String {
    cwd.and_then(|cwd| path.strip_prefix(cwd).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(not(windows))]
async fn clear_terminal() {
    use std::io::Write;

    let mut out = std::io::stdout().lock();
    let _ = out.write_all(b"\x1B[H\x1B[2J");
    let _ = out.flush();
}

#[cfg(windows)]
async fn clear_terminal() {
    let _ = tokio::process::Command::new("cmd")
        .args(["/c", "cls"])
        .status()
        .await;
}
