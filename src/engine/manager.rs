// src/engine/manager.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::ProcessRegistry;
use crate::job::JobName;

/// The active run of one job name.
#[derive(Debug)]
struct RunInstance {
    token: CancellationToken,
    id: u64,
}

#[derive(Debug, Default)]
struct ManagerState {
    active: HashMap<JobName, RunInstance>,
    next_id: u64,
    /// Set by [`JobManager::stop_all`]; later registrations come back
    /// already cancelled.
    shutting_down: bool,
}

/// Arbitrates "start new run / stop old run" per job name.
///
/// At most one [`RunInstance`] exists per name. Registering a name that is
/// already running cancels the old run and waits until all of its processes
/// are reaped before the new run is admitted. After [`JobManager::stop_all`]
/// every registration is handed an already-cancelled token.
#[derive(Debug, Clone)]
pub struct JobManager {
    state: Arc<Mutex<ManagerState>>,
    registry: ProcessRegistry,
}

impl JobManager {
    pub fn new(registry: ProcessRegistry) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState::default())),
            registry,
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a new run of `name`, superseding any run already active.
    pub async fn register(&self, name: &str) -> (CancellationToken, Deregister) {
        self.admit(name, None).await
    }

    /// Like [`Self::register`], but the run's token is a child of `parent`,
    /// so cancelling `parent` (e.g. a deadline) also ends this run.
    pub async fn register_with_parent(
        &self,
        name: &str,
        parent: &CancellationToken,
    ) -> (CancellationToken, Deregister) {
        self.admit(name, Some(parent)).await
    }

    async fn admit(
        &self,
        name: &str,
        parent: Option<&CancellationToken>,
    ) -> (CancellationToken, Deregister) {
        let previous = self
            .lock()
            .active
            .get(name)
            .map(|run| (run.token.clone(), run.id));

        if let Some((token, id)) = previous {
            info!(job = %name, previous_id = id, "superseding running job");
            token.cancel();
            self.registry.kill_and_wait(name).await;
            debug!(job = %name, previous_id = id, "previous run torn down");
        }

        let token = match parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };

        let (id, displaced) = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            if state.shutting_down {
                drop(state);
                debug!(job = %name, id, "manager stopped; registration comes back cancelled");
                token.cancel();
                (id, None)
            } else {
                let displaced = state.active.insert(
                    name.to_string(),
                    RunInstance {
                        token: token.clone(),
                        id,
                    },
                );
                (id, displaced)
            }
        };

        // A concurrent register for the same name got in between our
        // teardown and this insert; it loses, and whatever it already
        // spawned is reaped before this run is admitted.
        if let Some(displaced) = displaced {
            debug!(job = %name, displaced_id = displaced.id, "displacing concurrent registration");
            displaced.token.cancel();
            self.registry.kill_and_wait(name).await;
        }

        debug!(job = %name, id, "job registered");
        let guard = Deregister {
            state: Arc::clone(&self.state),
            name: name.to_string(),
            id,
            done: false,
        };
        (token, guard)
    }

    /// Cancel every active run and wait until all of their processes are
    /// reaped. Safe to call with nothing registered, and more than once.
    ///
    /// The manager stays shut down afterwards: a trigger racing this call
    /// gets a cancelled token and spawns nothing.
    pub async fn stop_all(&self) {
        let names: Vec<JobName> = {
            let mut state = self.lock();
            state.shutting_down = true;
            state
                .active
                .drain()
                .map(|(name, run)| {
                    run.token.cancel();
                    name
                })
                .collect()
        };

        if names.is_empty() {
            debug!("stop_all: no active jobs");
            return;
        }
        info!(count = names.len(), "stopping all jobs");

        let mut set = JoinSet::new();
        for name in names {
            let registry = self.registry.clone();
            set.spawn(async move { registry.kill_and_wait(&name).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "process teardown task failed");
            }
        }
        info!("all jobs stopped");
    }

    /// Id of the run currently registered for `name`, if any.
    pub fn active_instance(&self, name: &str) -> Option<u64> {
        self.lock().active.get(name).map(|run| run.id)
    }

    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}

/// Removes a run's bookkeeping entry, but only while it is still the
/// current entry for its name. Dropping it has the same effect as
/// calling [`Deregister::deregister`].
#[must_use = "dropping the guard deregisters the run immediately"]
#[derive(Debug)]
pub struct Deregister {
    state: Arc<Mutex<ManagerState>>,
    name: JobName,
    id: u64,
    done: bool,
}

impl Deregister {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deregister(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.active.get(&self.name) {
            Some(run) if run.id == self.id => {
                state.active.remove(&self.name);
                debug!(job = %self.name, id = self.id, "job deregistered");
            }
            _ => debug!(job = %self.name, id = self.id, "stale deregister ignored"),
        }
    }
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.release();
    }
}
