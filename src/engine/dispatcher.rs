// src/engine/dispatcher.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::errors::Result;
use crate::exec::{Executor, JobReport};
use crate::job::{Job, JobName};
use crate::watch::JobMatcher;

use super::manager::JobManager;

#[derive(Debug)]
struct DispatchEntry {
    job: Arc<Job>,
    matcher: Option<JobMatcher>,
}

/// Entry point for "run job X" requests from startup and from the watcher.
///
/// Every trigger runs as its own Tokio task: register with the
/// [`JobManager`] (superseding any active run of that name), walk the job
/// tree with the [`Executor`], deregister.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    manager: JobManager,
    executor: Executor,
    jobs: Arc<BTreeMap<JobName, DispatchEntry>>,
}

impl Dispatcher {
    /// Build a dispatcher for every job in `cfg`. Watch roots are resolved
    /// against `cwd`.
    pub fn new(manager: JobManager, executor: Executor, cfg: &ConfigFile, cwd: &Path) -> Result<Self> {
        let mut jobs = BTreeMap::new();
        for (name, def) in &cfg.jobs {
            let matcher = def
                .trigger
                .as_ref()
                .map(|trigger| JobMatcher::new(trigger, cwd))
                .transpose()?;
            jobs.insert(
                name.clone(),
                DispatchEntry {
                    job: Arc::new(def.job.clone()),
                    matcher,
                },
            );
        }

        Ok(Self {
            manager,
            executor,
            jobs: Arc::new(jobs),
        })
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn job_names(&self) -> Vec<JobName> {
        self.jobs.keys().cloned().collect()
    }

    /// Run `job` under `name` in a new task.
    ///
    /// The returned handle resolves once the run finished (or was superseded
    /// and unwound). Dropping the handle does not stop the run.
    pub fn trigger(&self, name: &str, job: Arc<Job>) -> JoinHandle<JobReport> {
        let manager = self.manager.clone();
        let executor = self.executor.clone();
        let name = name.to_string();

        tokio::spawn(async move {
            info!(job = %name, "triggering job");
            let (token, guard) = manager.register(&name).await;
            let report = executor.run(&token, &name, &job).await;
            guard.deregister();
            report
        })
    }

    /// Trigger every configured job once (startup).
    pub fn trigger_all(&self) -> Vec<(JobName, JoinHandle<JobReport>)> {
        self.jobs
            .iter()
            .map(|(name, entry)| (name.clone(), self.trigger(name, Arc::clone(&entry.job))))
            .collect()
    }

    /// Trigger each job whose `on` block accepts at least one of `paths`.
    ///
    /// Each job is triggered at most once per call. Jobs without `on` never
    /// react to file changes.
    pub fn dispatch_paths(&self, paths: &[PathBuf]) -> Vec<(JobName, JoinHandle<JobReport>)> {
        let mut handles = Vec::new();
        for (name, entry) in self.jobs.iter() {
            let Some(matcher) = &entry.matcher else {
                debug!(job = %name, "skipping job: no `on` block");
                continue;
            };
            if !paths.iter().any(|p| matcher.matches(p)) {
                debug!(job = %name, "skipping job: no changed path matches");
                continue;
            }
            handles.push((name.clone(), self.trigger(name, Arc::clone(&entry.job))));
        }
        handles
    }

    /// Union of all watch roots; empty if no job has an `on` block.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .jobs
            .values()
            .filter_map(|entry| entry.matcher.as_ref())
            .flat_map(|m| m.roots().iter().cloned())
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }
}
