// src/exec/engine.rs

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{Action, EnvMap, Job};
use crate::types::SeriesPolicy;

use super::process::ProcessRunner;

/// Terminal state of one job node.
///
/// There is deliberately no `Failed` state: a non-zero exit is counted in
/// [`JobReport::failures`] but the node still completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Cancelled,
}

/// Result of walking a job (sub)tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobReport {
    pub state: JobState,
    /// Leaf commands that failed to start or exited non-zero.
    pub failures: usize,
}

impl JobReport {
    fn completed() -> Self {
        Self {
            state: JobState::Completed,
            failures: 0,
        }
    }

    fn cancelled() -> Self {
        Self {
            state: JobState::Cancelled,
            failures: 0,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }

    /// Fold a child's report into this one. Any cancelled child makes the
    /// parent cancelled.
    fn absorb(&mut self, child: JobReport) {
        self.failures += child.failures;
        if child.is_cancelled() {
            self.state = JobState::Cancelled;
        }
    }
}

type BoxedRun<'a> = Pin<Box<dyn Future<Output = JobReport> + Send + 'a>>;

/// Interprets a [`Job`] tree and drives the [`ProcessRunner`].
///
/// Cheap to clone; parallel branches each get their own clone.
#[derive(Debug, Clone)]
pub struct Executor {
    runner: Arc<ProcessRunner>,
    series_policy: SeriesPolicy,
}

impl Executor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            series_policy: SeriesPolicy::default(),
        }
    }

    pub fn with_series_policy(mut self, policy: SeriesPolicy) -> Self {
        self.series_policy = policy;
        self
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Run `job` to completion under `token`, attributing every spawned
    /// process to `name`.
    pub async fn run(&self, token: &CancellationToken, name: &str, job: &Job) -> JobReport {
        let report = self.run_node(token, name, job, &EnvMap::new(), false).await;
        debug!(job = %name, state = ?report.state, failures = report.failures, "job tree finished");
        report
    }

    fn run_node<'a>(
        &'a self,
        token: &'a CancellationToken,
        name: &'a str,
        job: &'a Job,
        inherited: &'a EnvMap,
        in_parallel: bool,
    ) -> BoxedRun<'a> {
        Box::pin(async move {
            if token.is_cancelled() {
                return JobReport::cancelled();
            }

            let env = merge_env(inherited, &job.env);
            let mut report = JobReport::completed();

            report.absorb(self.run_hooks(token, name, &job.before, &env).await);
            if report.is_cancelled() {
                return report;
            }

            report.absorb(self.run_action(token, name, &job.action, &env, in_parallel).await);
            if report.is_cancelled() {
                return report;
            }

            report.absorb(self.run_hooks(token, name, &job.after, &env).await);
            report
        })
    }

    /// `before` / `after` lists: strictly in order, each child gated on the
    /// token. Failures never stop a hook list.
    async fn run_hooks(
        &self,
        token: &CancellationToken,
        name: &str,
        hooks: &[Job],
        env: &EnvMap,
    ) -> JobReport {
        let mut report = JobReport::completed();
        for hook in hooks {
            if token.is_cancelled() {
                return JobReport {
                    state: JobState::Cancelled,
                    ..report
                };
            }
            report.absorb(self.run_node(token, name, hook, env, false).await);
        }
        report
    }

    async fn run_action(
        &self,
        token: &CancellationToken,
        name: &str,
        action: &Action,
        env: &EnvMap,
        in_parallel: bool,
    ) -> JobReport {
        match action {
            Action::None => JobReport::completed(),
            Action::Command(command) => {
                let outcome = self.runner.run(token, name, command, env, in_parallel).await;
                JobReport {
                    state: if outcome.is_cancelled() {
                        JobState::Cancelled
                    } else {
                        JobState::Completed
                    },
                    failures: usize::from(outcome.is_failure()),
                }
            }
            Action::Series(children) => self.run_series(token, name, children, env).await,
            Action::Parallel(children) => self.run_parallel(token, name, children, env).await,
        }
    }

    async fn run_series(
        &self,
        token: &CancellationToken,
        name: &str,
        children: &[Job],
        env: &EnvMap,
    ) -> JobReport {
        let mut report = JobReport::completed();
        for (idx, child) in children.iter().enumerate() {
            if token.is_cancelled() {
                return JobReport {
                    state: JobState::Cancelled,
                    ..report
                };
            }

            let child_report = self.run_node(token, name, child, env, false).await;
            let failed = child_report.failures > 0;
            report.absorb(child_report);

            if failed && self.series_policy == SeriesPolicy::StopOnFailure {
                let skipped = children.len() - idx - 1;
                if skipped > 0 {
                    warn!(job = %name, skipped, "series step failed; skipping the rest of the chain");
                }
                break;
            }
        }
        report
    }

    async fn run_parallel(
        &self,
        token: &CancellationToken,
        name: &str,
        children: &[Job],
        env: &EnvMap,
    ) -> JobReport {
        info!(job = %name, branches = %branch_summary(children), "running in parallel");

        let mut set = JoinSet::new();
        for child in children {
            let executor = self.clone();
            let token = token.clone();
            let name = name.to_string();
            let child = child.clone();
            let env = env.clone();
            set.spawn(async move { executor.run_node(&token, &name, &child, &env, true).await });
        }

        let mut report = JobReport::completed();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(branch) => report.absorb(branch),
                Err(err) => {
                    warn!(job = %name, error = %err, "parallel branch task failed");
                    report.failures += 1;
                }
            }
        }
        report
    }
}

/// Child entries win over inherited ones.
fn merge_env<'a>(inherited: &'a EnvMap, own: &EnvMap) -> Cow<'a, EnvMap> {
    if own.is_empty() {
        return Cow::Borrowed(inherited);
    }
    let mut merged = inherited.clone();
    merged.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
    Cow::Owned(merged)
}

fn branch_summary(children: &[Job]) -> String {
    children
        .iter()
        .map(|child| match &child.action {
            Action::Command(cmd) => cmd.to_string(),
            Action::Series(_) => "<series>".to_string(),
            Action::Parallel(_) => "<parallel>".to_string(),
            Action::None => "<hooks>".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
