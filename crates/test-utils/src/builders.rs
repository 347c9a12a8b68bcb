#![allow(dead_code)]

use watchjob::job::{Action, EnvMap, Job};

/// A leaf job running `script` through `sh -c`.
pub fn sh(script: &str) -> Job {
    Job::command("sh", ["-c", script])
}

/// Builder for [`Job`] trees to simplify test setup.
#[derive(Debug, Default)]
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sh(script: &str) -> Self {
        Self { job: sh(script) }
    }

    pub fn series(children: Vec<Job>) -> Self {
        Self {
            job: Job::from_action(Action::Series(children)),
        }
    }

    pub fn parallel(children: Vec<Job>) -> Self {
        Self {
            job: Job::from_action(Action::Parallel(children)),
        }
    }

    pub fn before(mut self, job: Job) -> Self {
        self.job.before.push(job);
        self
    }

    pub fn after(mut self, job: Job) -> Self {
        self.job.after.push(job);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn envs(mut self, env: EnvMap) -> Self {
        self.job.env.extend(env);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}
