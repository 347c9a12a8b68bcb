// src/job.rs

//! The job tree: what a named job actually does when it runs.
//!
//! A [`Job`] carries no name of its own. The name belongs to the top-level
//! [`JobDefinition`] and is passed down explicitly by the execution engine,
//! so every process spawned anywhere in the tree is attributed to the
//! top-level job.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::PathBuf;

/// Canonical job name type.
pub type JobName = String;

/// Extra environment variables, merged over the inherited environment.
pub type EnvMap = BTreeMap<String, String>;

/// One program invocation: the program plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line using shell word rules.
    ///
    /// Returns `None` for blank input or unbalanced quotes.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = shlex::split(line)?.into_iter();
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The main action of a job node. At most one kind per node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    Command(CommandSpec),
    Series(Vec<Job>),
    Parallel(Vec<Job>),
}

/// A (possibly composite) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Job {
    pub action: Action,
    pub before: Vec<Job>,
    pub after: Vec<Job>,
    pub env: EnvMap,
}

impl Job {
    pub fn command<P, I, A>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self::from_action(Action::Command(CommandSpec::new(program, args)))
    }

    pub fn series(children: Vec<Job>) -> Self {
        Self::from_action(Action::Series(children))
    }

    pub fn parallel(children: Vec<Job>) -> Self {
        Self::from_action(Action::Parallel(children))
    }

    pub fn from_action(action: Action) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    pub fn with_before(mut self, job: Job) -> Self {
        self.before.push(job);
        self
    }

    pub fn with_after(mut self, job: Job) -> Self {
        self.after.push(job);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Multi-line, indented description of the tree (used by `--dry-run`).
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);

        for (key, value) in &self.env {
            let _ = writeln!(out, "{pad}env {key}={value}");
        }
        for job in &self.before {
            let _ = writeln!(out, "{pad}before:");
            job.describe_into(out, depth + 1);
        }
        match &self.action {
            Action::None => {}
            Action::Command(cmd) => {
                let _ = writeln!(out, "{pad}- {cmd}");
            }
            Action::Series(children) => {
                let _ = writeln!(out, "{pad}series:");
                for child in children {
                    child.describe_into(out, depth + 1);
                }
            }
            Action::Parallel(children) => {
                let _ = writeln!(out, "{pad}parallel:");
                for child in children {
                    child.describe_into(out, depth + 1);
                }
            }
        }
        for job in &self.after {
            let _ = writeln!(out, "{pad}after:");
            job.describe_into(out, depth + 1);
        }
    }
}

/// When a job should re-run: changes under `paths` whose path matches `regex`.
///
/// A `regex` entry starting with `!` excludes matching paths. An empty
/// `paths` list means "the working directory".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trigger {
    pub paths: Vec<PathBuf>,
    pub regex: Vec<String>,
}

/// A top-level, named job as loaded from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: JobName,
    pub job: Job,
    pub trigger: Option<Trigger>,
}
