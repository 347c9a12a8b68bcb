// src/config/validate.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

use crate::config::model::{ConfigFile, ConfigSection, JobSpec, JobTable, RawConfigFile, TriggerSpec};
use crate::errors::{Result, WatchjobError};
use crate::job::{Action, CommandSpec, Job, JobDefinition, Trigger};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WatchjobError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_global_config(&raw.config)?;
        ensure_has_jobs(&raw)?;

        let mut jobs = BTreeMap::new();
        for (name, spec) in raw.job {
            let definition = definition_from_spec(&name, spec)?;
            jobs.insert(name, definition);
        }

        Ok(ConfigFile::new_unchecked(raw.config, jobs))
    }
}

/// Validate `raw` with `cli` added as an extra job, replacing any file job
/// of the same name. `raw` may contain no jobs of its own.
pub fn merge_cli_job(raw: RawConfigFile, cli: JobDefinition) -> Result<ConfigFile> {
    validate_global_config(&raw.config)?;

    let mut jobs = BTreeMap::new();
    for (name, spec) in raw.job {
        if name == cli.name {
            continue;
        }
        let definition = definition_from_spec(&name, spec)?;
        jobs.insert(name, definition);
    }
    jobs.insert(cli.name.clone(), cli);

    Ok(ConfigFile::new_unchecked(raw.config, jobs))
}

fn validate_global_config(cfg: &ConfigSection) -> Result<()> {
    if cfg.buffer_size == 0 {
        return Err(WatchjobError::Config(
            "[config].buffer_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(WatchjobError::Config(
            "config must contain at least one [job.<name>] entry".to_string(),
        ));
    }
    Ok(())
}

/// Convert one top-level `[job.<name>]` entry into a validated definition.
///
/// All structural rules are enforced here, before any job can reach the
/// execution engine:
/// - at most one of `cmd`, `series`, `parallel` per node
/// - command lines must split into at least a program
/// - `on` only on the top-level node, with compilable regexes
pub fn definition_from_spec(name: &str, spec: JobSpec) -> Result<JobDefinition> {
    if name.trim().is_empty() {
        return Err(invalid(name, "job names must not be empty"));
    }

    let (spec, trigger) = match spec {
        JobSpec::Table(mut table) => {
            let on = table.on.take();
            (JobSpec::Table(table), on)
        }
        shorthand => (shorthand, None),
    };

    let trigger = trigger
        .map(|on| trigger_from_spec(name, on))
        .transpose()?;

    Ok(JobDefinition {
        name: name.to_string(),
        job: job_from_spec(name, spec)?,
        trigger,
    })
}

fn job_from_spec(path: &str, spec: JobSpec) -> Result<Job> {
    let table = match spec {
        JobSpec::Shorthand(line) => {
            return Ok(Job::from_action(Action::Command(parse_command_line(path, &line)?)));
        }
        JobSpec::Table(table) => table,
    };

    if table.on.is_some() {
        return Err(invalid(path, "`on` is only allowed on top-level jobs"));
    }

    let JobTable {
        cmd,
        params,
        env,
        series,
        parallel,
        before,
        after,
        ..
    } = table;

    let cmd = cmd.filter(|c| !c.trim().is_empty());
    let kinds = [cmd.is_some(), !series.is_empty(), !parallel.is_empty()]
        .into_iter()
        .filter(|populated| *populated)
        .count();
    if kinds > 1 {
        return Err(invalid(
            path,
            "a job can only contain one of `cmd`, `series`, or `parallel`",
        ));
    }
    if cmd.is_none() && !params.is_empty() {
        return Err(invalid(path, "`params` requires `cmd`"));
    }

    let action = if let Some(cmd) = cmd {
        if params.is_empty() {
            Action::Command(parse_command_line(path, &cmd)?)
        } else {
            Action::Command(CommandSpec::new(cmd, params))
        }
    } else if !series.is_empty() {
        Action::Series(children_from_specs(path, "series", series)?)
    } else if !parallel.is_empty() {
        Action::Parallel(children_from_specs(path, "parallel", parallel)?)
    } else {
        Action::None
    };

    Ok(Job {
        action,
        before: children_from_specs(path, "before", before)?,
        after: children_from_specs(path, "after", after)?,
        env,
    })
}

fn children_from_specs(path: &str, key: &str, specs: Vec<JobSpec>) -> Result<Vec<Job>> {
    specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| job_from_spec(&format!("{path}.{key}[{i}]"), spec))
        .collect()
}

fn parse_command_line(path: &str, line: &str) -> Result<CommandSpec> {
    CommandSpec::parse(line).ok_or_else(|| {
        invalid(
            path,
            &format!("command '{line}' is empty or has unbalanced quotes"),
        )
    })
}

fn trigger_from_spec(path: &str, on: TriggerSpec) -> Result<Trigger> {
    for rx in &on.regex {
        let pattern = rx.strip_prefix('!').unwrap_or(rx);
        Regex::new(pattern)
            .map_err(|e| invalid(path, &format!("invalid regex '{rx}' in `on.regex`: {e}")))?;
    }

    Ok(Trigger {
        paths: on.paths.into_iter().map(PathBuf::from).collect(),
        regex: on.regex,
    })
}

fn invalid(path: &str, reason: &str) -> WatchjobError {
    WatchjobError::InvalidJob {
        job: path.to_string(),
        reason: reason.to_string(),
    }
}

impl From<&ConfigFile> for RawConfigFile {
    fn from(cfg: &ConfigFile) -> Self {
        let job = cfg
            .jobs
            .iter()
            .map(|(name, def)| (name.clone(), spec_from_job(&def.job, def.trigger.as_ref())))
            .collect();

        RawConfigFile {
            config: cfg.config.clone(),
            job,
        }
    }
}

fn spec_from_job(job: &Job, trigger: Option<&Trigger>) -> JobSpec {
    let bare = job.before.is_empty() && job.after.is_empty() && job.env.is_empty() && trigger.is_none();
    if let (true, Action::Command(cmd)) = (bare, &job.action) {
        let words = std::iter::once(cmd.program.as_str()).chain(cmd.args.iter().map(String::as_str));
        if let Ok(line) = shlex::try_join(words) {
            return JobSpec::Shorthand(line);
        }
    }

    let mut table = JobTable {
        env: job.env.clone(),
        on: trigger.map(|t| TriggerSpec {
            paths: t.paths.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            regex: t.regex.clone(),
        }),
        before: job.before.iter().map(|j| spec_from_job(j, None)).collect(),
        after: job.after.iter().map(|j| spec_from_job(j, None)).collect(),
        ..JobTable::default()
    };

    match &job.action {
        Action::None => {}
        Action::Command(cmd) => {
            table.cmd = Some(cmd.program.clone());
            table.params = cmd.args.clone();
        }
        Action::Series(children) => {
            table.series = children.iter().map(|j| spec_from_job(j, None)).collect();
        }
        Action::Parallel(children) => {
            table.parallel = children.iter().map(|j| spec_from_job(j, None)).collect();
        }
    }

    JobSpec::Table(table)
}
