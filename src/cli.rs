// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::errors::{Result, WatchjobError};
use crate::job::{Action, CommandSpec, EnvMap, Job, Trigger};
use crate::types::LogLevel;

/// Name of the job built from command-line commands.
pub const CLI_JOB_NAME: &str = "default";

/// Watch patterns used in CLI mode when `--regex` is not given.
pub const DEFAULT_REGEX: &[&str] = &[r".*\.rs$", r"^Cargo\.toml$", r"^Cargo\.lock$"];

/// Command-line arguments for `watchjob`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchjob",
    version,
    about = "Re-run trees of commands when files change, killing superseded runs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Watchjob.toml")]
    pub config: String,

    /// Command to run; repeat to run several commands in series.
    #[arg(short = 'c', long = "cmd", value_name = "CMD")]
    pub cmd: Vec<String>,

    /// Path to watch in CLI mode (default: current directory).
    #[arg(short, long, value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Comma-separated regex filters in CLI mode; prefix with `!` to exclude.
    #[arg(short, long, value_name = "REGEX")]
    pub regex: Option<String>,

    /// Comma-separated environment variables, e.g. `RUST_LOG=debug,FOO=1`.
    #[arg(short, long, value_name = "K=V,...")]
    pub env: Option<String>,

    /// Write the effective configuration to `--config` and exit.
    #[arg(short, long)]
    pub save: bool,

    /// Shorthand for `--log-level debug`.
    #[arg(short, long)]
    pub debug: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `--debug`, `[config].severity` or `WATCHJOB_LOG` decide.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Run every job once, wait for all of them and exit. No watching.
    #[arg(long)]
    pub once: bool,

    /// Load and validate the configuration, print the job trees, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Command and arguments to run (alternative to `--cmd`).
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl CliArgs {
    /// True if commands were given on the command line.
    pub fn has_command(&self) -> bool {
        !self.cmd.is_empty() || !self.command.is_empty()
    }

    /// Level requested on the command line, falling back to `config_level`.
    pub fn effective_log_level(&self, config_level: Option<LogLevel>) -> Option<LogLevel> {
        self.log_level
            .or(self.debug.then_some(LogLevel::Debug))
            .or(config_level)
    }

    /// Build the `default` job from command-line commands.
    ///
    /// `--cmd` wins over positional arguments. Every command becomes one step
    /// of a series; the trigger watches `--path` (or `cwd`) filtered by
    /// `--regex` (or [`DEFAULT_REGEX`]).
    pub fn cli_job(&self, cwd: &Path) -> Result<Option<(Job, Trigger)>> {
        let lines: Vec<String> = if !self.cmd.is_empty() {
            self.cmd.clone()
        } else if !self.command.is_empty() {
            let words = self.command.iter().map(String::as_str);
            vec![shlex::try_join(words).map_err(|e| {
                WatchjobError::Config(format!("cannot quote command arguments: {e}"))
            })?]
        } else {
            return Ok(None);
        };

        let mut steps = Vec::with_capacity(lines.len());
        for line in &lines {
            let cmd = CommandSpec::parse(line).ok_or_else(|| {
                WatchjobError::Config(format!("command '{line}' is empty or has unbalanced quotes"))
            })?;
            steps.push(Job::from_action(Action::Command(cmd)));
        }

        let mut job = Job::series(steps);
        if let Some(env) = &self.env {
            job.env = parse_env(env)?;
        }

        let trigger = Trigger {
            paths: vec![self.path.clone().unwrap_or_else(|| cwd.to_path_buf())],
            regex: match &self.regex {
                Some(rx) => parse_regex(rx),
                None => DEFAULT_REGEX.iter().map(|s| s.to_string()).collect(),
            },
        };

        Ok(Some((job, trigger)))
    }
}

/// Parse `K=V,K2=V2`. Blank entries are skipped; an entry without `=` is an
/// error.
pub fn parse_env(s: &str) -> Result<EnvMap> {
    let mut env = EnvMap::new();
    for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            WatchjobError::Config(format!("invalid --env entry '{pair}': expected KEY=VALUE"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(WatchjobError::Config(format!(
                "invalid --env entry '{pair}': empty key"
            )));
        }
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

/// Split a comma-separated regex list.
pub fn parse_regex(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_command_keeps_hyphenated_args() {
        let args = CliArgs::try_parse_from(["watchjob", "cargo", "test", "--release"]).unwrap();
        assert_eq!(args.command, vec!["cargo", "test", "--release"]);
        assert!(args.has_command());
    }

    #[test]
    fn repeated_cmd_flags_build_a_series() {
        let args = CliArgs::try_parse_from([
            "watchjob",
            "-c",
            "cargo fmt",
            "--cmd",
            "cargo build",
            "-r",
            r"\.rs$, !target/",
            "-e",
            "A=1,B=2",
        ])
        .unwrap();

        let (job, trigger) = args.cli_job(Path::new("/work")).unwrap().unwrap();
        let Action::Series(steps) = &job.action else {
            panic!("expected series, got {:?}", job.action);
        };
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].action, Action::Command(CommandSpec::new("cargo", ["build"])));
        assert_eq!(job.env.get("B").map(String::as_str), Some("2"));
        assert_eq!(trigger.paths, vec![PathBuf::from("/work")]);
        assert_eq!(trigger.regex, vec![r"\.rs$", "!target/"]);
    }

    #[test]
    fn default_regex_when_none_given() {
        let args = CliArgs::try_parse_from(["watchjob", "-p", "src", "make"]).unwrap();
        let (_, trigger) = args.cli_job(Path::new("/work")).unwrap().unwrap();
        assert_eq!(trigger.paths, vec![PathBuf::from("src")]);
        assert_eq!(trigger.regex.len(), DEFAULT_REGEX.len());
    }

    #[test]
    fn no_command_means_no_cli_job() {
        let args = CliArgs::try_parse_from(["watchjob", "--once"]).unwrap();
        assert!(!args.has_command());
        assert!(args.cli_job(Path::new(".")).unwrap().is_none());
    }

    #[test]
    fn env_parsing() {
        let env = parse_env(" A=1 , B=x=y ,").unwrap();
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("x=y"));
        assert!(parse_env("NOVALUE").is_err());
        assert!(parse_env("=1").is_err());
    }

    #[test]
    fn log_level_priority() {
        let args = CliArgs::try_parse_from(["watchjob", "-d", "--log-level", "warn"]).unwrap();
        assert_eq!(args.effective_log_level(Some(LogLevel::Error)), Some(LogLevel::Warn));

        let args = CliArgs::try_parse_from(["watchjob", "-d"]).unwrap();
        assert_eq!(args.effective_log_level(Some(LogLevel::Error)), Some(LogLevel::Debug));

        let args = CliArgs::try_parse_from(["watchjob"]).unwrap();
        assert_eq!(args.effective_log_level(Some(LogLevel::Error)), Some(LogLevel::Error));
        assert_eq!(args.effective_log_level(None), None);
    }
}
