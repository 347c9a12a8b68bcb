// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::{CLI_JOB_NAME, CliArgs};
use crate::config::{ConfigFile, RawConfigFile, load_raw_from_path, merge_cli_job, save_to_path};
use crate::engine::{Dispatcher, JobManager};
use crate::errors::WatchjobError;
use crate::exec::{Executor, JobReport, ProcessRegistry, ProcessRunner};
use crate::job::{JobDefinition, JobName};
use crate::watch::{WatchOptions, spawn_watcher};

/// Build the effective configuration from the config file and/or the
/// command line.
///
/// Commands on the command line define (or override) the `default` job.
/// It is an error to have neither a config file nor a command.
pub fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    let path = PathBuf::from(&args.config);
    let has_file = path.is_file();
    let cwd = std::env::current_dir()?;

    let cli_job = args.cli_job(&cwd)?;
    let cfg = match (has_file, cli_job) {
        (false, None) => {
            return Err(WatchjobError::Config(format!(
                "no config file at {} and no command given (see --help)",
                path.display()
            ))
            .into());
        }
        (true, None) => ConfigFile::try_from(load_raw_from_path(&path)?)?,
        (has_file, Some((job, trigger))) => {
            let raw = if has_file {
                load_raw_from_path(&path)?
            } else {
                RawConfigFile::default()
            };
            let definition = JobDefinition {
                name: CLI_JOB_NAME.to_string(),
                job,
                trigger: Some(trigger),
            };
            merge_cli_job(raw, definition)?
        }
    };

    Ok(cfg)
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the process registry, job manager and executor
/// - the dispatcher (every job is triggered once at startup)
/// - the file watcher (unless `--once`)
/// - Ctrl-C / SIGTERM handling, followed by exactly one `stop_all`
pub async fn run(args: CliArgs, cfg: ConfigFile) -> Result<()> {
    if args.save {
        save_to_path(&cfg, &args.config)?;
        info!(path = %args.config, "configuration saved");
        return Ok(());
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let cwd = std::env::current_dir()?;
    let registry = ProcessRegistry::new();
    let manager = JobManager::new(registry.clone());
    let executor =
        Executor::new(ProcessRunner::new(registry)).with_series_policy(cfg.config.series_policy);
    let dispatcher = Dispatcher::new(manager.clone(), executor, &cfg, &cwd)?;

    info!(jobs = ?dispatcher.job_names(), "jobs loaded");
    let startup = dispatcher.trigger_all();

    let outcome = if args.once {
        run_once(startup).await
    } else {
        watch_until_shutdown(&dispatcher, &cfg, &cwd).await
    };

    manager.stop_all().await;
    info!("watchjob exiting");
    outcome
}

async fn run_once(startup: Vec<(JobName, JoinHandle<JobReport>)>) -> Result<()> {
    let wait_all = async {
        let mut failures = 0usize;
        for (name, handle) in startup {
            match handle.await {
                Ok(report) => {
                    if report.failures > 0 {
                        warn!(job = %name, failures = report.failures, "job finished with failures");
                    } else {
                        debug!(job = %name, state = ?report.state, "job finished");
                    }
                    failures += report.failures;
                }
                Err(err) => {
                    error!(job = %name, error = %err, "job task failed");
                    failures += 1;
                }
            }
        }
        failures
    };

    tokio::select! {
        failures = wait_all => match failures {
            0 => Ok(()),
            n => Err(anyhow!("{n} command(s) failed")),
        },
        _ = shutdown_signal() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

async fn watch_until_shutdown(dispatcher: &Dispatcher, cfg: &ConfigFile, cwd: &Path) -> Result<()> {
    let mut roots = dispatcher.watch_roots();
    if roots.is_empty() {
        debug!("no job has an `on` block; watching the working directory");
        roots.push(cwd.to_path_buf());
    }

    let token = CancellationToken::new();
    let watcher = spawn_watcher(
        roots,
        dispatcher.clone(),
        WatchOptions::from(&cfg.config),
        token.clone(),
    )?;

    shutdown_signal().await;
    info!("shutdown requested, stopping jobs");

    token.cancel();
    watcher.shutdown().await;
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            warn!(error = %err, "failed to listen for Ctrl+C");
                        }
                    }
                    _ = term.recv() => debug!("received SIGTERM"),
                }
                return;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl+C");
    }
}

/// Simple dry-run output: print settings, then every job tree.
fn print_dry_run(cfg: &ConfigFile) {
    println!("watchjob dry-run");
    println!("  config.cooldown = {}", cfg.config.cooldown);
    println!("  config.batching_duration = {}", cfg.config.batching_duration);
    println!("  config.buffer_size = {}", cfg.config.buffer_size);
    println!("  config.clear_cli = {}", cfg.config.clear_cli);
    println!("  config.series_policy = {:?}", cfg.config.series_policy);
    println!();

    for (name, def) in &cfg.jobs {
        println!("job {name}:");
        match &def.trigger {
            Some(trigger) => {
                let paths: Vec<String> = trigger
                    .paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                println!("  on paths = {paths:?}, regex = {:?}", trigger.regex);
            }
            None => println!("  (startup only, no `on` block)"),
        }
        for line in def.job.describe().lines() {
            println!("  {line}");
        }
        println!();
    }
}
