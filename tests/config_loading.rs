use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use proptest::prelude::*;
use watchjob::cli::CliArgs;
use watchjob::config::{
    ConfigFile, JobSpec, JobTable, RawConfigFile, definition_from_spec, load_and_validate,
    save_to_path,
};
use watchjob::errors::WatchjobError;
use watchjob::job::{Action, CommandSpec, Job};
use watchjob::load_config;
use watchjob::types::{LogLevel, SeriesPolicy};

fn write_config(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("Watchjob.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

fn load_str(contents: &str) -> watchjob::errors::Result<ConfigFile> {
    let dir = tempfile::tempdir().unwrap();
    load_and_validate(write_config(dir.path(), contents))
}

fn invalid_job(err: WatchjobError) -> (String, String) {
    match err {
        WatchjobError::InvalidJob { job, reason } => (job, reason),
        other => panic!("expected InvalidJob, got {other:?}"),
    }
}

#[test]
fn loads_full_example() {
    let cfg = load_str(
        r#"
[config]
severity = "debug"
clear_cli = true
cooldown = "250ms"
batching_duration = "1s"
buffer_size = 16
series_policy = "stop_on_failure"

[job.build]
on = { paths = ["src"], regex = ['.*\.rs$', '!.*_test\.rs$'] }
env = { RUST_LOG = "debug" }
before = ["cargo fmt"]
series = ["cargo build", { cmd = "cargo", params = ["test", "--all"] }]
after = [{ parallel = ["echo done", "echo 'all good'"] }]
"#,
    )
    .unwrap();

    assert_eq!(cfg.config.severity, Some(LogLevel::Debug));
    assert!(cfg.config.clear_cli);
    assert_eq!(cfg.config.cooldown.get(), Duration::from_millis(250));
    assert_eq!(cfg.config.batching_duration.get(), Duration::from_secs(1));
    assert_eq!(cfg.config.buffer_size, 16);
    assert_eq!(cfg.config.series_policy, SeriesPolicy::StopOnFailure);

    let build = &cfg.jobs["build"];
    assert_eq!(build.name, "build");
    let trigger = build.trigger.as_ref().unwrap();
    assert_eq!(trigger.paths, vec![PathBuf::from("src")]);
    assert_eq!(trigger.regex.len(), 2);

    let expected = Job::series(vec![
        Job::command("cargo", ["build"]),
        Job::command("cargo", ["test", "--all"]),
    ])
    .with_before(Job::command("cargo", ["fmt"]))
    .with_after(Job::parallel(vec![
        Job::command("echo", ["done"]),
        Job::command("echo", ["all good"]),
    ]))
    .with_env("RUST_LOG", "debug");
    assert_eq!(build.job, expected);
}

#[test]
fn defaults_apply_when_config_section_is_missing() {
    let cfg = load_str("[job]\nlint = \"cargo clippy\"\n").unwrap();
    assert_eq!(cfg.config.severity, None);
    assert_eq!(cfg.config.cooldown.get(), Duration::from_millis(100));
    assert_eq!(cfg.config.buffer_size, 4096);
    assert_eq!(cfg.config.series_policy, SeriesPolicy::KeepGoing);
    assert!(cfg.jobs["lint"].trigger.is_none());
    assert_eq!(
        cfg.jobs["lint"].job.action,
        Action::Command(CommandSpec::new("cargo", ["clippy"]))
    );
}

#[test]
fn cmd_without_params_is_split_like_a_shell_would() {
    let cfg = load_str(
        r#"
[job.quoted]
cmd = "sh -c 'echo hi there'"
"#,
    )
    .unwrap();
    assert_eq!(
        cfg.jobs["quoted"].job.action,
        Action::Command(CommandSpec::new("sh", ["-c", "echo hi there"]))
    );
}

#[test]
fn cmd_with_params_is_taken_verbatim() {
    let cfg = load_str(
        r#"
[job.verbatim]
cmd = "my tool"
params = ["a b"]
"#,
    )
    .unwrap();
    assert_eq!(
        cfg.jobs["verbatim"].job.action,
        Action::Command(CommandSpec::new("my tool", ["a b"]))
    );
}

#[test]
fn more_than_one_action_kind_is_rejected() {
    let err = load_str(
        r#"
[job.both]
cmd = "cargo build"
series = ["cargo test"]
"#,
    )
    .unwrap_err();
    let (job, reason) = invalid_job(err);
    assert_eq!(job, "both");
    assert!(reason.contains("only contain one of"), "{reason}");
}

#[test]
fn nested_violations_name_the_offending_node() {
    let err = load_str(
        r#"
[job.outer]
series = ["true", { parallel = ["a"], series = ["b"] }]
"#,
    )
    .unwrap_err();
    let (job, _) = invalid_job(err);
    assert_eq!(job, "outer.series[1]");
}

#[test]
fn on_is_only_allowed_at_top_level() {
    let err = load_str(
        r#"
[job.outer]
series = [{ cmd = "true", on = { paths = ["src"] } }]
"#,
    )
    .unwrap_err();
    let (job, reason) = invalid_job(err);
    assert_eq!(job, "outer.series[0]");
    assert!(reason.contains("top-level"), "{reason}");
}

#[test]
fn trigger_is_accepted_as_alias_for_on() {
    let cfg = load_str(
        r#"
[job.legacy]
trigger = { paths = ["lib"] }
cmd = "true"
"#,
    )
    .unwrap();
    assert_eq!(
        cfg.jobs["legacy"].trigger.as_ref().unwrap().paths,
        vec![PathBuf::from("lib")]
    );
}

#[test]
fn invalid_regex_is_rejected_at_load_time() {
    let err = load_str(
        r#"
[job.rx]
on = { regex = ['!(unclosed'] }
cmd = "true"
"#,
    )
    .unwrap_err();
    let (job, reason) = invalid_job(err);
    assert_eq!(job, "rx");
    assert!(reason.contains("invalid regex"), "{reason}");
}

#[test]
fn params_without_cmd_and_blank_commands_are_rejected() {
    let (job, _) = invalid_job(load_str("[job.p]\nparams = [\"x\"]\n").unwrap_err());
    assert_eq!(job, "p");

    let (job, _) = invalid_job(load_str("[job.blank]\nseries = [\"   \"]\n").unwrap_err());
    assert_eq!(job, "blank.series[0]");
}

#[test]
fn malformed_files_fail_with_toml_errors() {
    assert!(matches!(
        load_str("[config]\ncooldown = \"5 parsecs\"\n[job]\na = \"true\"\n"),
        Err(WatchjobError::TomlDe(_))
    ));
    assert!(matches!(
        load_str("[job.a]\ncmd = \"true\"\nunknown_key = 1\n"),
        Err(WatchjobError::TomlDe(_))
    ));
}

#[test]
fn global_config_is_validated() {
    assert!(matches!(load_str("[config]\n"), Err(WatchjobError::Config(_))));
    assert!(matches!(
        load_str("[config]\nbuffer_size = 0\n[job]\na = \"true\"\n"),
        Err(WatchjobError::Config(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_and_validate(dir.path().join("missing.toml")),
        Err(WatchjobError::Config(_))
    ));
}

#[test]
fn saved_config_loads_back_identically() {
    let original = load_str(
        r#"
[config]
severity = "warn"
cooldown = "2s"

[job]
lint = "cargo clippy -- -D warnings"

[job.build]
on = { paths = ["src"], regex = ['\.rs$'] }
env = { A = "1" }
before = ["cargo fmt"]
series = ["cargo build", { cmd = "cargo", params = ["test"], env = { B = "2" } }]
after = [{ parallel = ["echo a", "echo b"] }]
"#,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saved.toml");
    save_to_path(&original, &path).unwrap();

    let reloaded = load_and_validate(&path).unwrap();
    assert_eq!(reloaded, original);
}

#[test]
fn cli_commands_define_the_default_job() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[config]
severity = "error"

[job.default]
cmd = "overridden"

[job.other]
cmd = "true"
"#,
    );

    let args = CliArgs::try_parse_from([
        "watchjob",
        "--config",
        path.to_str().unwrap(),
        "-c",
        "cargo check",
    ])
    .unwrap();
    let cfg = load_config(&args).unwrap();

    assert_eq!(cfg.config.severity, Some(LogLevel::Error));
    assert_eq!(cfg.jobs.len(), 2);
    let default = &cfg.jobs["default"];
    assert_eq!(
        default.job,
        Job::series(vec![Job::command("cargo", ["check"])])
    );
    assert!(default.trigger.is_some());
}

#[test]
fn cli_mode_works_without_a_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let args = CliArgs::try_parse_from(["watchjob", "--config", missing.to_str().unwrap(), "make", "all"])
        .unwrap();
    let cfg = load_config(&args).unwrap();
    assert_eq!(cfg.jobs.len(), 1);
    assert_eq!(
        cfg.jobs["default"].job,
        Job::series(vec![Job::command("make", ["all"])])
    );

    let args = CliArgs::try_parse_from(["watchjob", "--config", missing.to_str().unwrap()]).unwrap();
    assert!(load_config(&args).is_err());
}

#[test]
fn demo_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/Watchjob.toml");
    let cfg = load_and_validate(path).unwrap();
    assert!(!cfg.jobs.is_empty());
}

fn table(cmd: bool, series: bool, parallel: bool) -> JobTable {
    JobTable {
        cmd: cmd.then(|| "true".to_string()),
        series: if series { vec![JobSpec::Shorthand("true".into())] } else { Vec::new() },
        parallel: if parallel { vec![JobSpec::Shorthand("true".into())] } else { Vec::new() },
        ..JobTable::default()
    }
}

proptest! {
    #[test]
    fn at_most_one_action_kind_is_accepted(
        cmd in any::<bool>(),
        series in any::<bool>(),
        parallel in any::<bool>(),
        nested in any::<bool>(),
    ) {
        let populated = [cmd, series, parallel].iter().filter(|b| **b).count();
        let spec = if nested {
            JobSpec::Table(JobTable {
                before: vec![JobSpec::Table(table(cmd, series, parallel))],
                ..JobTable::default()
            })
        } else {
            JobSpec::Table(table(cmd, series, parallel))
        };

        let result = definition_from_spec("job", spec);
        prop_assert_eq!(result.is_ok(), populated <= 1);
    }
}

#[test]
fn raw_round_trip_preserves_shorthand() {
    let cfg = load_str("[job]\nq = \"sh -c 'echo hi'\"\n").unwrap();
    let raw = RawConfigFile::from(&cfg);
    let JobSpec::Shorthand(line) = &raw.job["q"] else {
        panic!("bare command should be saved as a string, got {:?}", raw.job["q"]);
    };
    assert_eq!(
        CommandSpec::parse(line),
        Some(CommandSpec::new("sh", ["-c", "echo hi"]))
    );
}
