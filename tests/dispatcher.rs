#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use watchjob::config::{ConfigFile, RawConfigFile};
use watchjob::engine::{Dispatcher, JobManager};
use watchjob::exec::{Executor, JobState, OutputSink, ProcessRegistry, ProcessRunner};
use watchjob::job::Job;
use watchjob_test_utils::{init_tracing, wait_until, with_timeout};

const CONFIG: &str = r#"
[job]
startup = "true"

[job.rust]
on = { paths = ["src"], regex = ['\.rs$', '!_test\.rs$'] }
cmd = "true"

[job.docs]
on = { paths = ["docs"] }
series = ["true"]

[job.everything]
on = {}
cmd = "true"
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    registry: ProcessRegistry,
    dispatcher: Dispatcher,
}

fn fixture(config: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::fs::create_dir(root.join("src")).unwrap();
    std::fs::create_dir(root.join("docs")).unwrap();

    let raw: RawConfigFile = toml::from_str(config).unwrap();
    let cfg = ConfigFile::try_from(raw).unwrap();

    let registry = ProcessRegistry::new();
    let manager = JobManager::new(registry.clone());
    let executor =
        Executor::new(ProcessRunner::new(registry.clone()).with_output(OutputSink::Discard));
    let dispatcher = Dispatcher::new(manager, executor, &cfg, &root).unwrap();

    Fixture {
        _dir: dir,
        root,
        registry,
        dispatcher,
    }
}

fn spawned_pid(registry: &ProcessRegistry, name: &str) -> Option<u32> {
    registry.handles(name).first().and_then(|h| h.pid())
}

fn names<T>(handles: &[(String, T)]) -> Vec<&str> {
    handles.iter().map(|(name, _)| name.as_str()).collect()
}

#[tokio::test]
async fn dispatch_triggers_only_matching_jobs() {
    init_tracing();
    let fx = fixture(CONFIG);

    let handles = fx.dispatcher.dispatch_paths(&[fx.root.join("src/main.rs")]);
    // `everything` has an empty `on` block: the working directory, no filter.
    assert_eq!(names(&handles), vec!["everything", "rust"]);
    for (_, handle) in handles {
        let report = with_timeout(handle).await.unwrap();
        assert_eq!(report.state, JobState::Completed);
    }

    let handles = fx.dispatcher.dispatch_paths(&[fx.root.join("src/main_test.rs")]);
    assert_eq!(names(&handles), vec!["everything"]);

    let handles = fx.dispatcher.dispatch_paths(&[fx.root.join("docs/guide.md")]);
    assert_eq!(names(&handles), vec!["docs", "everything"]);

    let handles = fx.dispatcher.dispatch_paths(&[Path::new("/somewhere/else.rs").to_path_buf()]);
    assert!(handles.is_empty());
}

#[tokio::test]
async fn one_batch_triggers_each_job_once() {
    let fx = fixture(CONFIG);
    let handles = fx.dispatcher.dispatch_paths(&[
        fx.root.join("src/a.rs"),
        fx.root.join("src/b.rs"),
        fx.root.join("docs/c.md"),
    ]);
    assert_eq!(names(&handles), vec!["docs", "everything", "rust"]);
}

#[tokio::test]
async fn watch_roots_are_the_union_of_job_paths() {
    let fx = fixture(CONFIG);
    let roots = fx.dispatcher.watch_roots();
    assert_eq!(roots, vec![fx.root.clone(), fx.root.join("docs"), fx.root.join("src")]);
}

#[tokio::test]
async fn trigger_all_runs_every_job_once() {
    let fx = fixture(CONFIG);
    let handles = fx.dispatcher.trigger_all();
    assert_eq!(names(&handles), fx.dispatcher.job_names().iter().map(String::as_str).collect::<Vec<_>>());

    for (_, handle) in handles {
        let report = with_timeout(handle).await.unwrap();
        assert_eq!(report.state, JobState::Completed);
        assert_eq!(report.failures, 0);
    }
    assert_eq!(fx.dispatcher.manager().active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retrigger_supersedes_the_running_instance() {
    init_tracing();
    let fx = fixture(CONFIG);
    let slow = Arc::new(Job::command("sleep", ["30"]));

    let first = fx.dispatcher.trigger("slow", Arc::clone(&slow));
    assert!(wait_until(Duration::from_secs(5), || spawned_pid(&fx.registry, "slow").is_some()).await);
    let first_pid = spawned_pid(&fx.registry, "slow");

    let second = fx.dispatcher.trigger("slow", Arc::clone(&slow));
    let first_report = with_timeout(first).await.unwrap();
    assert_eq!(first_report.state, JobState::Cancelled);

    assert!(
        wait_until(Duration::from_secs(5), || {
            spawned_pid(&fx.registry, "slow").is_some_and(|pid| Some(pid) != first_pid)
        })
        .await
    );
    assert_eq!(fx.dispatcher.manager().active_count(), 1);

    with_timeout(fx.dispatcher.manager().stop_all()).await;
    let second_report = with_timeout(second).await.unwrap();
    assert_eq!(second_report.state, JobState::Cancelled);
    assert!(fx.registry.is_empty());
}
