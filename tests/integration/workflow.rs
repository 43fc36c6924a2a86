//! End-to-end workflow tests.
//!
//! Tests that load tasks and engine settings from YAML files and run real
//! commands through the scheduler.

use crontide::testing::RecordingListener;
use crontide::{EventKind, JobId, Scheduler, YamlLoader};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::EVENT_TIMEOUT;

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[tokio::test]
async fn test_yaml_tasks_run_commands() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out.txt");

    let tasks_yaml = format!(
        r#"
tasks:
  - id: 1
    name: append
    cron: "* * * * * *"
    command:
      program: sh
      args: ["-c", "echo $MARKER >> {}"]
      env:
        MARKER: fired
  - id: 2
    name: disabled
    enabled: false
    cron: "* * * * * *"
    command:
      program: "false"
"#,
        out.display()
    );
    let config_yaml = r#"
timezone: Europe/Berlin
tick_interval_ms: 50
shutdown_timeout_secs: 5
retry:
  max_attempts: 0
"#;

    let tasks = YamlLoader::load_tasks(write(&dir, "tasks.yaml", &tasks_yaml)).unwrap();
    let engine = YamlLoader::load_engine_config(write(&dir, "engine.yaml", config_yaml)).unwrap();

    let listener = RecordingListener::new();
    let scheduler = Scheduler::with_config(
        Arc::new(tasks.command_runner()),
        engine.to_scheduler_config().unwrap(),
    )
    .with_listener(listener.clone());

    let summary = scheduler.reload(&tasks.definitions()).await;
    assert!(summary.is_clean());
    assert_eq!(summary.installed.len(), 1);
    assert!(summary.installed[0].trigger.contains("Europe/Berlin"));

    scheduler.start().await;
    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    let contents = std::fs::read_to_string(&out).unwrap();
    assert!(contents.lines().count() >= 1);
    assert!(contents.lines().all(|line| line == "fired"));
    assert!(
        listener
            .kinds_for(&JobId::new("task_2"))
            .is_empty()
    );
}

#[tokio::test]
async fn test_failing_command_reports_exit_code() {
    let yaml = r#"
tasks:
  - id: 7
    name: broken
    cron: "* * * * * *"
    command:
      program: sh
      args: ["-c", "exit 3"]
"#;
    let tasks = YamlLoader::parse_tasks(yaml).unwrap();
    let engine = YamlLoader::parse_engine_config("tick_interval_ms: 50\n").unwrap();

    let listener = RecordingListener::new();
    let scheduler = Scheduler::with_config(
        Arc::new(tasks.command_runner()),
        engine.to_scheduler_config().unwrap(),
    )
    .with_listener(listener.clone());

    scheduler.reload(&tasks.definitions()).await;
    scheduler.start().await;
    // Default policy retries once
    assert!(
        listener
            .wait_for(EventKind::RetryFailed, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    let failed = listener
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::ExecutionFailed)
        .unwrap();
    assert_eq!(failed.job_id, Some(JobId::new("task_7")));
    assert!(failed.error.unwrap().contains('3'));
}

#[tokio::test]
async fn test_command_timeout_is_a_failure() {
    let yaml = r#"
tasks:
  - id: 1
    name: sleepy
    cron: "* * * * * *"
    command:
      program: sleep
      args: ["30"]
      timeout_secs: 1
"#;
    let tasks = YamlLoader::parse_tasks(yaml).unwrap();
    let engine = YamlLoader::parse_engine_config("tick_interval_ms: 50\nretry:\n  max_attempts: 0\n")
        .unwrap();

    let listener = RecordingListener::new();
    let scheduler = Scheduler::with_config(
        Arc::new(tasks.command_runner()),
        engine.to_scheduler_config().unwrap(),
    )
    .with_listener(listener.clone());

    scheduler.reload(&tasks.definitions()).await;
    scheduler.start().await;
    assert!(
        listener
            .wait_for(EventKind::ExecutionFailed, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    assert_eq!(listener.count(EventKind::ExecutionSucceeded), 0);
    let failed = listener
        .events()
        .into_iter()
        .find(|e| e.kind == EventKind::ExecutionFailed)
        .unwrap();
    assert!(failed.error.unwrap().contains("timed out"));
}
