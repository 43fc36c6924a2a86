//! Dispatch integration tests.
//!
//! Tests that run the live scheduling loop against the wall clock with
//! every-second jobs.

use crontide::testing::{ScriptedRunner, SlowRunner};
use crontide::{EventKind, JobId, RetryPolicy, TaskId};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{EVENT_TIMEOUT, every_second, fast_config, scheduler_with};

#[tokio::test]
async fn test_every_second_job_fires_repeatedly() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.reload(&[every_second(1, "tick")]).await;
    scheduler.start().await;

    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 2, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    let calls = runner.calls().await;
    assert!(calls.len() >= 2);
    assert!(calls.iter().all(|(id, name)| *id == TaskId::new(1) && name == "tick"));
    assert_eq!(listener.count(EventKind::ExecutionMissed), 0);

    let scheduled: Vec<_> = listener
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::ExecutionStarted)
        .filter_map(|e| e.scheduled_at)
        .collect();
    assert!(scheduled.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_overlapping_execution_is_skipped() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(2500)));
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.reload(&[every_second(1, "slow")]).await;
    scheduler.start().await;

    assert!(
        listener
            .wait_for(EventKind::ExecutionSkipped, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    // Never more than one execution in flight
    assert_eq!(runner.started(), 1);
    assert_eq!(runner.completed(), 1);
}

#[tokio::test]
async fn test_failed_execution_is_retried_once() {
    let runner = Arc::new(ScriptedRunner::new(1));
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.reload(&[every_second(1, "flaky")]).await;
    scheduler.start().await;

    assert!(
        listener
            .wait_for(EventKind::RetrySucceeded, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    let kinds = listener.kinds_for(&JobId::new("task_1"));
    let failed = kinds.iter().position(|k| *k == EventKind::ExecutionFailed);
    let retried = kinds.iter().position(|k| *k == EventKind::RetrySucceeded);
    assert!(failed.is_some());
    assert!(failed < retried);
}

#[tokio::test]
async fn test_retry_with_delay_reports_each_attempt() {
    let runner = Arc::new(ScriptedRunner::failing());
    let config =
        fast_config().with_retry(RetryPolicy::fixed(2, Duration::from_millis(100)));
    let (scheduler, listener) = scheduler_with(runner.clone(), config);

    scheduler.reload(&[every_second(1, "broken")]).await;
    scheduler.start().await;

    assert!(
        listener
            .wait_for(EventKind::RetryFailed, 2, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    let attempts: Vec<u32> = listener
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::RetryFailed)
        .filter_map(|e| e.attempt)
        .take(2)
        .collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn test_firings_during_pause_are_missed_on_resume() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let config = fast_config().with_misfire_grace(Duration::from_millis(500));
    let (scheduler, listener) = scheduler_with(runner.clone(), config);

    scheduler.reload(&[every_second(1, "tick")]).await;
    scheduler.start().await;
    scheduler.pause().await;

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(listener.count(EventKind::ExecutionStarted), 0);

    scheduler.resume().await;
    assert!(
        listener
            .wait_for(EventKind::ExecutionMissed, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;
}

#[tokio::test]
async fn test_paused_job_does_not_fire() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler
        .reload(&[every_second(1, "paused"), every_second(2, "active")])
        .await;
    scheduler.pause_job(&JobId::new("task_1")).await.unwrap();
    scheduler.start().await;

    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 2, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    assert!(
        runner
            .calls()
            .await
            .iter()
            .all(|(id, _)| *id == TaskId::new(2))
    );
}

#[tokio::test]
async fn test_job_added_while_running_fires() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.start().await;
    scheduler.add_task(&every_second(9, "late")).await.unwrap();

    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    assert_eq!(runner.calls().await[0].0, TaskId::new(9));
}
