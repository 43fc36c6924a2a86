//! Graceful shutdown integration tests.
//!
//! Tests that verify the scheduler waits for in-flight executions when it
//! stops, gives up at the shutdown timeout, and never fires afterwards.

use crontide::testing::{ScriptedRunner, SlowRunner};
use crontide::{EventKind, SchedulerState, TaskDefinition};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::{EVENT_TIMEOUT, every_second, far_future, fast_config, scheduler_with};

fn hourly(id: i64, name: &str) -> TaskDefinition {
    TaskDefinition::new(id, name, "0 0 * * * *")
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_jobs() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(500)));
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.start().await;
    scheduler.reload_at(&[hourly(1, "slow")], far_future()).await;
    scheduler.run_pending_at(far_future()).await;

    assert!(
        listener
            .wait_for(EventKind::ExecutionStarted, 1, EVENT_TIMEOUT)
            .await
    );
    assert_eq!(scheduler.running_count().await, 1);

    scheduler.stop().await;

    assert_eq!(runner.completed(), 1);
    assert_eq!(scheduler.running_count().await, 0);
    assert_eq!(listener.count(EventKind::ExecutionSucceeded), 1);

    // The run concludes before the engine reports it stopped
    let kinds = listener.kinds();
    let succeeded = kinds.iter().position(|k| *k == EventKind::ExecutionSucceeded);
    let stopped = kinds.iter().position(|k| *k == EventKind::EngineStopped);
    assert!(succeeded < stopped);
}

#[tokio::test]
async fn test_graceful_shutdown_timeout_exceeded() {
    let runner = Arc::new(SlowRunner::new(Duration::from_secs(10)));
    let config = fast_config().with_shutdown_timeout(Duration::from_millis(300));
    let (scheduler, listener) = scheduler_with(runner.clone(), config);

    scheduler.start().await;
    scheduler.reload_at(&[hourly(1, "stuck")], far_future()).await;
    scheduler.run_pending_at(far_future()).await;

    let start = Instant::now();
    scheduler.stop().await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(runner.completed(), 0);
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
    assert_eq!(listener.count(EventKind::EngineStopped), 1);
}

#[tokio::test]
async fn test_graceful_shutdown_with_no_running_jobs() {
    let (scheduler, listener) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        fast_config(),
    );

    scheduler.start().await;
    scheduler.reload_at(&[hourly(1, "idle")], far_future()).await;

    let start = Instant::now();
    scheduler.stop().await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(
        listener.kinds().last(),
        Some(&EventKind::EngineStopped)
    );
}

#[tokio::test]
async fn test_graceful_shutdown_waits_for_multiple_jobs() {
    let runner = Arc::new(SlowRunner::new(Duration::from_millis(300)));
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.start().await;
    scheduler
        .reload_at(
            &[hourly(1, "first"), hourly(2, "second"), hourly(3, "third")],
            far_future(),
        )
        .await;
    scheduler.run_pending_at(far_future()).await;
    assert_eq!(scheduler.running_count().await, 3);

    scheduler.stop().await;

    assert_eq!(runner.started(), 3);
    assert_eq!(runner.completed(), 3);
    assert_eq!(listener.count(EventKind::ExecutionSucceeded), 3);
}

#[tokio::test]
async fn test_no_firings_after_stop() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.reload(&[every_second(1, "tick")]).await;
    scheduler.start().await;
    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 1, EVENT_TIMEOUT)
            .await
    );

    scheduler.stop().await;
    let calls = runner.call_count().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(runner.call_count().await, calls);

    // Driving dispatch by hand is inert while stopped
    scheduler.run_pending_at(far_future()).await;
    assert_eq!(runner.call_count().await, calls);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let runner = Arc::new(ScriptedRunner::succeeding());
    let (scheduler, listener) = scheduler_with(runner.clone(), fast_config());

    scheduler.reload(&[every_second(1, "tick")]).await;
    scheduler.start().await;
    scheduler.stop().await;
    scheduler.stop().await;
    assert_eq!(listener.count(EventKind::EngineStopped), 1);

    scheduler.start().await;
    assert!(
        listener
            .wait_for(EventKind::ExecutionSucceeded, 1, EVENT_TIMEOUT)
            .await
    );
    scheduler.stop().await;

    assert_eq!(listener.count(EventKind::EngineStarted), 2);
}
