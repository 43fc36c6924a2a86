//! Reload integration tests.
//!
//! Tests that task definitions are turned into jobs with the right
//! identity, timing and events, and that bad tasks never abort a reload.

use chrono::{TimeDelta, TimeZone, Utc};
use crontide::testing::ScriptedRunner;
use crontide::{EventKind, JobId, SchedulerConfig, SchedulerError, TaskDefinition, TaskId};
use std::sync::Arc;

use crate::common::{far_future, scheduler_with};

fn crawler_tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::new(1, "news", "0 */10 * * * *"),
        TaskDefinition::new(2, "weather", "30 6 * * *"),
        TaskDefinition::new(3, "archived", "0 0 * * *").with_enabled(false),
        TaskDefinition::new(4, "draft", ""),
        TaskDefinition::new(5, "typo", "0 0 25 * * *"),
        TaskDefinition::new(6, "reports", "0 0 9 1 * mon"),
    ]
}

#[tokio::test]
async fn test_mixed_batch_installs_only_valid_tasks() {
    let (scheduler, listener) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        SchedulerConfig::default(),
    );

    let summary = scheduler.reload_at(&crawler_tasks(), far_future()).await;

    let installed: Vec<TaskId> = summary.installed.iter().map(|j| j.task_id).collect();
    assert_eq!(installed, vec![TaskId::new(1), TaskId::new(2), TaskId::new(6)]);

    assert_eq!(summary.rejected.len(), 1);
    match &summary.rejected[0] {
        SchedulerError::InvalidCronExpression {
            task_id,
            task_name,
            expression,
            ..
        } => {
            assert_eq!(*task_id, TaskId::new(5));
            assert_eq!(task_name, "typo");
            assert_eq!(expression, "0 0 25 * * *");
        }
        other => panic!("Expected InvalidCronExpression, got {:?}", other),
    }

    assert_eq!(listener.count(EventKind::JobAdded), 3);
    assert_eq!(listener.count(EventKind::InvalidCron), 1);
    assert_eq!(listener.kinds().last(), Some(&EventKind::ReloadCompleted));
    assert!(
        listener
            .kinds_for(&JobId::new("task_3"))
            .is_empty()
    );
}

#[tokio::test]
async fn test_first_fire_times_are_inclusive_of_reference() {
    let (scheduler, _) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        SchedulerConfig::default(),
    );

    // 2099-06-01 is a Monday
    let summary = scheduler.reload_at(&crawler_tasks(), far_future()).await;
    let next = |id: i64| {
        summary
            .installed
            .iter()
            .find(|j| j.task_id == TaskId::new(id))
            .and_then(|j| j.next_fire_time)
    };

    assert_eq!(next(1), Some(far_future()));
    assert_eq!(next(2), Some(far_future() + TimeDelta::minutes(6 * 60 + 30)));
    assert_eq!(next(6), Some(far_future() + TimeDelta::hours(9)));
}

#[tokio::test]
async fn test_reload_is_idempotent() {
    let (scheduler, listener) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        SchedulerConfig::default(),
    );

    let first = scheduler.reload_at(&crawler_tasks(), far_future()).await;
    let second = scheduler.reload_at(&crawler_tasks(), far_future()).await;

    assert_eq!(first.installed, second.installed);
    assert_eq!(first.rejected, second.rejected);
    assert_eq!(scheduler.jobs().await, second.installed);
    // Second pass removes the three jobs of the first
    assert_eq!(listener.count(EventKind::JobRemoved), 3);
}

#[tokio::test]
async fn test_reload_with_empty_batch_clears_table() {
    let (scheduler, listener) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        SchedulerConfig::default(),
    );

    scheduler.reload_at(&crawler_tasks(), far_future()).await;
    let summary = scheduler.reload_at(&[], far_future()).await;

    assert!(summary.installed.is_empty());
    assert!(scheduler.jobs().await.is_empty());
    let completed = listener
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::ReloadCompleted)
        .last()
        .unwrap();
    assert!(completed.jobs.is_empty());
}

#[tokio::test]
async fn test_reload_evaluates_in_configured_timezone() {
    let config = SchedulerConfig::default()
        .with_timezone_name("Asia/Shanghai")
        .unwrap();
    let (scheduler, _) = scheduler_with(Arc::new(ScriptedRunner::succeeding()), config);

    let reference = Utc.with_ymd_and_hms(2099, 6, 1, 1, 0, 0).unwrap();
    let summary = scheduler
        .reload_at(&[TaskDefinition::new(1, "morning", "0 30 9 * * *")], reference)
        .await;

    // 09:30 in Shanghai is 01:30 UTC
    assert_eq!(
        summary.installed[0].next_fire_time,
        Some(Utc.with_ymd_and_hms(2099, 6, 1, 1, 30, 0).unwrap())
    );
    assert!(summary.installed[0].trigger.contains("Asia/Shanghai"));
}

#[tokio::test]
async fn test_unsatisfiable_expression_installs_without_fire_time() {
    let (scheduler, _) = scheduler_with(
        Arc::new(ScriptedRunner::succeeding()),
        SchedulerConfig::default(),
    );

    let summary = scheduler
        .reload_at(&[TaskDefinition::new(1, "never", "0 0 30 2 *")], far_future())
        .await;

    assert!(summary.is_clean());
    assert_eq!(summary.installed[0].next_fire_time, None);
}
