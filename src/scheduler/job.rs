//! Scheduled jobs and the job table.
//!
//! A [`Job`] binds one task to its trigger and tracks the next fire instant
//! and whether an execution is in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::task::TaskDefinition;
use crate::core::trigger::Trigger;
use crate::core::types::{JobId, TaskId};

use super::types::SchedulerError;

/// Point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub task_id: TaskId,
    pub name: String,
    /// Human-readable trigger description.
    pub trigger: String,
    /// `None` when paused or when the trigger has no future instant.
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Whether an execution (including retries) is in flight.
    pub executing: bool,
    pub paused: bool,
}

/// Result of a reload.
#[derive(Debug, Clone, Default)]
pub struct ReloadSummary {
    /// Jobs installed by the reload, sorted by task id.
    pub installed: Vec<JobSnapshot>,
    /// Tasks whose cron expression was rejected, in input order.
    pub rejected: Vec<SchedulerError>,
}

impl ReloadSummary {
    /// Whether every schedulable task was installed.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// A task bound to its trigger.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) id: JobId,
    pub(crate) task_id: TaskId,
    pub(crate) name: String,
    pub(crate) trigger: Arc<dyn Trigger>,
    pub(crate) next_fire_time: Option<DateTime<Utc>>,
    pub(crate) paused: bool,
    executing: Arc<AtomicBool>,
}

impl Job {
    /// Create a job for a task with its first fire instant computed from `reference`.
    pub(crate) fn new(
        task: &TaskDefinition,
        trigger: Arc<dyn Trigger>,
        reference: DateTime<Utc>,
    ) -> Self {
        let next_fire_time = trigger.next_from(reference);
        Self {
            id: JobId::for_task(task.id),
            task_id: task.id,
            name: task.name.clone(),
            trigger,
            next_fire_time,
            paused: false,
            executing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the job should fire at or before `now`.
    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.next_fire_time.is_some_and(|due| due <= now)
    }

    pub(crate) fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Try to mark the job as executing.
    ///
    /// Returns `None` if a previous execution still holds the guard.
    pub(crate) fn try_begin_execution(&self) -> Option<ExecutionGuard> {
        ExecutionGuard::try_acquire(&self.executing)
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
        self.next_fire_time = None;
    }

    pub(crate) fn resume(&mut self, reference: DateTime<Utc>) {
        self.paused = false;
        self.next_fire_time = self.trigger.next_from(reference);
    }

    pub(crate) fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            task_id: self.task_id,
            name: self.name.clone(),
            trigger: self.trigger.describe(),
            next_fire_time: self.next_fire_time,
            executing: self.is_executing(),
            paused: self.paused,
        }
    }
}

/// Marks a job as executing until dropped.
///
/// Dropping clears the flag, including when the holding task unwinds.
#[derive(Debug)]
pub(crate) struct ExecutionGuard {
    flag: Arc<AtomicBool>,
}

impl ExecutionGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// All installed jobs, keyed by job id.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    jobs: HashMap<JobId, Job>,
}

impl JobTable {
    /// Insert a job, returning `true` if it replaced an existing one.
    pub(crate) fn insert(&mut self, job: Job) -> bool {
        self.jobs.insert(job.id.clone(), job).is_some()
    }

    pub(crate) fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    /// Remove every job, returned in task id order.
    pub(crate) fn drain(&mut self) -> Vec<Job> {
        let mut removed: Vec<Job> = self.jobs.drain().map(|(_, job)| job).collect();
        removed.sort_by_key(|job| job.task_id);
        removed
    }

    pub(crate) fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Earliest next fire instant among active jobs.
    pub(crate) fn earliest_fire_time(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|job| !job.paused)
            .filter_map(|job| job.next_fire_time)
            .min()
    }

    /// Snapshots of every job, sorted by task id.
    pub(crate) fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self.jobs.values().map(Job::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.task_id);
        snapshots
    }
}
