//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Building jobs from task definitions (reload)
//! - Firing jobs at their cron instants
//! - Enforcing at most one in-flight execution per job
//! - Reporting late firings as missed
//! - Retrying failed executions
//! - Pause, resume and graceful shutdown
//! - Event emission

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, oneshot};
use tokio::task::JoinHandle;

use crate::core::task::{ExecutionError, TaskDefinition, TaskRunner};
use crate::core::trigger::CronTrigger;
use crate::core::types::{JobId, RunId, TaskId};
use crate::events::{Event, EventListener, EventNotifier};

use super::job::{ExecutionGuard, Job, JobSnapshot, JobTable, ReloadSummary};
use super::types::{MIN_TICK_INTERVAL, SchedulerConfig, SchedulerError, SchedulerState};

/// Interval at which shutdown polls for in-flight executions.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A firing that won the job's execution guard.
struct Firing {
    job_id: JobId,
    task_id: TaskId,
    name: String,
    scheduled_at: DateTime<Utc>,
    guard: ExecutionGuard,
}

/// Outcome of evaluating one due job.
enum Dispatch {
    Fire(Firing),
    Missed(Event),
    Skipped(Event),
}

/// Cron scheduler.
///
/// Cheap to clone; clones share the same job table and loop.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use crontide::{LoggingListener, Scheduler, TaskDefinition};
/// use crontide::testing::ScriptedRunner;
///
/// # async fn demo() {
/// let scheduler = Scheduler::new(Arc::new(ScriptedRunner::succeeding()))
///     .with_listener(Arc::new(LoggingListener::new()));
///
/// scheduler
///     .reload(&[TaskDefinition::new(1, "crawl", "*/5 * * * *")])
///     .await;
/// scheduler.start().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: SchedulerConfig,
    runner: Arc<dyn TaskRunner>,
    notifier: EventNotifier,
    jobs: RwLock<JobTable>,
    state: RwLock<SchedulerState>,
    /// Wakes the loop when the table changes.
    wake: Notify,
    /// Currently running executions mapped to (JobId, Handle).
    #[allow(clippy::type_complexity)]
    running_jobs: RwLock<HashMap<RunId, (JobId, JoinHandle<()>)>>,
    /// Shutdown signal and handle of the scheduling loop while started.
    main_loop: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new(runner: Arc<dyn TaskRunner>) -> Self {
        Self::with_config(runner, SchedulerConfig::default())
    }

    /// Create a scheduler with the given configuration.
    pub fn with_config(runner: Arc<dyn TaskRunner>, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runner,
                notifier: EventNotifier::new(),
                jobs: RwLock::new(JobTable::default()),
                state: RwLock::new(SchedulerState::Stopped),
                wake: Notify::new(),
                running_jobs: RwLock::new(HashMap::new()),
                main_loop: Mutex::new(None),
            }),
        }
    }

    /// Set the event listener.
    pub fn with_listener(self, listener: Arc<dyn EventListener>) -> Self {
        self.set_listener(listener);
        self
    }

    /// Register the event listener, replacing any previous one.
    pub fn set_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.notifier.set_listener(listener);
    }

    /// Get the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.inner.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        self.state().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        self.state().await == SchedulerState::Paused
    }

    /// Start the scheduling loop.
    ///
    /// Calling `start` on a started scheduler does nothing. Jobs whose next
    /// fire instant already passed while stopped are rescheduled from now.
    pub async fn start(&self) {
        let mut main_loop = self.inner.main_loop.lock().await;
        if main_loop.is_some() {
            tracing::debug!("Scheduler already started");
            return;
        }

        let now = Utc::now();
        {
            let mut jobs = self.inner.jobs.write().await;
            for job in jobs.values_mut() {
                if !job.paused && job.next_fire_time.is_some_and(|due| due < now) {
                    job.next_fire_time = job.trigger.next_from(now);
                }
            }
        }

        *self.inner.state.write().await = SchedulerState::Running;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run(shutdown_rx).await;
        });
        *main_loop = Some((shutdown_tx, handle));
        drop(main_loop);

        tracing::info!(
            timezone = %self.inner.config.timezone,
            tick_interval = ?self.inner.config.tick_interval,
            "Scheduler started"
        );
        self.inner.notifier.notify(Event::engine_started());
    }

    /// Stop the scheduling loop.
    ///
    /// No further firings happen once this returns. In-flight executions are
    /// not cancelled; `stop` waits for them up to the shutdown timeout.
    /// Calling `stop` on a stopped scheduler does nothing.
    pub async fn stop(&self) {
        // Held until shutdown completes so a concurrent `start` waits for it.
        let mut main_loop = self.inner.main_loop.lock().await;
        let Some((shutdown_tx, handle)) = main_loop.take() else {
            tracing::debug!("Scheduler already stopped");
            return;
        };

        *self.inner.state.write().await = SchedulerState::Stopped;
        let _ = shutdown_tx.send(());
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Scheduler loop terminated abnormally");
        }

        self.inner.await_running_jobs().await;
        drop(main_loop);

        tracing::info!("Scheduler stopped");
        self.inner.notifier.notify(Event::engine_stopped());
    }

    /// Pause the scheduler.
    ///
    /// While paused, no job is evaluated. Firings that fall due during the
    /// pause are reported as missed on resume once their grace window has
    /// elapsed. Does nothing unless the scheduler is running.
    pub async fn pause(&self) {
        let mut state = self.inner.state.write().await;
        match *state {
            SchedulerState::Stopped => tracing::debug!("Scheduler not running, pause ignored"),
            SchedulerState::Paused => {}
            SchedulerState::Running => {
                *state = SchedulerState::Paused;
                drop(state);
                tracing::info!("Scheduler paused");
                self.inner.notifier.notify(Event::engine_paused());
            }
        }
    }

    /// Resume the scheduler after being paused.
    ///
    /// Does nothing unless the scheduler is paused.
    pub async fn resume(&self) {
        let mut state = self.inner.state.write().await;
        match *state {
            SchedulerState::Stopped => tracing::debug!("Scheduler not running, resume ignored"),
            SchedulerState::Running => {}
            SchedulerState::Paused => {
                *state = SchedulerState::Running;
                drop(state);
                tracing::info!("Scheduler resumed");
                self.inner.notifier.notify(Event::engine_resumed());
                self.inner.wake.notify_one();
            }
        }
    }

    /// Replace every job with jobs built from `tasks`, scheduling from now.
    pub async fn reload(&self, tasks: &[TaskDefinition]) -> ReloadSummary {
        self.reload_at(tasks, Utc::now()).await
    }

    /// Replace every job with jobs built from `tasks`.
    ///
    /// Disabled tasks and tasks with an empty cron are skipped. A task whose
    /// cron cannot be parsed is reported and skipped; the rest of the batch
    /// is still installed. First fire instants are computed inclusively from
    /// `reference`.
    pub async fn reload_at(
        &self,
        tasks: &[TaskDefinition],
        reference: DateTime<Utc>,
    ) -> ReloadSummary {
        let mut events = Vec::new();
        let mut rejected = Vec::new();

        let installed = {
            let mut jobs = self.inner.jobs.write().await;

            for job in jobs.drain() {
                events.push(Event::job_removed(&job.id, &job.name));
            }

            for task in tasks.iter().filter(|task| task.is_schedulable()) {
                match self.inner.build_job(task, reference) {
                    Ok(job) => {
                        let event = if jobs.get(&job.id).is_some() {
                            Event::job_modified(&job.id, &job.name)
                        } else {
                            Event::job_added(&job.id, &job.name)
                        };
                        jobs.insert(job);
                        events.push(event);
                    }
                    Err(e) => {
                        events.push(Event::invalid_cron(
                            &JobId::for_task(task.id),
                            &task.name,
                            e.to_string(),
                        ));
                        rejected.push(e);
                    }
                }
            }

            jobs.snapshots()
        };

        for event in events {
            self.inner.notifier.notify(event);
        }
        self.inner
            .notifier
            .notify(Event::reload_completed(installed.clone()));
        self.inner.wake.notify_one();

        tracing::info!(
            installed = installed.len(),
            rejected = rejected.len(),
            "Jobs reloaded"
        );

        ReloadSummary {
            installed,
            rejected,
        }
    }

    /// Add or replace the job for a single task.
    ///
    /// Returns `Ok(None)` and removes any existing job when the task is
    /// disabled or has no cron.
    pub async fn add_task(
        &self,
        task: &TaskDefinition,
    ) -> Result<Option<JobSnapshot>, SchedulerError> {
        let job_id = JobId::for_task(task.id);

        if !task.is_schedulable() {
            let removed = self.inner.jobs.write().await.remove(&job_id);
            if let Some(job) = removed {
                self.inner
                    .notifier
                    .notify(Event::job_removed(&job.id, &job.name));
            }
            return Ok(None);
        }

        let job = match self.inner.build_job(task, Utc::now()) {
            Ok(job) => job,
            Err(e) => {
                self.inner
                    .notifier
                    .notify(Event::invalid_cron(&job_id, &task.name, e.to_string()));
                return Err(e);
            }
        };

        let snapshot = job.snapshot();
        let replaced = self.inner.jobs.write().await.insert(job);
        let event = if replaced {
            Event::job_modified(&snapshot.id, &snapshot.name)
        } else {
            Event::job_added(&snapshot.id, &snapshot.name)
        };
        self.inner.notifier.notify(event);
        self.inner.wake.notify_one();

        Ok(Some(snapshot))
    }

    /// Remove a job.
    pub async fn remove_job(&self, id: &JobId) -> Result<(), SchedulerError> {
        let job = self
            .inner
            .jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;

        self.inner
            .notifier
            .notify(Event::job_removed(&job.id, &job.name));
        Ok(())
    }

    /// Remove every job, returning how many were removed.
    pub async fn remove_all_jobs(&self) -> usize {
        let removed = self.inner.jobs.write().await.drain();
        for job in &removed {
            self.inner
                .notifier
                .notify(Event::job_removed(&job.id, &job.name));
        }
        removed.len()
    }

    /// Stop a single job from firing until resumed.
    pub async fn pause_job(&self, id: &JobId) -> Result<JobSnapshot, SchedulerError> {
        let snapshot = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            job.pause();
            job.snapshot()
        };

        tracing::info!(job_id = %id, "Job paused");
        self.inner
            .notifier
            .notify(Event::job_paused(&snapshot.id, &snapshot.name));
        Ok(snapshot)
    }

    /// Resume a paused job, scheduling its next firing from now.
    pub async fn resume_job(&self, id: &JobId) -> Result<JobSnapshot, SchedulerError> {
        let snapshot = {
            let mut jobs = self.inner.jobs.write().await;
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            job.resume(Utc::now());
            job.snapshot()
        };

        tracing::info!(job_id = %id, next_fire_time = ?snapshot.next_fire_time, "Job resumed");
        self.inner
            .notifier
            .notify(Event::job_resumed(&snapshot.id, &snapshot.name));
        self.inner.wake.notify_one();
        Ok(snapshot)
    }

    /// Snapshots of every job, sorted by task id.
    pub async fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner.jobs.read().await.snapshots()
    }

    /// Snapshot of a single job.
    pub async fn get_job(&self, id: &JobId) -> Option<JobSnapshot> {
        self.inner.jobs.read().await.get(id).map(|job| job.snapshot())
    }

    /// Number of executions currently in flight.
    pub async fn running_count(&self) -> usize {
        let mut running = self.inner.running_jobs.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());
        running.len()
    }

    /// Dispatch every job due at `now`.
    ///
    /// The scheduling loop calls this with the current time; hosts driving
    /// their own clock can call it directly. Does nothing unless the
    /// scheduler is running.
    pub async fn run_pending_at(&self, now: DateTime<Utc>) {
        self.inner.run_pending_at(now).await;
    }
}

impl Inner {
    /// Main scheduler loop.
    async fn run(self: Arc<Self>, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            let delay = self.time_until_next_check(Utc::now()).await;

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            self.run_pending_at(Utc::now()).await;
            self.cleanup_finished_jobs().await;
        }

        tracing::debug!("Scheduler loop exited");
    }

    /// Sleep until the earliest next fire instant, capped at the tick interval.
    async fn time_until_next_check(&self, now: DateTime<Utc>) -> Duration {
        let tick = self.config.tick_interval.max(MIN_TICK_INTERVAL);
        if *self.state.read().await != SchedulerState::Running {
            return tick;
        }

        match self.jobs.read().await.earliest_fire_time() {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO).min(tick),
            None => tick,
        }
    }

    fn build_job(
        &self,
        task: &TaskDefinition,
        reference: DateTime<Utc>,
    ) -> Result<Job, SchedulerError> {
        let trigger = CronTrigger::parse(&task.cron, self.config.timezone).map_err(|source| {
            tracing::warn!(
                task_id = %task.id,
                task_name = %task.name,
                expression = %task.cron,
                error = %source,
                "Rejected cron expression"
            );
            SchedulerError::InvalidCronExpression {
                task_id: task.id,
                task_name: task.name.clone(),
                expression: task.cron.clone(),
                source,
            }
        })?;

        Ok(Job::new(task, Arc::new(trigger), reference))
    }

    /// Evaluate every job due at `now`.
    ///
    /// Each due job is advanced to its next instant strictly after `now`, so
    /// a backlog of missed instants collapses into a single decision.
    async fn run_pending_at(self: &Arc<Self>, now: DateTime<Utc>) {
        if *self.state.read().await != SchedulerState::Running {
            return;
        }

        let grace = TimeDelta::from_std(self.config.misfire_grace).unwrap_or(TimeDelta::MAX);
        let mut dispatches = Vec::new();
        {
            let mut jobs = self.jobs.write().await;
            let mut due: Vec<&mut Job> = jobs.values_mut().filter(|job| job.is_due(now)).collect();
            due.sort_by_key(|job| (job.next_fire_time, job.task_id));

            for job in due {
                let Some(scheduled_at) = job.next_fire_time else {
                    continue;
                };
                job.next_fire_time = job.trigger.next_after(now);

                let dispatch = if now - scheduled_at > grace {
                    tracing::warn!(
                        job_id = %job.id,
                        scheduled_at = %scheduled_at,
                        now = %now,
                        "Run time of job was missed"
                    );
                    Dispatch::Missed(Event::execution_missed(&job.id, &job.name, scheduled_at))
                } else if let Some(guard) = job.try_begin_execution() {
                    Dispatch::Fire(Firing {
                        job_id: job.id.clone(),
                        task_id: job.task_id,
                        name: job.name.clone(),
                        scheduled_at,
                        guard,
                    })
                } else {
                    tracing::warn!(
                        job_id = %job.id,
                        scheduled_at = %scheduled_at,
                        "Previous execution still running, skipping"
                    );
                    Dispatch::Skipped(Event::execution_skipped(&job.id, &job.name, scheduled_at))
                };
                dispatches.push(dispatch);
            }
        }

        for dispatch in dispatches {
            match dispatch {
                Dispatch::Fire(firing) => self.spawn_execution(firing).await,
                Dispatch::Missed(event) | Dispatch::Skipped(event) => self.notifier.notify(event),
            }
        }
    }

    async fn spawn_execution(self: &Arc<Self>, firing: Firing) {
        let run_id = RunId::new();
        tracing::info!(
            job_id = %firing.job_id,
            run_id = %run_id,
            scheduled_at = %firing.scheduled_at,
            "Triggering scheduled job"
        );
        self.notifier.notify(Event::execution_started(
            &firing.job_id,
            &firing.name,
            &run_id,
            firing.scheduled_at,
        ));

        let job_id = firing.job_id.clone();
        let inner = Arc::clone(self);
        let exec_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            inner.execute(firing, exec_run_id).await;
        });

        self.running_jobs
            .write()
            .await
            .insert(run_id, (job_id, handle));
    }

    /// Run a firing to completion, including retries.
    ///
    /// The job's guard is held until the last attempt concludes.
    async fn execute(self: Arc<Self>, firing: Firing, run_id: RunId) {
        let Firing {
            job_id,
            task_id,
            name,
            guard: _guard,
            ..
        } = firing;

        let start = std::time::Instant::now();
        let error = match self.invoke(task_id, &name).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, run_id = %run_id, duration = ?start.elapsed(), "Job executed successfully");
                self.notifier
                    .notify(Event::execution_succeeded(&job_id, &name, &run_id));
                return;
            }
            Err(e) => e,
        };

        tracing::warn!(job_id = %job_id, run_id = %run_id, error = %error, "Job execution failed");
        self.notifier.notify(Event::execution_failed(
            &job_id,
            &name,
            &run_id,
            error.to_string(),
        ));

        let policy = &self.config.retry;
        let mut retries = 0;
        while policy.should_retry(retries) {
            retries += 1;
            let delay = policy.get_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.invoke(task_id, &name).await {
                Ok(()) => {
                    tracing::info!(job_id = %job_id, run_id = %run_id, attempt = retries, "Retry succeeded");
                    self.notifier
                        .notify(Event::retry_succeeded(&job_id, &name, &run_id, retries));
                    return;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, run_id = %run_id, attempt = retries, error = %e, "Retry failed");
                    self.notifier.notify(Event::retry_failed(
                        &job_id,
                        &name,
                        &run_id,
                        retries,
                        e.to_string(),
                    ));
                }
            }
        }
    }

    /// Invoke the runner on its own task so a panic surfaces as a failure.
    async fn invoke(&self, task_id: TaskId, name: &str) -> Result<(), ExecutionError> {
        let runner = Arc::clone(&self.runner);
        let name = name.to_string();
        match tokio::spawn(async move { runner.execute(task_id, &name).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ExecutionError::ExecutionFailed(
                "execution panicked".to_string(),
            )),
            Err(e) => Err(ExecutionError::ExecutionFailed(e.to_string())),
        }
    }

    /// Clean up finished execution handles.
    async fn cleanup_finished_jobs(&self) {
        let mut running = self.running_jobs.write().await;
        running.retain(|_, (_, handle)| !handle.is_finished());
    }

    /// Wait for all running executions to complete with a timeout.
    async fn await_running_jobs(&self) {
        let running_count = self.running_jobs.read().await.len();

        if running_count == 0 {
            tracing::info!("No running jobs to wait for during shutdown");
            return;
        }

        tracing::info!(
            "Graceful shutdown: waiting for {} running job(s) to complete (timeout: {:?})",
            running_count,
            self.config.shutdown_timeout
        );

        let start = tokio::time::Instant::now();
        let deadline = start + self.config.shutdown_timeout;

        loop {
            let mut running = self.running_jobs.write().await;
            running.retain(|_, (_, handle)| !handle.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                tracing::info!("All running jobs completed gracefully in {:?}", start.elapsed());
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Graceful shutdown timeout ({:?}) exceeded with {} job(s) still running",
                    self.config.shutdown_timeout,
                    remaining
                );
                break;
            }

            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
