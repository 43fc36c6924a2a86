//! Listener that renders events as `tracing` lines.

use tracing::{error, info, warn};

use super::{Event, EventKind, EventListener, ListenerError};

/// Logs every event through `tracing`.
///
/// Failures and missed firings are logged at `warn`/`error`; everything else
/// at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl LoggingListener {
    pub fn new() -> Self {
        Self
    }
}

impl EventListener for LoggingListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        let job_id = event.job_id.as_ref().map(|id| id.as_str()).unwrap_or("-");
        let job_name = event.job_name.as_deref().unwrap_or("-");

        match event.kind {
            EventKind::ExecutionStarted => {
                info!(
                    job_id,
                    job_name,
                    run_id = ?event.run_id.as_ref().map(ToString::to_string),
                    scheduled_at = ?event.scheduled_at,
                    "Job '{}' started",
                    job_name
                );
            }
            EventKind::ExecutionFailed | EventKind::RetryFailed => {
                error!(
                    job_id,
                    job_name,
                    attempt = ?event.attempt,
                    error = event.error.as_deref().unwrap_or(""),
                    "{}",
                    event.kind
                );
            }
            EventKind::ReloadCompleted => {
                info!(jobs = event.jobs.len(), "{}", event.kind);
                for job in &event.jobs {
                    let next = job
                        .next_fire_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    info!("  {} '{}' next run at {}", job.id, job.name, next);
                }
            }
            kind if kind.is_warning() => {
                warn!(
                    job_id,
                    job_name,
                    scheduled_at = ?event.scheduled_at,
                    error = event.error.as_deref().unwrap_or(""),
                    "{}",
                    kind
                );
            }
            kind => {
                info!(job_id, job_name, attempt = ?event.attempt, "{}", kind);
            }
        }
        Ok(())
    }
}
