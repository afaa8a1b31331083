// crates/jobs/src/runner.rs
//! Background execution with timeout and stall supervision.
//!
//! [`JobRunner::start`] bridges a `Pending` job to a terminal state: it
//! creates the registry record, spawns the async body, arms a forced-failure
//! timeout and a periodic stall check, and translates the body's outcome
//! into exactly one terminal registry transition. The body never transitions
//! the registry directly.

use std::sync::Arc;
use std::time::Duration;

use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::types::{Job, JobId, JobStatus};

/// Hard bounds for the per-invocation timeout.
pub const MIN_JOB_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Temporal policies applied to every job started through a runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Forced-failure deadline; generous enough to absorb several
    /// retry/backoff cooldowns inside the body.
    pub timeout: Duration,
    /// How often the stall check runs.
    pub stall_check_interval: Duration,
    /// A running job with no progress report for this long is logged as
    /// stalled. Observability only — never a terminal transition.
    pub stall_threshold: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(35 * 60),
            stall_check_interval: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(3 * 60),
        }
    }
}

/// Handle passed to a job body: its identity, its registry and its
/// cancellation token. The progress sink lives here so every report goes
/// through the cancellation check.
pub struct JobContext<D, P, R> {
    job_id: JobId,
    registry: Arc<JobRegistry<D, P, R>>,
}

impl<D, P, R> Clone for JobContext<D, P, R> {
    fn clone(&self) -> Self {
        Self {
            job_id: self.job_id.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<D, P, R> JobContext<D, P, R>
where
    D: Clone,
    P: Clone,
    R: Clone,
{
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// True once the job has been cancelled, whether via the registry or by
    /// an independent token trigger (e.g. the timeout timer).
    pub fn is_cancelled(&self) -> bool {
        self.registry.is_job_cancelled(&self.job_id)
    }

    /// Forward one progress update to the registry.
    ///
    /// Checks cancellation first: a cancelled job aborts at its next report
    /// with the distinguished [`JobError::Cancelled`] signal, so cancellation
    /// is observed at the granularity of one unit of work and partial
    /// per-unit writes are never torn.
    pub fn report(&self, progress: P) -> Result<(), JobError> {
        if self.registry.is_job_cancelled(&self.job_id) {
            return Err(JobError::Cancelled);
        }
        self.registry.update_progress(&self.job_id, progress);
        Ok(())
    }
}

/// Runner wiring a strategy body to a registry entry.
///
/// Stateless apart from its config; the registry is injected per call so
/// several managers can share one runner configuration.
#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    config: JobRunnerConfig,
}

impl JobRunner {
    pub fn new(config: JobRunnerConfig) -> Self {
        Self { config }
    }

    /// Start a new background job.
    ///
    /// Returns `None` when the registry already tracks an active job. On
    /// success the returned snapshot is `Pending`; the body runs detached
    /// and the caller polls the registry for progress and the outcome.
    pub fn start<D, P, R, F, Fut>(
        &self,
        registry: &Arc<JobRegistry<D, P, R>>,
        data: D,
        timeout: Option<Duration>,
        body: F,
    ) -> Option<Job<D, P, R>>
    where
        D: Clone + Send + Sync + 'static,
        P: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(JobContext<D, P, R>) -> Fut,
        Fut: std::future::Future<Output = Result<R, JobError>> + Send + 'static,
    {
        let job = registry.create_job(data)?;
        let job_id = job.id.clone();
        let timeout = timeout
            .unwrap_or(self.config.timeout)
            .clamp(MIN_JOB_TIMEOUT, MAX_JOB_TIMEOUT);

        let timeout_handle = spawn_timeout(Arc::clone(registry), job_id.clone(), timeout);
        let stall_handle = spawn_stall_check(
            Arc::clone(registry),
            job_id.clone(),
            self.config.stall_check_interval,
            self.config.stall_threshold,
        );

        let ctx = JobContext {
            job_id: job_id.clone(),
            registry: Arc::clone(registry),
        };
        let fut = body(ctx);

        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            registry.update_status(&job_id, JobStatus::Running);
            let outcome = fut.await;

            match outcome {
                Ok(result) => {
                    registry.complete_job(&job_id, result);
                    tracing::info!(job_id = %job_id, "job completed");
                }
                Err(JobError::Cancelled) => {
                    // Cancellation detected inside the body. If the registry
                    // transition already happened (explicit cancel_job) this
                    // is a no-op.
                    if registry
                        .get_job(&job_id)
                        .is_some_and(|j| j.status != JobStatus::Cancelled)
                    {
                        registry.cancel_job(&job_id);
                    }
                    tracing::info!(job_id = %job_id, "job cancelled");
                }
                Err(err) => {
                    let message = err.to_string();
                    tracing::error!(job_id = %job_id, error = %message, "job failed");
                    registry.fail_job(&job_id, message);
                }
            }

            // Guaranteed timer cleanup on every terminal path: a dangling
            // timer must never fire against a finished job.
            timeout_handle.abort();
            stall_handle.abort();
        });

        Some(job)
    }
}

fn spawn_timeout<D, P, R>(
    registry: Arc<JobRegistry<D, P, R>>,
    job_id: JobId,
    timeout: Duration,
) -> tokio::task::JoinHandle<()>
where
    D: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(job) = registry.get_job(&job_id) else {
            return;
        };
        if job.is_terminal() {
            return;
        }
        // Stop the still-running body, then record the failure.
        job.cancel.cancel();
        let message = format!("Job timed out after {}", format_duration(timeout));
        tracing::warn!(job_id = %job_id, timeout_secs = timeout.as_secs(), "job timed out");
        registry.fail_job(&job_id, message);
    })
}

fn spawn_stall_check<D, P, R>(
    registry: Arc<JobRegistry<D, P, R>>,
    job_id: JobId,
    check_interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()>
where
    D: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_interval);
        interval.tick().await; // first tick completes immediately
        loop {
            interval.tick().await;
            let Some(job) = registry.get_job(&job_id) else {
                return;
            };
            if job.is_terminal() {
                return;
            }
            if job.status != JobStatus::Running {
                continue;
            }
            let last = job.last_progress_update.unwrap_or(job.started_at);
            let silent_for = chrono::Utc::now().signed_duration_since(last);
            if silent_for.num_seconds() >= threshold.as_secs() as i64 {
                // Warning only: the job is left to either make progress or
                // eventually hit the timeout.
                tracing::warn!(
                    job_id = %job_id,
                    silent_secs = silent_for.num_seconds(),
                    has_reported = job.progress.is_some(),
                    "job appears stalled"
                );
            }
        }
    })
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" })
    } else {
        format!("{secs} seconds")
    }
}
