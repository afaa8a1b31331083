// crates/jobs/src/registry.rs
//! In-memory store of job records for one job kind.
//!
//! All methods are synchronous and never suspend: they only read/write
//! in-memory state under a short-lived mutex, so no registry mutation can
//! interleave mid-mutation even under concurrent tasks. The registry is a
//! passive sink — it enforces the single-active-job invariant and the
//! terminal-state discipline, and nothing else (no progress monotonicity,
//! no retries).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use crate::types::{Job, JobId, JobStatus};

/// Default number of terminal jobs retained for inspection.
pub const DEFAULT_MAX_COMPLETED_JOBS: usize = 10;

struct RegistryInner<D, P, R> {
    jobs: HashMap<JobId, Job<D, P, R>>,
    /// Insertion order, for deterministic listings and eviction tiebreaks.
    order: Vec<JobId>,
    /// The job returned by the most recent successful `create_job`, cleared
    /// on its terminal transition.
    active: Option<JobId>,
}

/// Store of job records, generic over the job-data, progress and result
/// types so the same engine backs multiple job kinds without duplicated
/// state-machine logic. One registry instance tracks jobs of one kind.
pub struct JobRegistry<D, P, R> {
    inner: Mutex<RegistryInner<D, P, R>>,
    max_completed_jobs: usize,
}

impl<D, P, R> JobRegistry<D, P, R>
where
    D: Clone,
    P: Clone,
    R: Clone,
{
    pub fn new(max_completed_jobs: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                jobs: HashMap::new(),
                order: Vec::new(),
                active: None,
            }),
            max_completed_jobs,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner<D, P, R>> {
        // A poisoned lock still holds consistent data: every mutation below
        // completes without intermediate states visible across the guard.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new `Pending` job, or `None` if an active job already
    /// exists for this registry. Runs the eviction policy as a side effect.
    pub fn create_job(&self, data: D) -> Option<Job<D, P, R>> {
        let mut inner = self.lock();
        if let Some(active_id) = &inner.active {
            if inner
                .jobs
                .get(active_id)
                .is_some_and(|job| !job.is_terminal())
            {
                return None;
            }
        }

        evict_terminal(&mut inner, self.max_completed_jobs);

        let job = Job::new(data);
        inner.order.push(job.id.clone());
        inner.active = Some(job.id.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        Some(job)
    }

    /// Pure lookup, no side effects.
    pub fn get_job(&self, id: &str) -> Option<Job<D, P, R>> {
        self.lock().jobs.get(id).cloned()
    }

    /// The currently tracked active job, or `None` once it has reached a
    /// terminal state.
    pub fn get_active_job(&self) -> Option<Job<D, P, R>> {
        let inner = self.lock();
        let id = inner.active.as_ref()?;
        inner.jobs.get(id).cloned()
    }

    /// True iff the active job exists and is `Pending` or `Running`.
    pub fn has_active_job(&self) -> bool {
        let inner = self.lock();
        inner
            .active
            .as_ref()
            .and_then(|id| inner.jobs.get(id))
            .is_some_and(|job| !job.is_terminal())
    }

    /// Set the status with no other field changes. Used exactly once per
    /// job, for the `Pending -> Running` transition. A job already terminal
    /// is left alone: a cancel can land between creation and the runner's
    /// transition.
    pub fn update_status(&self, id: &str, status: JobStatus) {
        if let Some(job) = self.lock().jobs.get_mut(id) {
            if job.is_terminal() {
                return;
            }
            job.status = status;
        }
    }

    /// Overwrite the last-known progress and stamp `last_progress_update`.
    /// No status change and no monotonicity validation: last write wins.
    pub fn update_progress(&self, id: &str, progress: P) {
        if let Some(job) = self.lock().jobs.get_mut(id) {
            job.progress = Some(progress);
            job.last_progress_update = Some(Utc::now());
        }
    }

    /// Terminal transition to `Completed` with a result payload.
    pub fn complete_job(&self, id: &str, result: R) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(id) else {
            return;
        };
        if job.is_terminal() {
            // Terminal jobs are never mutated further (a body may finish a
            // final in-flight unit after an external cancel).
            return;
        }
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job.completed_at = Some(Utc::now());
        clear_active_if(&mut inner, id);
    }

    /// Terminal transition to `Failed` with a human-readable message.
    pub fn fail_job(&self, id: &str, error: impl Into<String>) {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(id) else {
            return;
        };
        if job.is_terminal() {
            return;
        }
        job.status = JobStatus::Failed;
        job.error = Some(error.into());
        job.completed_at = Some(Utc::now());
        clear_active_if(&mut inner, id);
    }

    /// Cancel a `Pending` or `Running` job: trigger its cancellation token
    /// and transition to `Cancelled`. Returns `false` for unknown jobs and
    /// jobs already terminal — a no-op signal, not an error.
    pub fn cancel_job(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(id) else {
            return false;
        };
        if job.is_terminal() {
            return false;
        }
        job.cancel.cancel();
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        clear_active_if(&mut inner, id);
        true
    }

    /// True if the job is `Cancelled` or its token has been triggered
    /// independently (a body may observe cancellation before the registry
    /// transition is visible).
    pub fn is_job_cancelled(&self, id: &str) -> bool {
        self.lock()
            .jobs
            .get(id)
            .is_some_and(|job| job.status == JobStatus::Cancelled || job.cancel.is_cancelled())
    }

    /// Diagnostic aggregate over all retained jobs.
    pub fn job_count_by_status(&self) -> HashMap<JobStatus, usize> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for job in inner.jobs.values() {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    /// All retained jobs in insertion order.
    pub fn all_jobs(&self) -> Vec<Job<D, P, R>> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }
}

impl<D, P, R> Default for JobRegistry<D, P, R>
where
    D: Clone,
    P: Clone,
    R: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPLETED_JOBS)
    }
}

fn clear_active_if<D, P, R>(inner: &mut RegistryInner<D, P, R>, id: &str) {
    if inner.active.as_deref() == Some(id) {
        inner.active = None;
    }
}

/// Among terminal jobs, retain only the `max` most recently completed (by
/// `completed_at`, insertion order as tiebreak); evict the rest. Non-terminal
/// jobs are never evicted. Bounds memory for a long-lived process.
fn evict_terminal<D, P, R>(inner: &mut RegistryInner<D, P, R>, max: usize) {
    let mut terminal: Vec<(usize, JobId)> = inner
        .order
        .iter()
        .enumerate()
        .filter(|(_, id)| inner.jobs.get(*id).is_some_and(|job| job.is_terminal()))
        .map(|(idx, id)| (idx, id.clone()))
        .collect();
    if terminal.len() <= max {
        return;
    }

    // Most recently completed first.
    terminal.sort_by(|(a_idx, a_id), (b_idx, b_id)| {
        let a_done = inner.jobs.get(a_id).and_then(|j| j.completed_at);
        let b_done = inner.jobs.get(b_id).and_then(|j| j.completed_at);
        b_done.cmp(&a_done).then(b_idx.cmp(a_idx))
    });

    for (_, id) in terminal.into_iter().skip(max) {
        inner.jobs.remove(&id);
        inner.order.retain(|existing| existing != &id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Progress;
    use pretty_assertions::assert_eq;

    type TestRegistry = JobRegistry<String, Progress, u64>;

    #[test]
    fn test_create_rejects_second_active_job() {
        let registry = TestRegistry::default();
        let first = registry.create_job("a".into()).expect("first job");
        assert!(registry.has_active_job());
        assert!(registry.create_job("b".into()).is_none());

        // Any terminal state frees the slot again.
        registry.complete_job(&first.id, 1);
        assert!(!registry.has_active_job());
        assert!(registry.create_job("c".into()).is_some());
    }

    #[test]
    fn test_create_succeeds_after_failure_and_cancellation() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        registry.fail_job(&job.id, "boom");
        let job = registry.create_job("b".into()).unwrap();
        assert!(registry.cancel_job(&job.id));
        assert!(registry.create_job("c".into()).is_some());
    }

    #[test]
    fn test_active_job_tracking() {
        let registry = TestRegistry::default();
        assert!(registry.get_active_job().is_none());

        let job = registry.create_job("a".into()).unwrap();
        assert_eq!(registry.get_active_job().unwrap().id, job.id);

        registry.complete_job(&job.id, 7);
        // Terminal transition clears the active pointer but retains the job.
        assert!(registry.get_active_job().is_none());
        assert_eq!(registry.get_job(&job.id).unwrap().result, Some(7));
    }

    #[test]
    fn test_update_status_changes_nothing_else() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        registry.update_status(&job.id, JobStatus::Running);

        let stored = registry.get_job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert!(stored.completed_at.is_none());
        assert!(stored.progress.is_none());
        // Still active: Running is not terminal.
        assert!(registry.has_active_job());
    }

    #[test]
    fn test_update_progress_is_last_write_wins() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();

        registry.update_progress(&job.id, Progress::new("s", 5, 10, ""));
        // Out-of-order report: the registry does not enforce monotonicity.
        registry.update_progress(&job.id, Progress::new("s", 2, 10, ""));

        let stored = registry.get_job(&job.id).unwrap();
        assert_eq!(stored.progress.unwrap().current, 2);
        assert!(stored.last_progress_update.is_some());
    }

    #[test]
    fn test_cancel_only_from_pending_or_running() {
        let registry = TestRegistry::default();
        assert!(!registry.cancel_job("no-such-id"));

        let job = registry.create_job("a".into()).unwrap();
        assert!(registry.cancel_job(&job.id));
        // Idempotent no-op on a terminal job.
        assert!(!registry.cancel_job(&job.id));

        let stored = registry.get_job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.completed_at.is_some());
        assert!(stored.result.is_none());
        assert!(stored.error.is_none());
        assert!(stored.cancel.is_cancelled());
        assert!(registry.is_job_cancelled(&job.id));
    }

    #[test]
    fn test_cancel_before_running_leaves_cancelled_record() {
        // create -> cancel with no update_status in between.
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(registry.cancel_job(&job.id));

        let stored = registry.get_job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.completed_at.is_some());
        assert!(stored.result.is_none());
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_update_status_never_resurrects_terminal_job() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        assert!(registry.cancel_job(&job.id));

        // Runner's pending -> running transition racing a cancel.
        registry.update_status(&job.id, JobStatus::Running);
        assert_eq!(
            registry.get_job(&job.id).unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_is_job_cancelled_sees_independent_token_trigger() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        // Token triggered without a registry transition (e.g. by the
        // timeout timer) must still be observable.
        job.cancel.cancel();
        assert!(registry.is_job_cancelled(&job.id));
        assert_eq!(
            registry.get_job(&job.id).unwrap().status,
            JobStatus::Pending
        );
    }

    #[test]
    fn test_terminal_jobs_are_never_mutated_further() {
        let registry = TestRegistry::default();
        let job = registry.create_job("a".into()).unwrap();
        assert!(registry.cancel_job(&job.id));
        let cancelled_at = registry.get_job(&job.id).unwrap().completed_at;

        registry.complete_job(&job.id, 9);
        registry.fail_job(&job.id, "late failure");

        let stored = registry.get_job(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert_eq!(stored.completed_at, cancelled_at);
        assert!(stored.result.is_none());
        assert!(stored.error.is_none());
    }

    #[test]
    fn test_cleanup_retains_most_recently_completed() {
        let registry = JobRegistry::<String, Progress, u64>::new(3);

        // Create and complete five jobs sequentially.
        let mut ids = Vec::new();
        for i in 0..5u64 {
            let job = registry.create_job(format!("job-{i}")).unwrap();
            registry.complete_job(&job.id, i);
            ids.push(job.id);
        }

        // A sixth (pending) job triggers eviction of the two oldest.
        let pending = registry.create_job("job-5".into()).unwrap();

        let all = registry.all_jobs();
        assert_eq!(all.len(), 4);
        let retained: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
        assert!(!retained.contains(&ids[0].as_str()));
        assert!(!retained.contains(&ids[1].as_str()));
        assert!(retained.contains(&ids[2].as_str()));
        assert!(retained.contains(&ids[3].as_str()));
        assert!(retained.contains(&ids[4].as_str()));
        assert!(retained.contains(&pending.id.as_str()));
    }

    #[test]
    fn test_cleanup_never_evicts_non_terminal_jobs() {
        let registry = JobRegistry::<String, Progress, u64>::new(1);
        let running = registry.create_job("long".into()).unwrap();
        registry.update_status(&running.id, JobStatus::Running);
        registry.cancel_job(&running.id);

        for i in 0..4u64 {
            let job = registry.create_job(format!("j{i}")).unwrap();
            registry.complete_job(&job.id, i);
        }

        // Only the single most recent terminal job survives, but every
        // create along the way kept the non-terminal one when it existed.
        let counts = registry.job_count_by_status();
        assert_eq!(counts.get(&JobStatus::Completed), Some(&1));
    }

    #[test]
    fn test_job_count_by_status() {
        let registry = TestRegistry::new(10);
        let a = registry.create_job("a".into()).unwrap();
        registry.complete_job(&a.id, 0);
        let b = registry.create_job("b".into()).unwrap();
        registry.fail_job(&b.id, "x");
        let _c = registry.create_job("c".into()).unwrap();

        let counts = registry.job_count_by_status();
        assert_eq!(counts.get(&JobStatus::Completed), Some(&1));
        assert_eq!(counts.get(&JobStatus::Failed), Some(&1));
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
        assert_eq!(counts.get(&JobStatus::Running), None);
    }

    #[test]
    fn test_get_job_unknown_id() {
        let registry = TestRegistry::default();
        assert!(registry.get_job("missing").is_none());
        assert!(!registry.is_job_cancelled("missing"));
    }
}
