// crates/jobs/src/types.rs
//! Types for the background job system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

/// Opaque unique identifier for a job, generated at creation.
pub type JobId = String;

/// Mint a fresh job id (uuid v4).
pub(crate) fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Status of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are never left once entered.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress snapshot reported by a job body.
///
/// `percentage` is derived as `round(current / total * 10000) / 100` when
/// `total > 0`, else `0.0` — two-decimal rounding, not truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/types/generated/")]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub percentage: f64,
    pub message: String,
}

impl Progress {
    pub fn new(
        stage: impl Into<String>,
        current: u64,
        total: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            current,
            total,
            percentage: percentage(current, total),
            message: message.into(),
        }
    }
}

/// Two-decimal progress percentage.
pub fn percentage(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (current as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// One unit of orchestration, tracked by a [`crate::JobRegistry`] from
/// `Pending` to a terminal state.
///
/// The record is a plain value: timer handles live on the runner, never
/// here. Only the cancellation token is shared with the running body.
#[derive(Debug, Clone)]
pub struct Job<D, P, R> {
    pub id: JobId,
    pub status: JobStatus,
    /// Caller-supplied payload describing *what* to run. Immutable.
    pub data: D,
    /// Last-known progress; absent until the body reports at least once.
    pub progress: Option<P>,
    /// Present only when `status == Completed`.
    pub result: Option<R>,
    /// Present only when `status == Failed`.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Set exactly once, on any terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent progress report; used for stall
    /// detection, distinct from `completed_at`.
    pub last_progress_update: Option<DateTime<Utc>>,
    /// Cooperative cancellation signal, consulted by the body at each
    /// suspension point.
    pub cancel: CancellationToken,
}

impl<D, P, R> Job<D, P, R> {
    pub(crate) fn new(data: D) -> Self {
        Self {
            id: new_job_id(),
            status: JobStatus::Pending,
            data,
            progress: None,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            last_progress_update: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_percentage_two_decimal_rounding() {
        // 50/252 = 0.19841..., rounded to two decimals, not truncated.
        assert_eq!(percentage(50, 252), 19.84);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(10, 10), 100.0);
    }

    #[test]
    fn test_percentage_zero_total() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let p = Progress::new("daily-quotes", 50, 252, "2024-03-01");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"stage\":\"daily-quotes\""));
        assert!(json.contains("\"percentage\":19.84"));
    }

    #[test]
    fn test_new_job_starts_pending_with_fresh_token() {
        let job: Job<(), Progress, ()> = Job::new(());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.progress.is_none());
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.completed_at.is_none());
        assert!(!job.cancel.is_cancelled());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a: Job<(), Progress, ()> = Job::new(());
        let b: Job<(), Progress, ()> = Job::new(());
        assert_ne!(a.id, b.id);
    }
}
